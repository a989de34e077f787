//! Session lifecycle.
//!
//! [`SessionManager`] owns the registry of live sessions. Sessions are held
//! as `Arc<ExecutionSession>` in a sharded map; a map guard is never held
//! across an await point, so a slow session never blocks another id. A
//! session is purged (removed, process killed, workspace deleted) exactly
//! once, by whoever wins the atomic `remove`.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::constants::{HEALTH_OK, REAPER_INTERVAL, STDIN_FILE_NAME};
use crate::core::{
    domain::{
        BatteryReport, ExecutionReport, FinalReport, HealthReport, InputReport, SessionSnapshot,
        SessionStatus, StdinSource, TestCase,
    },
    errors::SandboxError,
    language::{LanguageConfig, LanguageRegistry},
    pipeline::{
        compiling::{CompileOutcome, compile_session},
        running::{RunOutcome, RunSettings, attached, monitor_exit, run_session},
        testing::{BatterySettings, run_battery},
    },
    prompt::PromptState,
    session::ExecutionSession,
    traits::executor::Executor,
};
use crate::native::{process::Stream, workspace::Workspace};

#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<ExecutionSession>>,
    executor: Arc<dyn Executor>,
    registry: LanguageRegistry,
    config: SandboxConfig,
}

impl SessionManager {
    pub fn new(
        executor: Arc<dyn Executor>,
        registry: LanguageRegistry,
        config: SandboxConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            executor,
            registry,
            config,
        }
    }

    /// Submits `code` for execution.
    ///
    /// With `test_cases` the submission runs as a battery and no session
    /// outlives the call. Otherwise the code is compiled and run; the call
    /// returns once the program ended, or once the settle window passed for
    /// an interactive program, which then stays registered for
    /// [`send_input`](Self::send_input) and [`stop`](Self::stop).
    #[tracing::instrument(skip(self, code, stdin, test_cases), fields(cases = test_cases.len()))]
    pub async fn start(
        &self,
        code: &str,
        language: &str,
        stdin: Option<&str>,
        test_cases: &[TestCase],
    ) -> Result<ExecutionReport, SandboxError> {
        validate(code, language)?;
        let language = self.registry.resolve(language)?;

        let id = Uuid::new_v4();
        let workspace = prepare_workspace(&self.config, id, language, code).await?;

        if !test_cases.is_empty() {
            let result = self.battery(&workspace, language, test_cases).await;
            workspace.cleanup().await;
            return result.map(|battery| battery_report(id, battery));
        }

        let interactive = stdin.is_none() && language.reads_stdin(code);
        let session = Arc::new(ExecutionSession::new(
            id,
            language.language,
            workspace,
            interactive,
        ));
        self.sessions.insert(id, session.clone());
        tracing::info!("Session {} created (interactive: {})", id, interactive);

        let result = self.drive(&session, language, stdin).await;
        match result {
            Ok(RunOutcome::Interactive(report)) => {
                monitor_exit(session, self.config.retention_grace);
                Ok(report)
            }
            Ok(RunOutcome::Finished(report)) => {
                self.purge(id).await;
                Ok(report)
            }
            Err(err) => {
                self.purge(id).await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        session: &ExecutionSession,
        language: &LanguageConfig,
        stdin: Option<&str>,
    ) -> Result<RunOutcome, SandboxError> {
        let compile = compile_session(
            session,
            language,
            self.executor.as_ref(),
            &self.config.compilation_limits(),
        )
        .await?;

        let artifact = match compile {
            CompileOutcome::Compiled(artifact) => artifact,
            CompileOutcome::Rejected { stderr } => {
                return Ok(RunOutcome::Finished(ExecutionReport {
                    execution_id: session.id,
                    success: false,
                    status: session.status(),
                    stdout: String::new(),
                    stderr,
                    exit_code: None,
                    interactive: None,
                    execution_time_ms: session.elapsed_ms(),
                    battery: None,
                }));
            }
        };

        let stdin = match stdin {
            Some(input) => {
                let path = session.workspace.write_file(STDIN_FILE_NAME, input).await?;
                StdinSource::File(path)
            }
            None => StdinSource::Piped,
        };
        let settings = RunSettings {
            limits: self.config.execution_limits(),
            initial_settle: self.config.initial_settle,
        };

        run_session(session, self.executor.as_ref(), &artifact, stdin, &settings).await
    }

    /// Writes one line to an interactive session and returns the output that
    /// arrived within the input settle window.
    ///
    /// Every input pushes the session's deadline back by the execution
    /// timeout. If the program ends during the window the final output is
    /// returned and the session is purged.
    #[tracing::instrument(skip(self, input))]
    pub async fn send_input(&self, id: Uuid, input: &str) -> Result<InputReport, SandboxError> {
        let session = self.get(id)?;
        let exchange = session.begin_exchange().await;

        if session.status().is_terminal() || !session.is_interactive() {
            return Err(SandboxError::not_found(id));
        }
        let process = attached(&session)?;

        let mark = process.output().len(Stream::Stdout);
        let written = process.write_line(input).await;
        if let Err(e) = &written {
            tracing::warn!("Failed to write to session {}: {}", id, e);
        }
        process.extend_deadline(self.config.execution_timeout);

        let exited = tokio::time::timeout(self.config.input_settle, process.wait())
            .await
            .ok()
            .or_else(|| process.exit_outcome());

        // A broken pipe to a process that has exited is reported as its exit.
        if let (Err(e), None) = (&written, exited) {
            return Err(SandboxError::Internal {
                msg: format!("Failed to deliver input to session {}: {}", id, e),
            });
        }

        let prompt = match exited {
            Some(outcome) => {
                session.finish(outcome);
                session.observe_output();
                PromptState::default()
            }
            None => session.observe_output(),
        };

        let report = InputReport {
            stdout_delta: process.output().stdout_since(mark),
            full_stdout: process.output().stdout(),
            stderr: process.output().stderr(),
            prompt,
            exit_code: session.exit_code(),
            status: session.status(),
        };

        drop(exchange);
        if exited.is_some() {
            tracing::info!("Session {} ended during input exchange", id);
            self.purge(id).await;
        }
        Ok(report)
    }

    /// Kills the session's process if it is still alive and returns the
    /// final output. Also serves as the one deferred read of a session that
    /// already ended.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, id: Uuid) -> Result<FinalReport, SandboxError> {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return Err(SandboxError::not_found(id));
        };

        session.transition(SessionStatus::Stopped);
        if let Some(process) = session.process() {
            let outcome = process.kill().await;
            session.finish(outcome);
        }

        let report = FinalReport {
            stdout: session.stdout(),
            stderr: session.stderr(),
            exit_code: session.exit_code(),
            status: session.status(),
        };
        session.workspace.cleanup().await;

        tracing::info!("Session {} stopped: {:?}", id, report.status);
        Ok(report)
    }

    pub fn status(&self, id: Uuid) -> Result<SessionSnapshot, SandboxError> {
        Ok(self.get(id)?.snapshot())
    }

    /// Runs `code` against every case; see [`run_battery`].
    #[tracing::instrument(skip(self, code, test_cases), fields(cases = test_cases.len()))]
    pub async fn execute_tests(
        &self,
        code: &str,
        language: &str,
        test_cases: &[TestCase],
    ) -> Result<BatteryReport, SandboxError> {
        validate(code, language)?;
        let language = self.registry.resolve(language)?;

        let workspace = prepare_workspace(&self.config, Uuid::new_v4(), language, code).await?;
        let result = self.battery(&workspace, language, test_cases).await;
        workspace.cleanup().await;
        result
    }

    async fn battery(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        test_cases: &[TestCase],
    ) -> Result<BatteryReport, SandboxError> {
        let settings = BatterySettings {
            compilation: self.config.compilation_limits(),
            execution: self.config.execution_limits(),
            parallelism: self.config.battery_parallelism,
        };
        run_battery(workspace, language, self.executor.as_ref(), test_cases, &settings).await
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: HEALTH_OK,
            supported_languages: self.registry.supported_languages(),
            active_sessions: self.active_sessions(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Kills and cleans up every registered session.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        tracing::info!("Draining {} sessions", ids.len());
        join_all(ids.into_iter().map(|id| self.purge(id))).await;
    }

    /// Purges ended sessions whose output was not read within the retention
    /// grace period. Returns how many were purged.
    pub async fn reap_expired(&self, now: Instant) -> usize {
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().retention_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut purged = 0;
        for id in expired {
            if self.purge(id).await {
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!("Reaped {} expired sessions", purged);
        }
        purged
    }

    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticks = IntervalStream::new(tokio::time::interval(REAPER_INTERVAL));
            while ticks.next().await.is_some() {
                manager.reap_expired(Instant::now()).await;
            }
        })
    }

    fn get(&self, id: Uuid) -> Result<Arc<ExecutionSession>, SandboxError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SandboxError::not_found(id))
    }

    /// Removes, kills and cleans up `id`. Returns false if another caller
    /// already purged it.
    async fn purge(&self, id: Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return false;
        };

        if let Some(process) = session.process() {
            if process.exit_outcome().is_none() {
                session.transition(SessionStatus::Stopped);
            }
            let outcome = process.kill().await;
            session.finish(outcome);
        } else {
            session.fail();
        }
        session.workspace.cleanup().await;
        tracing::debug!("Session {} purged: {:?}", id, session.status());
        true
    }
}

fn validate(code: &str, language: &str) -> Result<(), SandboxError> {
    if code.trim().is_empty() {
        return Err(SandboxError::validation("code is required"));
    }
    if language.trim().is_empty() {
        return Err(SandboxError::validation("language is required"));
    }
    Ok(())
}

async fn prepare_workspace(
    config: &SandboxConfig,
    id: Uuid,
    language: &LanguageConfig,
    code: &str,
) -> Result<Workspace, SandboxError> {
    let workspace = Workspace::create(&config.workspace_root, id).await?;
    if let Err(err) = workspace.write_source(language, code).await {
        tracing::error!("Failed to write source: {}", err);
        workspace.cleanup().await;
        return Err(err);
    }
    Ok(workspace)
}

fn battery_report(id: Uuid, battery: BatteryReport) -> ExecutionReport {
    let status = if battery.compile_error.is_some() {
        SessionStatus::Failed
    } else {
        SessionStatus::Completed
    };

    ExecutionReport {
        execution_id: id,
        success: battery.all_passed(),
        status,
        stdout: String::new(),
        stderr: battery.compile_error.clone().unwrap_or_default(),
        exit_code: None,
        interactive: None,
        execution_time_ms: battery
            .results
            .iter()
            .map(|result| result.execution_time_ms)
            .sum(),
        battery: Some(battery),
    }
}
