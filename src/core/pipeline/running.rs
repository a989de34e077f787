use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    domain::{Artifact, ExecutionLimits, ExecutionReport, ExitOutcome, SessionStatus, StdinSource},
    errors::SandboxError,
    prompt::PromptState,
    session::ExecutionSession,
    traits::executor::{Executor, RunError},
};
use crate::native::process::LiveProcess;

#[derive(Clone, Debug)]
pub struct RunSettings {
    pub limits: ExecutionLimits,
    pub initial_settle: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// The process ended inside the request.
    Finished(ExecutionReport),
    /// The process is still alive and waits for exchanges.
    Interactive(ExecutionReport),
}

/// Spawns the artifact for `session` and drives it until it either ends or
/// turns out to be interactive.
///
/// With a static stdin file the process is awaited under the deadline. With a
/// live pipe the output is sampled after `initial_settle`: an interactive
/// session (static or detected from a prompt) is handed back to the caller
/// while still running, anything else gets EOF on stdin and is awaited.
#[tracing::instrument(skip_all, fields(session = %session.id))]
pub async fn run_session(
    session: &ExecutionSession,
    executor: &dyn Executor,
    artifact: &Artifact,
    stdin: StdinSource,
    settings: &RunSettings,
) -> Result<RunOutcome, SandboxError> {
    let process = match executor.spawn(artifact, stdin.clone(), &settings.limits).await {
        Ok(process) => process,
        Err(err) => {
            session.fail();
            return Err(launch_error(err));
        }
    };

    if !session.attach(process) {
        session.fail();
        return Err(SandboxError::Internal {
            msg: format!("Session {} already owns a process", session.id),
        });
    }
    let process = attached(session)?;
    session.transition(SessionStatus::Running);

    if stdin != StdinSource::Piped {
        let outcome = process.wait().await;
        return Ok(RunOutcome::Finished(finished_report(session, process, outcome)));
    }

    if let Ok(outcome) = tokio::time::timeout(settings.initial_settle, process.wait()).await {
        return Ok(RunOutcome::Finished(finished_report(session, process, outcome)));
    }

    let prompt = session.observe_output();
    if session.is_interactive() || prompt.waiting_for_input {
        if !session.is_interactive() {
            tracing::info!("Prompt detected, upgrading to interactive: {:?}", prompt.prompt);
            session.upgrade_to_interactive();
        }
        return Ok(RunOutcome::Interactive(interactive_report(session, process, prompt)));
    }

    tracing::debug!("No prompt after settle window, closing stdin");
    process.close_stdin().await;
    let outcome = process.wait().await;
    Ok(RunOutcome::Finished(finished_report(session, process, outcome)))
}

/// Watches an interactive session in the background and records its exit.
/// The output stays readable for `retention_grace` after that.
pub fn monitor_exit(session: Arc<ExecutionSession>, retention_grace: Duration) {
    tokio::spawn(async move {
        let Some(process) = session.process() else {
            return;
        };
        let outcome = process.wait().await;
        let status = session.finish(outcome);
        session.observe_output();
        session.retain_for(retention_grace);
        tracing::debug!("Interactive session {} ended: {:?}", session.id, status);
    });
}

pub fn attached(session: &ExecutionSession) -> Result<&LiveProcess, SandboxError> {
    session.process().ok_or_else(|| SandboxError::Internal {
        msg: format!("Session {} has no process", session.id),
    })
}

pub fn launch_error(err: RunError) -> SandboxError {
    tracing::error!("Failed to start process: {}", err);
    SandboxError::Internal {
        msg: err.to_string(),
    }
}

fn finished_report(
    session: &ExecutionSession,
    process: &LiveProcess,
    outcome: ExitOutcome,
) -> ExecutionReport {
    let status = session.finish(outcome);
    session.observe_output();
    tracing::debug!("Process finished: {:?} -> {:?}", outcome, status);

    ExecutionReport {
        execution_id: session.id,
        success: outcome == ExitOutcome::Exited(0),
        status,
        stdout: process.output().stdout(),
        stderr: process.output().stderr(),
        exit_code: Some(outcome.exit_code()),
        interactive: None,
        execution_time_ms: process.elapsed_ms(),
        battery: None,
    }
}

fn interactive_report(
    session: &ExecutionSession,
    process: &LiveProcess,
    prompt: PromptState,
) -> ExecutionReport {
    ExecutionReport {
        execution_id: session.id,
        success: true,
        status: session.status(),
        stdout: process.output().stdout(),
        stderr: process.output().stderr(),
        exit_code: None,
        interactive: Some(prompt),
        execution_time_ms: process.elapsed_ms(),
        battery: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TIMEOUT_EXIT_CODE;
    use crate::core::domain::{ArtifactKind, Language, ProcessCommand};
    use crate::core::traits::executor::MockExecutor;
    use crate::native::executor::NativeExecutor;
    use crate::native::workspace::Workspace;
    use uuid::Uuid;

    fn script(workspace: &Workspace, body: &str) -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            kind: ArtifactKind::Script,
            command: ProcessCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), body.to_string()],
                cwd: workspace.path().to_path_buf(),
            },
        }
    }

    fn settings(time_ms: u64) -> RunSettings {
        RunSettings {
            limits: ExecutionLimits {
                time_ms,
                max_output_bytes: 1024 * 1024,
            },
            initial_settle: Duration::from_millis(300),
        }
    }

    async fn session(root: &tempfile::TempDir, interactive: bool) -> ExecutionSession {
        let id = Uuid::new_v4();
        let workspace = Workspace::create(root.path(), id).await.unwrap();
        ExecutionSession::new(id, Language::Shell, workspace, interactive)
    }

    #[tokio::test]
    async fn test_batch_run_completes() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "echo 'Hello World'");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Null,
            &settings(5000),
        )
        .await
        .unwrap();

        let RunOutcome::Finished(report) = outcome else {
            panic!("Expected finished run");
        };
        assert!(report.success);
        assert_eq!(report.stdout, "Hello World\n");
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_timeout_reports_sentinel() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "sleep 30");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Null,
            &settings(300),
        )
        .await
        .unwrap();

        let RunOutcome::Finished(report) = outcome else {
            panic!("Expected finished run");
        };
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert_eq!(report.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_prompt_upgrades_to_interactive() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "printf 'Name: '; read name; echo hi $name");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Piped,
            &settings(5000),
        )
        .await
        .unwrap();

        let RunOutcome::Interactive(report) = outcome else {
            panic!("Expected interactive run");
        };
        let prompt = report.interactive.unwrap();
        assert!(prompt.waiting_for_input);
        assert_eq!(prompt.prompt.as_deref(), Some("Name:"));
        assert_eq!(report.exit_code, None);
        assert!(session.is_interactive());
        assert_eq!(session.status(), SessionStatus::WaitingInput);

        session.process().unwrap().kill().await;
    }

    #[tokio::test]
    async fn test_silent_reader_gets_eof() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "sleep 0.5; cat; echo done");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Piped,
            &settings(5000),
        )
        .await
        .unwrap();

        let RunOutcome::Finished(report) = outcome else {
            panic!("Expected finished run");
        };
        assert_eq!(report.stdout, "done\n");
        assert!(!session.is_interactive());
    }

    #[tokio::test]
    async fn test_terminated_result_line_is_not_a_prompt() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "echo 'Result: 42'; sleep 1; echo done");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Piped,
            &settings(5000),
        )
        .await
        .unwrap();

        let RunOutcome::Finished(report) = outcome else {
            panic!("Expected finished run");
        };
        assert_eq!(report.stdout, "Result: 42\ndone\n");
        assert_eq!(report.exit_code, Some(0));
        assert!(report.interactive.is_none());
        assert!(!session.is_interactive());
    }

    #[tokio::test]
    async fn test_monitor_records_exit_and_retains() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(session(&root, true).await);
        let artifact = script(&session.workspace, "read x; echo got $x");

        let outcome = run_session(
            &session,
            &NativeExecutor::new(),
            &artifact,
            StdinSource::Piped,
            &settings(5000),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, RunOutcome::Interactive(_)));

        monitor_exit(session.clone(), Duration::from_secs(60));
        let process = session.process().unwrap();
        process.write_line("7").await.unwrap();
        process.wait().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.exit_code(), Some(0));
        assert!(!session.retention_expired(std::time::Instant::now()));
        assert_eq!(session.stdout(), "got 7\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_session() {
        let root = tempfile::tempdir().unwrap();
        let session = session(&root, false).await;
        let artifact = script(&session.workspace, "true");

        let mut executor = MockExecutor::new();
        executor.expect_spawn().returning(|_, _, _| {
            Err(RunError::FailedToLaunch {
                msg: "no such file".to_string(),
            })
        });

        let result = run_session(
            &session,
            &executor,
            &artifact,
            StdinSource::Null,
            &settings(1000),
        )
        .await;

        assert!(matches!(result, Err(SandboxError::Internal { .. })));
        assert_eq!(session.status(), SessionStatus::Failed);
    }
}
