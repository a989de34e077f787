use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use crate::core::{
    domain::{Artifact, ArtifactKind, CompilationLimits, ExecutionLimits, ExitOutcome, StdinSource},
    language::LanguageConfig,
    traits::executor::{CompileError, Executor, RunError, RunResult},
};
use crate::native::{process::LiveProcess, workspace::Workspace};

/// Runs toolchains and submitted programs as plain child processes of the
/// service, rooted at the session workspace.
#[derive(Clone, Debug, Default)]
pub struct NativeExecutor;

impl NativeExecutor {
    pub fn new() -> Self {
        NativeExecutor
    }
}

#[async_trait::async_trait]
impl Executor for NativeExecutor {
    #[tracing::instrument(skip(self, language), fields(language = %language.language))]
    async fn compile(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        limits: &CompilationLimits,
    ) -> Result<Artifact, CompileError> {
        let source_file = language.source_file_name();
        let run_command = language.run.render(workspace.path(), &source_file);
        let kind = if language.run.runs_binary() {
            ArtifactKind::Executable
        } else {
            ArtifactKind::Script
        };
        let artifact = Artifact {
            id: Uuid::new_v4(),
            kind,
            command: run_command,
        };

        let Some(template) = &language.compile else {
            return Ok(artifact);
        };
        let command = template.render(workspace.path(), &source_file);

        tracing::debug!("Start compiling: {:?}", command);
        let compile_future = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let out = match timeout(Duration::from_millis(limits.time_ms), compile_future).await {
            Ok(result) => result.map_err(|e| CompileError::Internal {
                msg: format!("Failed to execute {}: {}", command.program, e),
            })?,
            Err(_) => {
                return Err(CompileError::TimeLimitExceeded {
                    time_ms: limits.time_ms,
                });
            }
        };

        if !out.status.success() {
            let mut stderr = String::from_utf8_lossy(&out.stderr).to_string();
            if stderr.trim().is_empty() {
                stderr = String::from_utf8_lossy(&out.stdout).to_string();
            }
            return Err(CompileError::CompilationFailed { stderr });
        }

        tracing::debug!("Compilation finished: {:?}", artifact.id);
        Ok(artifact)
    }

    async fn spawn(
        &self,
        artifact: &Artifact,
        stdin: StdinSource,
        limits: &ExecutionLimits,
    ) -> Result<LiveProcess, RunError> {
        LiveProcess::spawn(
            &artifact.command,
            stdin,
            Duration::from_millis(limits.time_ms),
            limits.max_output_bytes,
        )
        .map_err(|e| RunError::FailedToLaunch {
            msg: format!("Failed to spawn {}: {}", artifact.command.program, e),
        })
    }

    #[tracing::instrument(skip(self, artifact), fields(artifact = %artifact.id))]
    async fn run(
        &self,
        artifact: &Artifact,
        stdin: StdinSource,
        limits: &ExecutionLimits,
    ) -> Result<RunResult, RunError> {
        let process = self.spawn(artifact, stdin, limits).await?;
        let outcome = process.wait().await;

        let result = RunResult {
            status: outcome.exit_code(),
            stdout: process.output().stdout(),
            stderr: process.output().stderr(),
            execution_time_ms: process.elapsed_ms(),
            truncated: process.output().truncated(),
        };
        tracing::debug!("Execution result: {:?}", result);

        match outcome {
            ExitOutcome::TimedOut => Err(RunError::TimeLimitExceeded { result }),
            ExitOutcome::Exited(_) | ExitOutcome::Killed => Ok(result),
        }
    }
}
