use crate::core::domain::{Artifact, CompilationLimits, ExecutionLimits, StdinSource};
use crate::core::language::LanguageConfig;
use crate::native::process::LiveProcess;
use crate::native::workspace::Workspace;

/// The only component that touches toolchains and OS processes.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    /// Produces the artifact for `workspace`'s source file. Languages without
    /// a compile step resolve straight to their run command.
    async fn compile(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        limits: &CompilationLimits,
    ) -> Result<Artifact, CompileError>;

    /// Starts the artifact under supervision and returns immediately.
    async fn spawn(
        &self,
        artifact: &Artifact,
        stdin: StdinSource,
        limits: &ExecutionLimits,
    ) -> Result<LiveProcess, RunError>;

    /// Runs the artifact to completion under the execution deadline.
    async fn run(
        &self,
        artifact: &Artifact,
        stdin: StdinSource,
        limits: &ExecutionLimits,
    ) -> Result<RunResult, RunError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Compilation failed")]
    CompilationFailed { stderr: String },
    #[error("Compilation exceeded {time_ms} ms")]
    TimeLimitExceeded { time_ms: u64 },
    #[error("Internal compiler error: {msg}")]
    Internal { msg: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("Time limit exceeded")]
    TimeLimitExceeded { result: RunResult },
    #[error("Failed to launch process: {msg}")]
    FailedToLaunch { msg: String },
}
