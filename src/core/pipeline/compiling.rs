use crate::core::{
    domain::{Artifact, CompilationLimits, SessionStatus},
    errors::SandboxError,
    language::LanguageConfig,
    session::ExecutionSession,
    traits::executor::{CompileError, Executor},
};

#[derive(Debug)]
pub enum CompileOutcome {
    Compiled(Artifact),
    /// The submitted code did not compile. Not a service fault.
    Rejected { stderr: String },
}

/// Compile step of a session. A rejected compile leaves the session `Failed`
/// and the run step must not be attempted.
#[tracing::instrument(skip_all, fields(session = %session.id, language = %language.language))]
pub async fn compile_session(
    session: &ExecutionSession,
    language: &LanguageConfig,
    executor: &dyn Executor,
    limits: &CompilationLimits,
) -> Result<CompileOutcome, SandboxError> {
    if language.requires_compilation() {
        session.transition(SessionStatus::Compiling);
    }

    tracing::debug!("Start compiling");
    let compilation_result = executor.compile(&session.workspace, language, limits).await;
    tracing::debug!("Compilation result: {:?}", compilation_result);

    match into_outcome(compilation_result) {
        Ok(CompileOutcome::Compiled(artifact)) => Ok(CompileOutcome::Compiled(artifact)),
        Ok(CompileOutcome::Rejected { stderr }) => {
            session.fail();
            Ok(CompileOutcome::Rejected { stderr })
        }
        Err(err) => {
            session.fail();
            Err(err)
        }
    }
}

pub fn into_outcome(
    result: Result<Artifact, CompileError>,
) -> Result<CompileOutcome, SandboxError> {
    match result {
        Ok(artifact) => Ok(CompileOutcome::Compiled(artifact)),
        Err(CompileError::CompilationFailed { stderr }) => Ok(CompileOutcome::Rejected { stderr }),
        Err(err @ CompileError::TimeLimitExceeded { .. }) => Ok(CompileOutcome::Rejected {
            stderr: err.to_string(),
        }),
        Err(CompileError::Internal { msg }) => {
            tracing::error!("Internal error during compilation: {}", msg);
            Err(SandboxError::Internal { msg })
        }
    }
}
