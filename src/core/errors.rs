use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Invalid request: {msg}")]
    Validation { msg: String },

    #[error("Unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("Workspace error: {msg}")]
    Workspace { msg: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl SandboxError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SandboxError::Validation { msg: msg.into() }
    }

    pub fn not_found(id: Uuid) -> Self {
        SandboxError::SessionNotFound { id: id.to_string() }
    }

    /// True for faults of the sandbox itself rather than of the caller or
    /// the submitted program.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SandboxError::Workspace { .. } | SandboxError::Internal { .. }
        )
    }
}
