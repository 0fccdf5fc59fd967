use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data the reconciler cannot work with: a dangling reference, an
    /// unknown state string, a write that conflicts with what the lock saw.
    #[error("storage: {0}")]
    Storage(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("hook: {0}")]
    Hook(String),
}

impl PipelineError {
    /// Failures the provider should retry: nothing was committed and a later
    /// delivery may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout(_))
    }
}
