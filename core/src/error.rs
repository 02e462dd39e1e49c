use thiserror::Error;

#[derive(Error, Debug)]
pub enum FraudError {
    #[error("Isolation violation: {0}")]
    IsolationViolation(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote processor error: {0}")]
    RemoteProcessor(String),

    #[error("Circuit breaker open; refusing processor call")]
    BreakerOpen,

    #[error("Card already has an open freeze record")]
    AlreadyFrozen,

    #[error("Card has no open freeze record")]
    NotFrozen,

    #[error("Actor '{actor}' may not unfreeze a '{reason}' freeze")]
    NotPermitted { actor: String, reason: String },

    #[error("Incident '{0}' not found")]
    IncidentNotFound(String),

    #[error("Card '{0}' not registered")]
    CardNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FraudResult<T> = Result<T, FraudError>;
