use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreatError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid action index: {0}")]
    InvalidAction(u8),

    #[error("Event store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    #[error("Ingest service is shutting down")]
    ShuttingDown,

    #[error("Worker thread '{name}' panicked")]
    WorkerPanicked { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ThreatResult<T> = Result<T, ThreatError>;
