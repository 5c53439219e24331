//! Directory errors

/// Errors raised by the system account directory and its stores
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("System account not registered: {0}")]
    NotFound(String),

    #[error("System account {key} is already registered with ledger id {existing}, refusing {attempted}")]
    Conflict {
        key: String,
        existing: u128,
        attempted: u128,
    },

    #[error("Directory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported directory document version: {0}")]
    UnsupportedVersion(u32),

    #[error("Corrupt directory record: {0}")]
    Corrupt(String),
}

impl DirectoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}
