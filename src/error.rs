use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage is read-only: {0}")]
    ReadOnly(String),
    #[error("Ownership conflict: {0}")]
    OwnershipConflict(String),
    #[error("Data format error: {0}")]
    DataFormat(String),
    #[error("Unsupported storage backend: {0}")]
    UnsupportedBackend(String),
    #[error("Invalid selection: {0}")]
    Selection(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("CSV error: {0}")]
    Csv(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, SeriesError>;

// Helper conversions
impl From<rusqlite::Error> for SeriesError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for SeriesError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
impl From<config::ConfigError> for SeriesError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl From<csv::Error> for SeriesError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for SeriesError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
