use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Event source query error: {0}")]
    SourceQuery(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// True when the event source rejected or lost the session.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
