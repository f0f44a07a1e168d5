//! Error types for the collector pipeline

use sensa_wire::WireError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Collector, broker, parser and saver errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Framing or decode failure on a client or broker link
    #[error("{0}")]
    Wire(#[from] WireError),

    /// Local I/O error (filesystem, socket setup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Broker unreachable or refused the connection. Fatal to the collector.
    #[error("{0}")]
    Connection(String),

    /// Bounded wait expired
    #[error("operation timed out")]
    Timeout,

    /// Broker answered but rejected or garbled the request
    #[error("broker error: {0}")]
    Broker(String),

    /// Store rejected or could not persist a record
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Snapshot lacks the part a parser projects
    #[error("snapshot has no {0}")]
    MissingField(&'static str),

    /// Field present but outside its allowed range
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker URL scheme with no registered implementation
    #[error("Publisher scheme \"{0}\" is not supported")]
    UnknownScheme(String),

    /// Parser name with no registered implementation
    #[error("Parser \"{0}\" does not exist")]
    UnknownParser(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Broker connectivity failures take the whole collector down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(format!("invalid broker URL: {}", e))
    }
}
