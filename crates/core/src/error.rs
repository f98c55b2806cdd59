//! Error type shared by every FileSense subsystem.
//!
//! Each variant corresponds to one stable short code that crosses the API
//! boundary. Adapters map codes to their own envelopes; the core never
//! exposes stack traces or backend-specific error text beyond the message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("embedder error: {0}")]
    Embedder(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Stable short code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io_error",
            Error::Decode(_) => "decode_error",
            Error::Extractor(_) => "extractor_error",
            Error::Embedder(_) => "embedder_error",
            Error::Store(_) => "store_error",
            Error::Index(_) => "index_error",
            Error::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Store(e.to_string())
    }
}
