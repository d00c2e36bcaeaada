//! Error types for Regen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Backing store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt cache entry at {path}: {reason}")]
    Corruption { path: String, reason: String },

    // Edge layer errors
    #[error("Purge failed for {path}: {reason}")]
    Purge { path: String, reason: String },

    // Infrastructure errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn corruption(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn purge(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Purge {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
