//! Crate-level error type.
//!
//! Decode failures ([`DecodeError`]) are recoverable per frame; everything
//! else aborts the engine that raised it.

use thiserror::Error;

use crate::types::DecodeError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// allData does not fit the interface MTU once framing overhead is added
    #[error("allData ({all_data} B) exceeds MTU limit ({limit} B)")]
    FrameTooLarge { all_data: usize, limit: usize },

    #[error("required external tool '{0}' not found in PATH")]
    MissingExternalTool(String),

    #[error("transmission failed: {0}")]
    Transmit(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Error::Capture(msg.into())
    }

    pub fn transmit(msg: impl Into<String>) -> Self {
        Error::Transmit(msg.into())
    }
}
