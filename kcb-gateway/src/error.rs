//! Common error types for kcb-gateway.
//!
//! Component errors (`OpenError`, `TransactError`, `DecodeError`, ...) live
//! next to the code that raises them. This enum collects the ones that end
//! the daemon at startup.

use thiserror::Error;

use crate::bus::BusError;
use crate::channel::OpenError;

/// Main error type for kcb-gateway startup and lifecycle.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial device could not be opened
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Bus device could not be opened
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
