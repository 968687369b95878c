//! Server error types.

use std::io;

use thiserror::Error;

/// Errors that stop the server or refuse to start it.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket, poll or file error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or command line
    #[error("configuration error: {0}")]
    Config(String),

    /// The readiness loop is gone
    #[error("server is no longer running")]
    Stopped,
}

/// Result alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
