//! Error types for vise-server
//!
//! Module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for vise-server
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors bubbled up from the common crate
    #[error(transparent)]
    Common(#[from] vise_common::Error),

    /// Request could not be framed or parsed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource, engine, or stage not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Image decode/encode errors
    #[error("Image error: {0}")]
    Image(String),

    /// External subprocess errors
    #[error("Subprocess error: {0}")]
    Subprocess(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

/// Convenience Result type using vise-server Error
pub type Result<T> = std::result::Result<T, Error>;
