//! Error types for the core data model

use thiserror::Error;

/// Errors raised while constructing or manipulating core perception types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid camera model: {0}")]
    InvalidCameraModel(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
