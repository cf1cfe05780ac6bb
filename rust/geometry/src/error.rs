use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during geometry processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid ring: {0}")]
    InvalidRing(String),

    #[error("Degenerate polygon: {0}")]
    DegeneratePolygon(String),

    #[error("Unsupported geometry: {0}")]
    Unsupported(String),

    #[error("Invalid transformation: {0}")]
    InvalidTransform(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl Error {
    pub fn ring(msg: impl Into<String>) -> Self {
        Self::InvalidRing(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
