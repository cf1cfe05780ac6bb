use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or interpreting the city model
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown feature type: {0}")]
    UnknownFeatureType(String),

    #[error("Invalid transformation matrix: expected 16 values, got {0}")]
    InvalidMatrix(usize),
}
