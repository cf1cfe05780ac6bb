use thiserror::Error;

/// Result type for import operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of the importer.
///
/// Unsupported geometry, dropped rings and unresolvable references are not
/// errors: they are logged and skipped where they occur.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Identifier allocation failed: {0}")]
    Allocation(String),

    #[error("Timed out after {timeout_ms} ms waiting for lock on {key}")]
    LockTimeout { key: String, timeout_ms: u128 },

    #[error("Import cancelled")]
    Cancelled,

    #[error("Geometry error: {0}")]
    Geometry(#[from] citydb_import_geometry::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
