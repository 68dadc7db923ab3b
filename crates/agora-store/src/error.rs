use agora_shared::Collection;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update targeted a document that does not exist.
    #[error("Document {collection}/{id} not found")]
    NotFound { collection: Collection, id: String },

    /// The access rules forbid this read or write.
    #[error("Permission denied on {collection}")]
    PermissionDenied { collection: Collection },

    /// A field update does not apply to the stored value.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
