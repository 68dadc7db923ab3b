use thiserror::Error;

use crate::types::Collection;

/// Raised when a document read from the store does not match the schema of
/// its collection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("document {id} belongs to {actual}, expected {expected}")]
    WrongCollection {
        id: String,
        expected: Collection,
        actual: Collection,
    },

    #[error("document {id} in {collection} is malformed: {reason}")]
    Malformed {
        collection: Collection,
        id: String,
        reason: String,
    },

    #[error("document {id} violates an invariant: {reason}")]
    Invariant { id: String, reason: String },

    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}
