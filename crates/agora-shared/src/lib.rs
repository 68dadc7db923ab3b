//! # agora-shared
//!
//! Types shared by the Agora store and sync crates: identifiers, the untyped
//! [`Document`](document::Document) exchanged with the collection store, and
//! the typed per-collection schemas decoded from it.

pub mod constants;
pub mod document;
pub mod error;
pub mod schema;
pub mod types;

pub use document::Document;
pub use error::SchemaError;
pub use types::{Collection, DocumentId, Role, ThreadId, TransactionStatus, UserId};
