//! # agora-store
//!
//! The remote collection store the sync core talks to.
//!
//! [`RemoteStore`] is the contract: live queries that deliver full ordered
//! snapshots, atomic batched writes built from set / merge / field-update /
//! delete operations, one-shot reads and counts. [`LocalStore`] implements it
//! over a SQLite database (see [`Database`]) and fans snapshots out to every
//! open feed after each commit.

pub mod database;
pub mod documents;
pub mod local;
pub mod migrations;
pub mod query;
pub mod remote;
pub mod write;

mod error;

pub use agora_shared::document::Revision;
pub use database::Database;
pub use error::{Result, StoreError};
pub use local::{AccessRules, LocalStore};
pub use query::{Direction, Filter, OrderBy, Query};
pub use remote::{FailureKind, FeedEvent, FeedFailure, FeedId, RemoteFeed, RemoteStore};
pub use write::{FieldUpdate, Write, WriteKind};
