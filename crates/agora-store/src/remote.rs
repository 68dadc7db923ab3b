//! The collection store contract consumed by the sync core.

use std::fmt;

use agora_shared::document::Revision;
use agora_shared::{Collection, Document, DocumentId};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::query::{Filter, Query};
use crate::write::Write;

/// Store-side identity of one live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PermissionDenied,
    Unavailable,
}

/// Terminal transport failure reported on a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for FeedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::PermissionDenied => write!(f, "permission denied: {}", self.message),
            FailureKind::Unavailable => write!(f, "unavailable: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full ordered result set of the query.
    Snapshot(Vec<Document>),
    /// No further events follow a failure.
    Failed(FeedFailure),
}

/// Receiving end of a live query.
#[derive(Debug)]
pub struct RemoteFeed {
    pub id: FeedId,
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
}

/// Remote collection store: live queries plus atomic writes.
///
/// Snapshots on one feed are delivered in commit order. Nothing is promised
/// about ordering across feeds.
pub trait RemoteStore: Send + Sync {
    fn subscribe(&self, query: Query) -> BoxFuture<'_, Result<RemoteFeed, StoreError>>;

    /// Release the feed. Calling it twice, or for a feed that already
    /// failed, is a no-op.
    fn unsubscribe(&self, feed: FeedId);

    /// Apply every write or none. Returns the revision of the commit.
    fn commit(&self, writes: Vec<Write>) -> BoxFuture<'_, Result<Revision, StoreError>>;

    fn get_once(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> BoxFuture<'_, Result<Option<Document>, StoreError>>;

    fn count(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> BoxFuture<'_, Result<u64, StoreError>>;

    fn mutate(&self, write: Write) -> BoxFuture<'_, Result<Revision, StoreError>> {
        self.commit(vec![write])
    }
}
