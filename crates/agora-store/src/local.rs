//! SQLite-backed [`RemoteStore`] with live-query fan-out.
//!
//! After every commit, each open feed on an affected collection re-runs its
//! query and receives a fresh snapshot if the (id, revision) sequence of the
//! result changed. Watchers whose receiver was dropped are pruned during
//! fan-out.
//!
//! Lock order is always `watchers` then `db`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use agora_shared::document::Revision;
use agora_shared::{Collection, Document, DocumentId};
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::query::{Filter, Query};
use crate::remote::{FailureKind, FeedEvent, FeedFailure, FeedId, RemoteFeed, RemoteStore};
use crate::write::Write;

/// Per-collection read/write denial.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    read_denied: HashSet<Collection>,
    write_denied: HashSet<Collection>,
}

impl AccessRules {
    pub fn can_read(&self, collection: Collection) -> bool {
        !self.read_denied.contains(&collection)
    }

    pub fn can_write(&self, collection: Collection) -> bool {
        !self.write_denied.contains(&collection)
    }
}

struct Watcher {
    query: Query,
    tx: mpsc::UnboundedSender<FeedEvent>,
    last: Vec<(DocumentId, Revision)>,
}

struct Shared {
    db: Mutex<Database>,
    watchers: Mutex<HashMap<FeedId, Watcher>>,
    rules: RwLock<AccessRules>,
    next_feed: AtomicU64,
}

#[derive(Clone)]
pub struct LocalStore {
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fingerprint(docs: &[Document]) -> Vec<(DocumentId, Revision)> {
    docs.iter().map(|d| (d.id.clone(), d.revision)).collect()
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            shared: Arc::new(Shared {
                db: Mutex::new(db),
                watchers: Mutex::new(HashMap::new()),
                rules: RwLock::new(AccessRules::default()),
                next_feed: AtomicU64::new(1),
            }),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn rules(&self) -> AccessRules {
        self.shared
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deny or restore reads on a collection. Denying terminates every open
    /// feed on it with a permission failure.
    pub fn set_read_denied(&self, collection: Collection, denied: bool) {
        {
            let mut rules = self
                .shared
                .rules
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if denied {
                rules.read_denied.insert(collection);
            } else {
                rules.read_denied.remove(&collection);
            }
        }

        if denied {
            self.fail_feeds(
                collection,
                FeedFailure {
                    kind: FailureKind::PermissionDenied,
                    message: format!("read access to {collection} revoked"),
                },
            );
        }
    }

    pub fn set_write_denied(&self, collection: Collection, denied: bool) {
        let mut rules = self
            .shared
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if denied {
            rules.write_denied.insert(collection);
        } else {
            rules.write_denied.remove(&collection);
        }
    }

    /// Terminate every feed on `collection` with `failure`.
    pub fn fail_feeds(&self, collection: Collection, failure: FeedFailure) {
        let mut watchers = lock(&self.shared.watchers);
        let doomed: Vec<FeedId> = watchers
            .iter()
            .filter(|(_, w)| w.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();

        for id in doomed {
            if let Some(watcher) = watchers.remove(&id) {
                warn!(feed = %id, %collection, error = %failure, "terminating feed");
                let _ = watcher.tx.send(FeedEvent::Failed(failure.clone()));
            }
        }
    }

    pub fn open_feeds(&self) -> usize {
        lock(&self.shared.watchers).len()
    }

    fn subscribe_now(&self, query: Query) -> Result<RemoteFeed> {
        if !self.rules().can_read(query.collection) {
            return Err(StoreError::PermissionDenied {
                collection: query.collection,
            });
        }

        let mut watchers = lock(&self.shared.watchers);
        let docs = lock(&self.shared.db).run_query(&query)?;

        let id = FeedId(self.shared.next_feed.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let last = fingerprint(&docs);
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(FeedEvent::Snapshot(docs));

        debug!(feed = %id, collection = %query.collection, "feed opened");
        watchers.insert(id, Watcher { query, tx, last });

        Ok(RemoteFeed { id, events: rx })
    }

    fn commit_now(&self, writes: Vec<Write>) -> Result<Revision> {
        let rules = self.rules();
        if let Some(denied) = writes.iter().find(|w| !rules.can_write(w.collection)) {
            return Err(StoreError::PermissionDenied {
                collection: denied.collection,
            });
        }

        let revision = lock(&self.shared.db).commit(&writes)?;
        debug!(revision, writes = writes.len(), "commit applied");

        let touched: HashSet<Collection> = writes.iter().map(|w| w.collection).collect();
        self.fan_out(&touched);

        Ok(revision)
    }

    fn fan_out(&self, touched: &HashSet<Collection>) {
        let mut watchers = lock(&self.shared.watchers);
        let db = lock(&self.shared.db);
        let mut closed = Vec::new();

        for (id, watcher) in watchers.iter_mut() {
            if !touched.contains(&watcher.query.collection) {
                continue;
            }
            if watcher.tx.is_closed() {
                closed.push(*id);
                continue;
            }

            let docs = match db.run_query(&watcher.query) {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(feed = %id, error = %e, "query failed during fan-out");
                    let _ = watcher.tx.send(FeedEvent::Failed(FeedFailure {
                        kind: FailureKind::Unavailable,
                        message: e.to_string(),
                    }));
                    closed.push(*id);
                    continue;
                }
            };

            let print = fingerprint(&docs);
            if print == watcher.last {
                continue;
            }
            watcher.last = print;
            if watcher.tx.send(FeedEvent::Snapshot(docs)).is_err() {
                closed.push(*id);
            }
        }

        for id in closed {
            watchers.remove(&id);
            debug!(feed = %id, "feed pruned");
        }
    }
}

impl RemoteStore for LocalStore {
    fn subscribe(&self, query: Query) -> BoxFuture<'_, Result<RemoteFeed>> {
        future::ready(self.subscribe_now(query)).boxed()
    }

    fn unsubscribe(&self, feed: FeedId) {
        if lock(&self.shared.watchers).remove(&feed).is_some() {
            info!(feed = %feed, "feed closed");
        }
    }

    fn commit(&self, writes: Vec<Write>) -> BoxFuture<'_, Result<Revision>> {
        future::ready(self.commit_now(writes)).boxed()
    }

    fn get_once(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> BoxFuture<'_, Result<Option<Document>>> {
        let result = if self.rules().can_read(collection) {
            lock(&self.shared.db).get_document(collection, &id)
        } else {
            Err(StoreError::PermissionDenied { collection })
        };
        future::ready(result).boxed()
    }

    fn count(&self, collection: Collection, filter: Filter) -> BoxFuture<'_, Result<u64>> {
        let result = if self.rules().can_read(collection) {
            lock(&self.shared.db).count(collection, &filter)
        } else {
            Err(StoreError::PermissionDenied { collection })
        };
        future::ready(result).boxed()
    }
}
