//! Live query subscriptions.
//!
//! A [`SubscriptionHandle`] wraps one query against one collection. Its
//! observer receives a full ordered [`Snapshot`] on the initial subscribe and
//! after every remote change to the result set, or a single
//! [`SubscriptionError`] after which the handle is terminal. There is no
//! retry here; reopening is the caller's decision.
//!
//! After a failure the last good snapshot stays available through
//! [`SubscriptionHandle::latest`], so a view does not flash to empty.
//!
//! `close` is idempotent, may be called from inside the observer, and no
//! observer call happens after it returns. Dropping the last handle closes
//! the subscription.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use agora_shared::schema::Schema;
use agora_shared::Document;
use agora_store::{FeedEvent, FeedId, Query, RemoteStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SubscriptionError;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Position of this snapshot on its subscription, starting at 1.
    pub sequence: u64,
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Decode every document into `T`, skipping (and logging) the ones that
    /// do not match the schema.
    pub fn decode<T: Schema>(&self) -> Vec<T> {
        self.documents
            .iter()
            .filter_map(|doc| match T::from_document(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "skipping malformed document");
                    None
                }
            })
            .collect()
    }
}

pub enum Update<'a> {
    Snapshot(&'a Snapshot),
    Failed(&'a SubscriptionError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Waiting for the first snapshot.
    Pending,
    Live,
    Failed(SubscriptionError),
    Closed,
}

type Observer = Box<dyn FnMut(Update<'_>) + Send>;

fn ignore(_: Update<'_>) {}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Handle whose observer is running on this thread, if any.
    static DISPATCHING: Cell<Option<u64>> = const { Cell::new(None) };
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct View {
    status: Status,
    latest: Option<Snapshot>,
    sequence: u64,
}

struct Inner {
    id: u64,
    query: Query,
    store: Arc<dyn RemoteStore>,
    closed: AtomicBool,
    feed: Mutex<Option<FeedId>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    observer: Mutex<Observer>,
    view: RwLock<View>,
}

#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<Inner>,
}

impl SubscriptionHandle {
    /// Open a live query. Setup failures are reported to the observer like
    /// any other subscription failure.
    pub async fn open<F>(store: Arc<dyn RemoteStore>, query: Query, observer: F) -> Self
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        let inner = Arc::new(Inner {
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            query: query.clone(),
            store: store.clone(),
            closed: AtomicBool::new(false),
            feed: Mutex::new(None),
            pump: Mutex::new(None),
            observer: Mutex::new(Box::new(observer)),
            view: RwLock::new(View {
                status: Status::Pending,
                latest: None,
                sequence: 0,
            }),
        });

        match store.subscribe(query).await {
            Ok(feed) => {
                debug!(
                    handle = inner.id,
                    feed = %feed.id,
                    collection = %inner.query.collection,
                    "subscription opened"
                );
                *lock(&inner.feed) = Some(feed.id);
                let task = tokio::spawn(pump(Arc::downgrade(&inner), feed.events));
                *lock(&inner.pump) = Some(task);
            }
            Err(e) => {
                let error = SubscriptionError::from(e);
                let mut observer = lock(&inner.observer);
                inner.fail(&mut observer, error);
            }
        }

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    pub fn status(&self) -> Status {
        self.inner.read_view(|v| v.status.clone())
    }

    /// Last successfully delivered snapshot. Survives failure and close.
    pub fn latest(&self) -> Option<Snapshot> {
        self.inner.read_view(|v| v.latest.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if !inner.deliver(event) {
            break;
        }
    }
}

impl Inner {
    fn read_view<R>(&self, f: impl FnOnce(&View) -> R) -> R {
        f(&self.view.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_view<R>(&self, f: impl FnOnce(&mut View) -> R) -> R {
        f(&mut self.view.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns whether the pump should keep reading.
    fn deliver(&self, event: FeedEvent) -> bool {
        let mut observer = lock(&self.observer);
        if self.is_closed() {
            return false;
        }

        match event {
            FeedEvent::Snapshot(mut documents) => {
                self.query.sort(&mut documents);
                let snapshot = self.write_view(|view| {
                    view.sequence += 1;
                    let snapshot = Snapshot {
                        sequence: view.sequence,
                        documents,
                    };
                    view.latest = Some(snapshot.clone());
                    view.status = Status::Live;
                    snapshot
                });
                debug!(
                    handle = self.id,
                    sequence = snapshot.sequence,
                    len = snapshot.len(),
                    "snapshot delivered"
                );
                self.dispatch(&mut observer, Update::Snapshot(&snapshot));

                if self.is_closed() {
                    // Closed from inside the observer.
                    *observer = Box::new(ignore);
                    return false;
                }
                true
            }
            FeedEvent::Failed(failure) => {
                self.fail(&mut observer, SubscriptionError::from(failure));
                false
            }
        }
    }

    fn fail(&self, observer: &mut Observer, error: SubscriptionError) {
        warn!(
            handle = self.id,
            collection = %self.query.collection,
            error = %error,
            "subscription failed"
        );
        self.write_view(|view| view.status = Status::Failed(error.clone()));
        if let Some(feed) = lock(&self.feed).take() {
            self.store.unsubscribe(feed);
        }
        self.dispatch(observer, Update::Failed(&error));
    }

    fn dispatch(&self, observer: &mut Observer, update: Update<'_>) {
        DISPATCHING.with(|current| {
            let previous = current.replace(Some(self.id));
            observer(update);
            current.set(previous);
        });
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(feed) = lock(&self.feed).take() {
            self.store.unsubscribe(feed);
        }
        if let Some(task) = lock(&self.pump).take() {
            task.abort();
        }
        self.write_view(|view| {
            if !matches!(view.status, Status::Failed(_)) {
                view.status = Status::Closed;
            }
        });

        // Outside our own observer, wait for any callback running on another
        // thread and release the observer so captured state is freed.
        let reentrant = DISPATCHING.with(|current| current.get() == Some(self.id));
        if !reentrant {
            *lock(&self.observer) = Box::new(ignore);
        }

        debug!(handle = self.id, "subscription closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let feed = self
            .feed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(feed) = feed {
            self.store.unsubscribe(feed);
        }
        let task = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
