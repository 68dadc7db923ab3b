//! Optimistic mutation engine.
//!
//! Toggle-style reactions (like / dislike) are tracked as *intents*: which of
//! two mutually exclusive set fields should hold the actor. A toggle updates
//! the intent immediately, so [`MutationEngine::project`] shows it on the
//! next render, and a background flush writes the intent once the debounce
//! window closes. Toggles that cancel out inside the window never reach the
//! store. A toggle that arrives while a write is in flight is written right
//! after it, so the store always converges to the last intent.
//!
//! Writes are expressed as set add/remove field updates applied by the store
//! in one commit, never as a read-modify-write of the document.
//!
//! An acknowledged intent is kept while snapshots still carry the document
//! below the acknowledged revision. It is dropped once a snapshot catches up
//! or no longer contains the document. A failed write reverts the intent to
//! the last state the store acknowledged, or drops it if nothing was ever
//! acknowledged, and is reported as [`MutationEvent::Failed`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agora_shared::document::Revision;
use agora_shared::{Collection, Document, DocumentId, UserId};
use agora_store::{FieldUpdate, RemoteStore, Write};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::MutationError;

const EVENT_CAPACITY: usize = 64;

/// One actor's placement between two mutually exclusive set fields of one
/// document. The field pair is stored sorted, so (likes, dislikes) and
/// (dislikes, likes) name the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToggleKey {
    pub collection: Collection,
    pub doc: DocumentId,
    pub actor: UserId,
    pub fields: (String, String),
}

impl ToggleKey {
    pub fn new(doc: &Document, actor: &UserId, a: &str, b: &str) -> Self {
        let fields = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        Self {
            collection: doc.collection,
            doc: doc.id.clone(),
            actor: actor.clone(),
            fields,
        }
    }

    /// Field currently holding the actor according to `doc`.
    fn holder(&self, doc: &Document) -> Option<String> {
        let (a, b) = &self.fields;
        if doc.has_member(a, self.actor.as_str()) {
            Some(a.clone())
        } else if doc.has_member(b, self.actor.as_str()) {
            Some(b.clone())
        } else {
            None
        }
    }

    fn updates(&self, held: Option<&str>) -> Vec<FieldUpdate> {
        let actor = Value::String(self.actor.0.clone());
        let (a, b) = &self.fields;
        match held {
            Some(field) => {
                let other = if field == a { b } else { a };
                vec![
                    FieldUpdate::ArrayUnion(field.to_string(), actor.clone()),
                    FieldUpdate::ArrayRemove(other.clone(), actor),
                ]
            }
            None => vec![
                FieldUpdate::ArrayRemove(a.clone(), actor.clone()),
                FieldUpdate::ArrayRemove(b.clone(), actor),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    Confirmed { key: ToggleKey, revision: Revision },
    Failed { key: ToggleKey, error: MutationError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// A flush task is waiting for the debounce window or about to write.
    Scheduled,
    InFlight,
    /// Written; waiting for a snapshot at or past this revision.
    Acknowledged(Revision),
}

#[derive(Debug)]
struct Intent {
    desired: Option<String>,
    /// What the store holds as far as this client knows.
    confirmed: Option<String>,
    acked: Option<Revision>,
    phase: Phase,
}

struct EngineInner {
    store: Arc<dyn RemoteStore>,
    debounce: Duration,
    intents: Mutex<HashMap<ToggleKey, Intent>>,
    events: broadcast::Sender<MutationEvent>,
}

impl EngineInner {
    fn intents(&self) -> MutexGuard<'_, HashMap<ToggleKey, Intent>> {
        self.intents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MutationEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[derive(Clone)]
pub struct MutationEngine {
    inner: Arc<EngineInner>,
}

impl MutationEngine {
    pub fn new(store: Arc<dyn RemoteStore>, debounce: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                store,
                debounce,
                intents: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.events.subscribe()
    }

    /// Toggle `actor` in `set_field` of `doc`: remove it if present,
    /// otherwise add it and clear it from `exclusive_field`.
    ///
    /// Returns the field that now holds the actor, as shown to the user.
    /// Must be called from within a tokio runtime.
    pub fn toggle_membership(
        &self,
        doc: &Document,
        set_field: &str,
        exclusive_field: &str,
        actor: &UserId,
    ) -> Result<Option<String>, MutationError> {
        if set_field == exclusive_field {
            return Err(MutationError::Invalid(format!(
                "toggle needs two distinct fields, got {set_field} twice"
            )));
        }

        let key = ToggleKey::new(doc, actor, set_field, exclusive_field);
        let mut intents = self.inner.intents();

        let current = match intents.get(&key) {
            Some(intent) => intent.desired.clone(),
            None => key.holder(doc),
        };
        let desired = if current.as_deref() == Some(set_field) {
            None
        } else {
            Some(set_field.to_string())
        };

        let spawn = match intents.get_mut(&key) {
            Some(intent) => {
                intent.desired = desired.clone();
                if matches!(intent.phase, Phase::Acknowledged(_)) {
                    intent.phase = Phase::Scheduled;
                    true
                } else {
                    false
                }
            }
            None => {
                intents.insert(
                    key.clone(),
                    Intent {
                        desired: desired.clone(),
                        confirmed: current,
                        acked: None,
                        phase: Phase::Scheduled,
                    },
                );
                true
            }
        };
        drop(intents);

        debug!(doc = %key.doc, actor = %key.actor, desired = ?desired, "toggle recorded");
        if spawn {
            tokio::spawn(flush(self.inner.clone(), key));
        }
        Ok(desired)
    }

    /// Reconcile intents against authoritative documents, then return the
    /// documents with the remaining intents applied.
    pub fn project(&self, docs: &[Document]) -> Vec<Document> {
        self.reconcile(docs);
        docs.iter().map(|doc| self.overlay(doc)).collect()
    }

    /// Drop acknowledged intents that `docs` already reflect or no longer
    /// contain. Only intents on a document `docs` holds at an older revision
    /// are kept.
    pub fn reconcile(&self, docs: &[Document]) {
        let mut intents = self.inner.intents();
        intents.retain(|key, intent| {
            let Phase::Acknowledged(revision) = intent.phase else {
                return true;
            };
            docs.iter()
                .find(|d| d.collection == key.collection && d.id == key.doc)
                .is_some_and(|d| d.revision < revision)
        });
    }

    /// `doc` as the user should see it, with pending intents applied.
    pub fn overlay(&self, doc: &Document) -> Document {
        let intents = self.inner.intents();
        let mut shown = doc.clone();
        for (key, intent) in intents.iter() {
            if key.collection != doc.collection || key.doc != doc.id {
                continue;
            }
            for update in key.updates(intent.desired.as_deref()) {
                if let Err(e) = update.apply(&mut shown.fields) {
                    debug!(doc = %doc.id, error = %e, "intent does not apply to document");
                }
            }
        }
        shown
    }

    /// Number of intents not yet reflected by a snapshot.
    pub fn pending(&self) -> usize {
        self.inner.intents().len()
    }

    /// Atomic counter increment performed by the store.
    pub async fn increment_counter(
        &self,
        collection: Collection,
        doc: DocumentId,
        field: &str,
        delta: i64,
    ) -> Result<Revision, MutationError> {
        self.commit(vec![Write::increment(collection, doc, field, delta)])
            .await
    }

    /// Submit a batch of writes, applied by the store all-or-nothing.
    pub async fn commit(&self, writes: Vec<Write>) -> Result<Revision, MutationError> {
        let count = writes.len();
        match self.inner.store.commit(writes).await {
            Ok(revision) => {
                debug!(revision, writes = count, "commit acknowledged");
                Ok(revision)
            }
            Err(e) => {
                warn!(error = %e, writes = count, "commit rejected");
                Err(MutationError::from(e))
            }
        }
    }
}

async fn flush(inner: Arc<EngineInner>, key: ToggleKey) {
    tokio::time::sleep(inner.debounce).await;

    loop {
        let target = {
            let mut intents = inner.intents();
            let Some(intent) = intents.get_mut(&key) else {
                return;
            };
            if intent.desired == intent.confirmed {
                let acked = intent.acked;
                match acked {
                    Some(revision) => intent.phase = Phase::Acknowledged(revision),
                    None => {
                        debug!(doc = %key.doc, actor = %key.actor, "toggles cancelled out");
                        intents.remove(&key);
                    }
                }
                return;
            }
            intent.phase = Phase::InFlight;
            intent.desired.clone()
        };

        let write = Write::update(
            key.collection,
            key.doc.clone(),
            key.updates(target.as_deref()),
        );
        match inner.store.commit(vec![write]).await {
            Ok(revision) => {
                if let Some(intent) = inner.intents().get_mut(&key) {
                    intent.confirmed = target;
                    intent.acked = Some(revision);
                }
                debug!(doc = %key.doc, actor = %key.actor, revision, "toggle confirmed");
                inner.emit(MutationEvent::Confirmed {
                    key: key.clone(),
                    revision,
                });
            }
            Err(e) => {
                let error = MutationError::from(e);
                warn!(
                    doc = %key.doc,
                    actor = %key.actor,
                    error = %error,
                    "toggle rejected, reverting"
                );
                {
                    let mut intents = inner.intents();
                    let acked = intents.get(&key).and_then(|intent| intent.acked);
                    match (intents.get_mut(&key), acked) {
                        (Some(intent), Some(revision)) => {
                            intent.desired = intent.confirmed.clone();
                            intent.phase = Phase::Acknowledged(revision);
                        }
                        _ => {
                            intents.remove(&key);
                        }
                    }
                }
                inner.emit(MutationEvent::Failed { key, error });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::constants::{FIELD_DISLIKES, FIELD_LIKES};
    use agora_store::{Filter, LocalStore, Query, RemoteFeed, StoreError};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::json;

    const WINDOW: Duration = Duration::from_millis(20);

    fn seed_post() -> Write {
        seed("p1")
    }

    fn seed(id: &str) -> Write {
        let mut fields = serde_json::Map::new();
        fields.insert("authorId".into(), json!("author"));
        fields.insert("likes".into(), json!([]));
        fields.insert("dislikes".into(), json!([]));
        fields.insert("createdAt".into(), json!(1));
        Write::set(Collection::Posts, DocumentId::from(id), fields)
    }

    async fn fetch(store: &LocalStore) -> Document {
        store
            .get_once(Collection::Posts, DocumentId::from("p1"))
            .await
            .unwrap()
            .unwrap()
    }

    async fn past_window() {
        tokio::time::sleep(WINDOW * 3).await;
    }

    fn sets(doc: &Document) -> (Vec<String>, Vec<String>) {
        let own = |f: &str| doc.members(f).into_iter().map(str::to_string).collect();
        (own(FIELD_LIKES), own(FIELD_DISLIKES))
    }

    async fn setup() -> (LocalStore, MutationEngine) {
        let store = LocalStore::in_memory().unwrap();
        store.mutate(seed_post()).await.unwrap();
        let engine = MutationEngine::new(Arc::new(store.clone()), WINDOW);
        (store, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn like_dislike_dislike() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");

        let held = engine
            .toggle_membership(&fetch(&store).await, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        assert_eq!(held.as_deref(), Some(FIELD_LIKES));
        past_window().await;
        assert_eq!(sets(&fetch(&store).await), (vec!["u1".into()], vec![]));

        engine
            .toggle_membership(&fetch(&store).await, FIELD_DISLIKES, FIELD_LIKES, &u1)
            .unwrap();
        past_window().await;
        assert_eq!(sets(&fetch(&store).await), (vec![], vec!["u1".into()]));

        let held = engine
            .toggle_membership(&fetch(&store).await, FIELD_DISLIKES, FIELD_LIKES, &u1)
            .unwrap();
        assert_eq!(held, None);
        past_window().await;
        assert_eq!(sets(&fetch(&store).await), (vec![], vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn even_toggles_inside_window_write_nothing() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");
        let doc = fetch(&store).await;
        let before = doc.revision;

        for _ in 0..4 {
            engine
                .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
                .unwrap();
            assert!(!engine.overlay(&doc).has_member(FIELD_DISLIKES, "u1"));
        }
        assert_eq!(sets(&engine.overlay(&doc)), (vec![], vec![]));

        past_window().await;
        assert_eq!(fetch(&store).await.revision, before);
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn odd_toggles_inside_window_write_once() {
        let (store, engine) = setup().await;
        let mut events = engine.events();
        let u1 = UserId::from("u1");
        let doc = fetch(&store).await;

        for _ in 0..3 {
            engine
                .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
                .unwrap();
        }
        assert_eq!(sets(&engine.overlay(&doc)), (vec!["u1".into()], vec![]));

        past_window().await;
        assert!(matches!(events.try_recv(), Ok(MutationEvent::Confirmed { .. })));
        assert!(events.try_recv().is_err());
        assert_eq!(sets(&fetch(&store).await), (vec!["u1".into()], vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn never_in_both_sets() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");
        let pattern = [
            FIELD_LIKES,
            FIELD_DISLIKES,
            FIELD_DISLIKES,
            FIELD_LIKES,
            FIELD_LIKES,
            FIELD_DISLIKES,
            FIELD_LIKES,
        ];

        for (i, field) in pattern.iter().enumerate() {
            let other = if *field == FIELD_LIKES {
                FIELD_DISLIKES
            } else {
                FIELD_LIKES
            };
            let doc = fetch(&store).await;
            engine.toggle_membership(&doc, field, other, &u1).unwrap();

            let shown = engine.overlay(&doc);
            assert!(
                !(shown.has_member(FIELD_LIKES, "u1") && shown.has_member(FIELD_DISLIKES, "u1"))
            );
            if i % 2 == 0 {
                past_window().await;
            }
        }
        past_window().await;

        let stored = fetch(&store).await;
        assert!(!(stored.has_member(FIELD_LIKES, "u1") && stored.has_member(FIELD_DISLIKES, "u1")));
        assert_eq!(sets(&engine.project(&[stored.clone()])[0]), sets(&stored));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_write_reverts_projection() {
        let (store, engine) = setup().await;
        let mut events = engine.events();
        let u1 = UserId::from("u1");
        let doc = fetch(&store).await;

        store.set_write_denied(Collection::Posts, true);
        engine
            .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        assert!(engine.overlay(&doc).has_member(FIELD_LIKES, "u1"));

        past_window().await;
        match events.try_recv() {
            Ok(MutationEvent::Failed { error, .. }) => {
                assert_eq!(error, MutationError::PermissionDenied(Collection::Posts))
            }
            other => panic!("expected failure event, got {other:?}"),
        }
        assert!(!engine.overlay(&doc).has_member(FIELD_LIKES, "u1"));
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_intent_lives_until_snapshot_catches_up() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");
        let stale = fetch(&store).await;

        engine
            .toggle_membership(&stale, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        past_window().await;

        // A snapshot from before the write still shows the like.
        let shown = engine.project(&[stale.clone()]);
        assert!(shown[0].has_member(FIELD_LIKES, "u1"));
        assert_eq!(engine.pending(), 1);

        let fresh = fetch(&store).await;
        let shown = engine.project(&[fresh]);
        assert!(shown[0].has_member(FIELD_LIKES, "u1"));
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_unlike_keeps_acknowledged_like() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");
        let stale = fetch(&store).await;

        engine
            .toggle_membership(&stale, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        past_window().await;
        let mut events = engine.events();

        store.set_write_denied(Collection::Posts, true);
        let held = engine
            .toggle_membership(&stale, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        assert_eq!(held, None);
        past_window().await;
        assert!(matches!(events.try_recv(), Ok(MutationEvent::Failed { .. })));

        // The like reached the store, so a lagging snapshot must still show it.
        let shown = engine.project(&[stale.clone()]);
        assert!(shown[0].has_member(FIELD_LIKES, "u1"));
        assert_eq!(engine.pending(), 1);
        assert_eq!(sets(&fetch(&store).await), (vec!["u1".into()], vec![]));

        let shown = engine.project(&[fetch(&store).await]);
        assert!(shown[0].has_member(FIELD_LIKES, "u1"));
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_intents_leave_with_their_documents() {
        let (store, engine) = setup().await;
        let u1 = UserId::from("u1");
        for id in ["p2", "p3", "p4", "p5"] {
            store.mutate(seed(id)).await.unwrap();
        }

        for id in ["p1", "p2", "p3", "p4", "p5"] {
            let doc = store
                .get_once(Collection::Posts, DocumentId::from(id))
                .await
                .unwrap()
                .unwrap();
            engine
                .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
                .unwrap();
        }
        past_window().await;
        assert_eq!(engine.pending(), 5);

        assert!(engine.project(&[]).is_empty());
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test]
    async fn same_field_twice_is_invalid() {
        let (store, engine) = setup().await;
        let doc = fetch(&store).await;
        assert!(matches!(
            engine.toggle_membership(&doc, FIELD_LIKES, FIELD_LIKES, &UserId::from("u1")),
            Err(MutationError::Invalid(_))
        ));
    }

    /// Delays every commit so a write can be caught in flight.
    struct SlowStore {
        inner: LocalStore,
        delay: Duration,
    }

    impl RemoteStore for SlowStore {
        fn subscribe(&self, query: Query) -> BoxFuture<'_, Result<RemoteFeed, StoreError>> {
            self.inner.subscribe(query)
        }

        fn unsubscribe(&self, feed: agora_store::FeedId) {
            self.inner.unsubscribe(feed)
        }

        fn commit(&self, writes: Vec<Write>) -> BoxFuture<'_, Result<Revision, StoreError>> {
            async move {
                tokio::time::sleep(self.delay).await;
                self.inner.commit(writes).await
            }
            .boxed()
        }

        fn get_once(
            &self,
            collection: Collection,
            id: DocumentId,
        ) -> BoxFuture<'_, Result<Option<Document>, StoreError>> {
            self.inner.get_once(collection, id)
        }

        fn count(
            &self,
            collection: Collection,
            filter: Filter,
        ) -> BoxFuture<'_, Result<u64, StoreError>> {
            self.inner.count(collection, filter)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_during_flight_converges_to_last_intent() {
        let local = LocalStore::in_memory().unwrap();
        local.mutate(seed_post()).await.unwrap();
        let slow = Arc::new(SlowStore {
            inner: local.clone(),
            delay: Duration::from_millis(100),
        });
        let engine = MutationEngine::new(slow, WINDOW);
        let mut events = engine.events();
        let u1 = UserId::from("u1");
        let doc = fetch(&local).await;

        engine
            .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        // Past the window, write still in flight.
        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;
        assert!(!fetch(&local).await.has_member(FIELD_LIKES, "u1"));

        engine
            .toggle_membership(&doc, FIELD_LIKES, FIELD_DISLIKES, &u1)
            .unwrap();
        assert!(!engine.overlay(&doc).has_member(FIELD_LIKES, "u1"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sets(&fetch(&local).await), (vec![], vec![]));
        assert!(matches!(events.try_recv(), Ok(MutationEvent::Confirmed { .. })));
        assert!(matches!(events.try_recv(), Ok(MutationEvent::Confirmed { .. })));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let (store, engine) = setup().await;
        let p1 = DocumentId::from("p1");
        let a = engine.increment_counter(Collection::Posts, p1.clone(), "commentsCount", 1);
        let b = engine.increment_counter(Collection::Posts, p1, "commentsCount", 1);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();
        assert_eq!(fetch(&store).await.get_i64("commentsCount"), Some(2));
    }

    #[tokio::test]
    async fn increment_on_missing_document_is_reported() {
        let (_store, engine) = setup().await;
        let err = engine
            .increment_counter(Collection::Posts, DocumentId::from("ghost"), "commentsCount", 1)
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::NotFound("posts/ghost".into()));
    }
}
