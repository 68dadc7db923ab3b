//! # agora-feed
//!
//! Follows the post feed of a local Agora store and logs every page of
//! feed cards as it changes. Stops on Ctrl+C.

use std::sync::Arc;

use agora_shared::schema::Post;
use agora_store::{Database, LocalStore, RemoteStore};
use agora_sync::projection::{feed_cards, paginate, CommentIndex, PageState, RoleTable};
use agora_sync::telemetry::init_tracing;
use agora_sync::{ForumClient, SessionCell, Snapshot, SyncConfig, Update};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting agora-feed v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::from_env();
    info!(
        ?config.db_path,
        debounce_ms = config.debounce.as_millis() as u64,
        "Loaded configuration"
    );

    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Store opened");
    }
    let store: Arc<dyn RemoteStore> = Arc::new(LocalStore::new(db));

    let client = ForumClient::new(store, SessionCell::new(), &config);
    let page_size = config.page_size;
    let roles = RoleTable::default();
    let comments = CommentIndex::default();
    let mut page = PageState::default();
    let engine = client.engine().clone();

    let feed = client
        .open_feed(move |update| match update {
            Update::Snapshot(snapshot) => {
                // Pending reactions stay visible until the store catches up.
                let projected = Snapshot {
                    sequence: snapshot.sequence,
                    documents: engine.project(&snapshot.documents),
                };
                let posts: Vec<Post> = projected.decode();
                let cards = feed_cards(&posts, &comments, &roles, None);
                let shown = paginate(&cards, page_size, page);
                page = shown.state();
                info!(
                    sequence = snapshot.sequence,
                    posts = posts.len(),
                    page = shown.index + 1,
                    pages = shown.page_count,
                    "feed updated"
                );
                for card in &shown.items {
                    info!(
                        post = %card.post.id,
                        author = %card.post.author_name,
                        likes = card.reactions.likes,
                        dislikes = card.reactions.dislikes,
                        comments = card.reactions.comments,
                        "{}",
                        card.post.content
                    );
                }
            }
            Update::Failed(error) => warn!(%error, "feed stopped, showing last page"),
        })
        .await;

    tokio::signal::ctrl_c().await?;
    feed.close();
    info!("Shutting down");
    Ok(())
}
