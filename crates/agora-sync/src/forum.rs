//! Forum actions and view queries on top of the sync core.
//!
//! Every write goes through the [`MutationEngine`]: reactions as debounced
//! toggles, everything else as atomic batches. Every view is a
//! [`SubscriptionHandle`] over one query.

use std::sync::Arc;

use agora_shared::constants::{
    FIELD_BIO, FIELD_CHAT_ID, FIELD_COMMENTS_COUNT, FIELD_CREATED_AT, FIELD_DISLIKES,
    FIELD_DISPLAY_NAME, FIELD_LIKES, FIELD_PHOTO_URL, FIELD_POST_ID, FIELD_ROLE, FIELD_STATUS,
    FIELD_USER_ID,
};
use agora_shared::schema::{ChatMessage, Comment, Post, Schema, Transaction, UserProfile};
use agora_shared::{Collection, Document, DocumentId, Role, ThreadId, TransactionStatus, UserId};
use agora_store::{FieldUpdate, Filter, OrderBy, Query, RemoteStore, Write};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::MutationEngine;
use crate::error::{ExternalServiceUnavailable, MutationError, Result};
use crate::projection::Reaction;
use crate::services::{Assistant, BlobUploader, Webhook, WebhookEvent};
use crate::session::{IdentityProvider, Session, SessionCell};
use crate::subscription::{SubscriptionHandle, Update};

/// Where a chat message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Lobby,
    /// One-to-one thread with this peer.
    Direct(UserId),
}

pub struct ForumClient {
    store: Arc<dyn RemoteStore>,
    engine: MutationEngine,
    session: SessionCell,
    feed_limit: usize,
    chat_limit: usize,
    uploader: Option<Arc<dyn BlobUploader>>,
    assistant: Assistant,
    webhook: Webhook,
}

impl ForumClient {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionCell, config: &SyncConfig) -> Self {
        Self {
            engine: MutationEngine::new(store.clone(), config.debounce),
            store,
            session,
            feed_limit: config.feed_limit,
            chat_limit: config.chat_limit,
            uploader: None,
            assistant: Assistant::from_config(config),
            webhook: Webhook::from_config(config),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn BlobUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_assistant(mut self, assistant: Assistant) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn engine(&self) -> &MutationEngine {
        &self.engine
    }

    pub fn session(&self) -> &SessionCell {
        &self.session
    }

    fn me(&self) -> std::result::Result<Session, MutationError> {
        self.session.require()
    }

    async fn author_name(&self, session: &Session) -> String {
        let profile = self
            .store
            .get_once(Collection::Users, session.user_id.as_document_id())
            .await
            .ok()
            .flatten()
            .and_then(|doc| UserProfile::from_document(&doc).ok());
        match profile {
            Some(p) if !p.display_name.trim().is_empty() => p.display_name,
            _ => session.email.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// Create an account and its profile. New accounts always start as plain
    /// users; elevated roles are only granted through payment review or by
    /// editing the store directly.
    pub async fn register(
        &self,
        identity: &dyn IdentityProvider,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<UserId> {
        let user_id = identity.sign_up(email, password).await?;
        let profile = UserProfile {
            id: user_id.as_document_id(),
            email: email.to_string(),
            display_name: display_name.trim().to_string(),
            photo_url: None,
            bio: None,
            role: Role::User,
            created_at: Utc::now(),
        };
        if let Err(e) = self.engine.commit(vec![set(&profile)]).await {
            // The identity account exists; the profile can be written later.
            warn!(user = %user_id, error = %e, "account created without a profile");
            return Err(e.into());
        }
        info!(user = %user_id, "account registered");
        self.webhook.notify(WebhookEvent::registered(user_id.clone()));
        Ok(user_id)
    }

    /// Save the owner-editable fields of the caller's profile. Role, email
    /// and creation time are written elsewhere and left untouched, so a
    /// stale copy cannot undo a concurrent role change.
    pub async fn update_profile(
        &self,
        profile: &UserProfile,
    ) -> std::result::Result<(), MutationError> {
        let me = self.me()?;
        if profile.user_id() != me.user_id {
            return Err(MutationError::Forbidden(
                "profiles can only be edited by their owner".into(),
            ));
        }

        let optional = |v: &Option<String>| v.clone().map_or(Value::Null, Value::from);
        let write = Write::update(
            Collection::Users,
            profile.id.clone(),
            vec![
                FieldUpdate::Assign(
                    FIELD_DISPLAY_NAME.into(),
                    Value::from(profile.display_name.trim()),
                ),
                FieldUpdate::Assign(FIELD_PHOTO_URL.into(), optional(&profile.photo_url)),
                FieldUpdate::Assign(FIELD_BIO.into(), optional(&profile.bio)),
            ],
        );
        self.engine.commit(vec![write]).await?;
        debug!(user = %me.user_id, "profile saved");
        Ok(())
    }

    async fn role_of(&self, user: &UserId) -> std::result::Result<Role, MutationError> {
        let doc = self
            .store
            .get_once(Collection::Users, user.as_document_id())
            .await?
            .ok_or_else(|| MutationError::NotFound(format!("users/{user}")))?;
        UserProfile::from_document(&doc)
            .map(|p| p.role)
            .map_err(|e| MutationError::Invalid(e.to_string()))
    }

    /// Reload the signed-in user's role from their profile.
    pub async fn refresh_role(&self) -> Result<Role> {
        let me = self.me()?;
        let doc = self
            .store
            .get_once(Collection::Users, me.user_id.as_document_id())
            .await?
            .ok_or_else(|| MutationError::NotFound(format!("users/{}", me.user_id)))?;
        let profile = UserProfile::from_document(&doc)?;
        self.session.set_role(profile.role);
        debug!(user = %me.user_id, role = ?profile.role, "role refreshed");
        Ok(profile.role)
    }

    // -----------------------------------------------------------------------
    // Posts
    // -----------------------------------------------------------------------

    pub async fn upload_image(&self, bytes: Vec<u8>) -> Result<String> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| {
                ExternalServiceUnavailable::new("image upload", "no upload service configured")
            })?;
        Ok(uploader.upload(bytes).await?)
    }

    pub async fn create_post(
        &self,
        content: &str,
        image_url: Option<String>,
    ) -> std::result::Result<DocumentId, MutationError> {
        let me = self.me()?;
        let content = content.trim();
        if content.is_empty() && image_url.is_none() {
            return Err(MutationError::Invalid("a post needs text or an image".into()));
        }

        let post = Post {
            id: DocumentId::generate(),
            author_id: me.user_id.clone(),
            author_name: self.author_name(&me).await,
            content: content.to_string(),
            image_url,
            likes: Vec::new(),
            dislikes: Vec::new(),
            comments_count: 0,
            created_at: Utc::now(),
        };
        self.engine.commit(vec![set(&post)]).await?;
        info!(post = %post.id, author = %me.user_id, "post created");
        Ok(post.id)
    }

    /// Only the author or an admin may delete a post.
    pub async fn delete_post(&self, post: &Post) -> std::result::Result<(), MutationError> {
        let me = self.me()?;
        if post.author_id != me.user_id && !me.role.is_admin() {
            return Err(MutationError::Forbidden(format!(
                "post {} belongs to another user",
                post.id
            )));
        }
        self.engine
            .commit(vec![Write::delete(Collection::Posts, post.id.clone())])
            .await?;
        info!(post = %post.id, by = %me.user_id, "post deleted");
        Ok(())
    }

    pub fn like(&self, post: &Document) -> std::result::Result<Reaction, MutationError> {
        self.react(post, FIELD_LIKES, FIELD_DISLIKES)
    }

    pub fn dislike(&self, post: &Document) -> std::result::Result<Reaction, MutationError> {
        self.react(post, FIELD_DISLIKES, FIELD_LIKES)
    }

    fn react(
        &self,
        post: &Document,
        field: &str,
        exclusive: &str,
    ) -> std::result::Result<Reaction, MutationError> {
        let me = self.me()?;
        let held = self
            .engine
            .toggle_membership(post, field, exclusive, &me.user_id)?;
        Ok(match held.as_deref() {
            Some(FIELD_LIKES) => Reaction::Liked,
            Some(_) => Reaction::Disliked,
            None => Reaction::None,
        })
    }

    /// Create the comment and bump the post's counter in one batch.
    pub async fn submit_comment(
        &self,
        post_id: &DocumentId,
        text: &str,
    ) -> std::result::Result<DocumentId, MutationError> {
        let me = self.me()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(MutationError::Invalid("empty comment".into()));
        }

        let comment = Comment {
            id: DocumentId::generate(),
            post_id: post_id.clone(),
            author_id: me.user_id.clone(),
            author_name: self.author_name(&me).await,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.engine
            .commit(vec![
                set(&comment),
                Write::increment(Collection::Posts, post_id.clone(), FIELD_COMMENTS_COUNT, 1),
            ])
            .await?;
        debug!(post = %post_id, comment = %comment.id, "comment submitted");
        Ok(comment.id)
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    /// Thread for `scope` as seen by the signed-in user. A direct thread is
    /// always derived from the caller's own id, so nobody can address a
    /// thread they are not part of.
    fn thread_for(
        &self,
        me: &Session,
        scope: &ChatScope,
    ) -> std::result::Result<Option<ThreadId>, MutationError> {
        match scope {
            ChatScope::Lobby => Ok(None),
            ChatScope::Direct(peer) if *peer == me.user_id => {
                Err(MutationError::Invalid("cannot open a direct thread with yourself".into()))
            }
            ChatScope::Direct(peer) => Ok(Some(ThreadId::between(&me.user_id, peer))),
        }
    }

    pub async fn send_message(
        &self,
        scope: &ChatScope,
        text: &str,
    ) -> std::result::Result<DocumentId, MutationError> {
        let me = self.me()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(MutationError::Invalid("empty message".into()));
        }

        let message = ChatMessage {
            id: DocumentId::generate(),
            sender_id: me.user_id.clone(),
            sender_name: self.author_name(&me).await,
            text: text.to_string(),
            chat_id: self.thread_for(&me, scope)?,
            created_at: Utc::now(),
        };
        self.engine.commit(vec![set(&message)]).await?;
        Ok(message.id)
    }

    pub async fn ask_assistant(&self, prompt: &str) -> String {
        self.assistant.reply(prompt, None).await
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    /// Submit a payment proof for review. Refused while another one of the
    /// caller's payments is still pending.
    pub async fn submit_payment(&self, proof_url: &str) -> Result<DocumentId> {
        let me = self.me()?;
        let pending = self
            .store
            .count(
                Collection::Transactions,
                Filter::And(vec![
                    Filter::eq(FIELD_USER_ID, me.user_id.as_str()),
                    Filter::eq(FIELD_STATUS, TransactionStatus::Pending.as_str()),
                ]),
            )
            .await?;
        if pending > 0 {
            let reason = "a payment is already awaiting review".to_string();
            return Err(MutationError::Rejected(reason).into());
        }

        let tx = Transaction {
            id: DocumentId::generate(),
            user_id: me.user_id.clone(),
            status: TransactionStatus::Pending,
            proof_url: proof_url.to_string(),
            reviewed_by: None,
            created_at: Utc::now(),
        };
        self.engine.commit(vec![set(&tx)]).await?;
        info!(tx = %tx.id, user = %me.user_id, "payment submitted");
        Ok(tx.id)
    }

    /// Approve or reject a pending payment. Approval upgrades the payer to
    /// `pro` in the same batch, unless they already hold `pro` or higher.
    pub async fn review_transaction(
        &self,
        tx: &Transaction,
        approve: bool,
    ) -> std::result::Result<(), MutationError> {
        let me = self.me()?;
        if !me.role.is_admin() {
            return Err(MutationError::Forbidden("only admins review payments".into()));
        }
        if tx.status != TransactionStatus::Pending {
            return Err(MutationError::Invalid(format!(
                "transaction {} is already {}",
                tx.id,
                tx.status.as_str()
            )));
        }

        let status = if approve {
            TransactionStatus::Approved
        } else {
            TransactionStatus::Rejected
        };
        let mut writes = vec![Write::update(
            Collection::Transactions,
            tx.id.clone(),
            vec![
                FieldUpdate::Assign(FIELD_STATUS.into(), Value::from(status.as_str())),
                FieldUpdate::Assign("reviewedBy".into(), Value::from(me.user_id.as_str())),
            ],
        )];
        if approve && self.role_of(&tx.user_id).await? < Role::Pro {
            writes.push(Write::update(
                Collection::Users,
                tx.user_id.as_document_id(),
                vec![FieldUpdate::Assign(FIELD_ROLE.into(), Value::from(Role::Pro.as_str()))],
            ));
        }
        self.engine.commit(writes).await?;
        info!(tx = %tx.id, user = %tx.user_id, status = status.as_str(), "payment reviewed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Newest posts first.
    pub fn feed_query(&self) -> Query {
        Query::collection(Collection::Posts)
            .order_by(OrderBy::desc(FIELD_CREATED_AT))
            .limit(self.feed_limit)
    }

    pub fn comments_query(post: &DocumentId) -> Query {
        Query::collection(Collection::Comments)
            .filter(Filter::eq(FIELD_POST_ID, post.as_str()))
            .order_by(OrderBy::asc(FIELD_CREATED_AT))
    }

    /// Most recent messages of a thread, newest first; the timeline
    /// projection puts them back in reading order.
    pub fn chat_query(&self, scope: &ChatScope) -> std::result::Result<Query, MutationError> {
        let thread = match scope {
            ChatScope::Lobby => None,
            ChatScope::Direct(_) => self.thread_for(&self.me()?, scope)?,
        };
        let filter = match thread {
            Some(thread) => Filter::eq(FIELD_CHAT_ID, thread.as_str()),
            None => Filter::is_null(FIELD_CHAT_ID),
        };
        Ok(Query::collection(Collection::Messages)
            .filter(filter)
            .order_by(OrderBy::desc(FIELD_CREATED_AT))
            .limit(self.chat_limit))
    }

    pub async fn open_feed<F>(&self, observer: F) -> SubscriptionHandle
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        SubscriptionHandle::open(self.store.clone(), self.feed_query(), observer).await
    }

    pub async fn open_comments<F>(&self, post: &DocumentId, observer: F) -> SubscriptionHandle
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        SubscriptionHandle::open(self.store.clone(), Self::comments_query(post), observer).await
    }

    pub async fn open_chat<F>(
        &self,
        scope: &ChatScope,
        observer: F,
    ) -> std::result::Result<SubscriptionHandle, MutationError>
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        let query = self.chat_query(scope)?;
        Ok(SubscriptionHandle::open(self.store.clone(), query, observer).await)
    }

    /// Admin review queue, oldest first.
    pub async fn open_pending_transactions<F>(
        &self,
        observer: F,
    ) -> std::result::Result<SubscriptionHandle, MutationError>
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        if !self.me()?.role.is_admin() {
            return Err(MutationError::Forbidden("only admins see the review queue".into()));
        }
        let query = Query::collection(Collection::Transactions)
            .filter(Filter::eq(FIELD_STATUS, TransactionStatus::Pending.as_str()))
            .order_by(OrderBy::asc(FIELD_CREATED_AT));
        Ok(SubscriptionHandle::open(self.store.clone(), query, observer).await)
    }

    pub async fn open_users<F>(&self, observer: F) -> SubscriptionHandle
    where
        F: FnMut(Update<'_>) + Send + 'static,
    {
        let query = Query::collection(Collection::Users).order_by(OrderBy::asc(FIELD_CREATED_AT));
        SubscriptionHandle::open(self.store.clone(), query, observer).await
    }
}

fn set<T: Schema>(record: &T) -> Write {
    Write::set(T::COLLECTION, record.id().clone(), record.to_fields())
}
