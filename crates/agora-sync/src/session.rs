//! Signed-in user context.
//!
//! One [`SessionCell`] exists per process. It is created empty at startup,
//! replaced on sign-in and sign-out, and passed by reference to whatever
//! needs the current user.

use std::sync::Arc;

use agora_shared::{Role, UserId};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{AuthError, MutationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
}

/// Identity provider contract. The user id it hands out is reused as the
/// document id of the user's profile.
pub trait IdentityProvider: Send + Sync {
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<UserId, AuthError>>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Session, AuthError>>;

    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthError>>;

    /// Current session, updated on every sign-in and sign-out.
    fn on_session_change(&self) -> watch::Receiver<Option<Session>>;
}

#[derive(Clone)]
pub struct SessionCell {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, session: Option<Session>) {
        match &session {
            Some(s) => info!(user = %s.user_id, role = ?s.role, "session started"),
            None => info!("session ended"),
        }
        self.tx.send_replace(session);
    }

    /// Update the role of the signed-in user. No-op when signed out.
    pub fn set_role(&self, role: Role) {
        self.tx.send_if_modified(|current| match current {
            Some(s) if s.role != role => {
                s.role = role;
                true
            }
            _ => false,
        });
    }

    pub fn changes(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    pub fn require(&self) -> Result<Session, MutationError> {
        self.current().ok_or(MutationError::NotSignedIn)
    }

    /// Mirror the provider's session into this cell until the provider goes
    /// away.
    pub fn follow(&self, provider: &dyn IdentityProvider) -> JoinHandle<()> {
        let mut changes = provider.on_session_change();
        let cell = self.clone();
        cell.replace(changes.borrow_and_update().clone());
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let session = changes.borrow_and_update().clone();
                cell.replace(session);
            }
        })
    }
}
