//! # agora-sync
//!
//! Real-time sync core for the Agora forum: live query subscriptions,
//! optimistic mutations and the pure projections views are built from.

pub mod config;
pub mod engine;
pub mod error;
pub mod forum;
pub mod projection;
pub mod services;
pub mod session;
pub mod subscription;
pub mod telemetry;

pub use config::SyncConfig;
pub use engine::{MutationEngine, MutationEvent, ToggleKey};
pub use error::{
    AuthError, ExternalServiceUnavailable, MutationError, Result, SubscriptionError, SyncError,
    UploadError,
};
pub use forum::{ChatScope, ForumClient};
pub use session::{IdentityProvider, Session, SessionCell};
pub use subscription::{Snapshot, Status, SubscriptionHandle, Update};
