use agora_shared::{Collection, SchemaError};
use agora_store::{FailureKind, FeedFailure, StoreError};
use thiserror::Error;

/// Transport or permission failure on a live query. Terminal for the handle
/// that reported it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("live query unavailable: {0}")]
    Transport(String),
}

impl From<FeedFailure> for SubscriptionError {
    fn from(f: FeedFailure) -> Self {
        match f.kind {
            FailureKind::PermissionDenied => SubscriptionError::PermissionDenied(f.message),
            FailureKind::Unavailable => SubscriptionError::Transport(f.message),
        }
    }
}

impl From<StoreError> for SubscriptionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied { collection } => {
                SubscriptionError::PermissionDenied(format!("read access to {collection} denied"))
            }
            other => SubscriptionError::Transport(other.to_string()),
        }
    }
}

/// A write was refused, failed, or is not allowed for the current session.
/// Any optimistic state tied to it has already been rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("permission denied on {0}")]
    PermissionDenied(Collection),

    #[error("document {0} not found")]
    NotFound(String),

    #[error("invalid mutation: {0}")]
    Invalid(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl From<StoreError> for MutationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied { collection } => {
                MutationError::PermissionDenied(collection)
            }
            StoreError::NotFound { collection, id } => {
                MutationError::NotFound(format!("{collection}/{id}"))
            }
            StoreError::InvalidOperation(reason) => MutationError::Invalid(reason),
            other => MutationError::Rejected(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload service returned HTTP {0}")]
    Status(u16),

    #[error("upload failed: {0}")]
    Transport(String),

    #[error("upload response was not understood: {0}")]
    InvalidResponse(String),
}

/// An external collaborator (identity, text generation, webhook) could not
/// be reached. Callers degrade to a fallback instead of failing the view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} unavailable: {reason}")]
pub struct ExternalServiceUnavailable {
    pub service: &'static str,
    pub reason: String,
}

impl ExternalServiceUnavailable {
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}

/// Identity provider refused or could not serve a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account already exists for {0}")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Unavailable(#[from] ExternalServiceUnavailable),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Unavailable(#[from] ExternalServiceUnavailable),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_mutation_errors() {
        let e: MutationError = StoreError::PermissionDenied {
            collection: Collection::Posts,
        }
        .into();
        assert_eq!(e, MutationError::PermissionDenied(Collection::Posts));

        let e: MutationError = StoreError::NotFound {
            collection: Collection::Posts,
            id: "p1".into(),
        }
        .into();
        assert_eq!(e, MutationError::NotFound("posts/p1".into()));
    }

    #[test]
    fn feed_failures_map_to_subscription_errors() {
        let e: SubscriptionError = FeedFailure {
            kind: FailureKind::Unavailable,
            message: "index missing".into(),
        }
        .into();
        assert_eq!(e, SubscriptionError::Transport("index missing".into()));
    }
}
