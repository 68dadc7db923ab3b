//! Typed per-collection schemas.
//!
//! Documents are validated once, where they are read, so projection code can
//! assume a fixed shape. Field names on the wire are camelCase and
//! `createdAt` is stored as epoch milliseconds.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, Fields};
use crate::error::SchemaError;
use crate::types::{Collection, DocumentId, Role, ThreadId, TransactionStatus, UserId};

/// A document shape bound to one collection.
pub trait Schema: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &DocumentId;

    /// Cross-field checks that serde cannot express.
    fn validate(&self) -> Result<(), SchemaError> {
        Ok(())
    }

    fn from_document(doc: &Document) -> Result<Self, SchemaError> {
        if doc.collection != Self::COLLECTION {
            return Err(SchemaError::WrongCollection {
                id: doc.id.to_string(),
                expected: Self::COLLECTION,
                actual: doc.collection,
            });
        }

        let mut fields = doc.fields.clone();
        fields.insert("id".to_string(), Value::String(doc.id.to_string()));

        let record: Self =
            serde_json::from_value(Value::Object(fields)).map_err(|e| SchemaError::Malformed {
                collection: doc.collection,
                id: doc.id.to_string(),
                reason: e.to_string(),
            })?;
        record.validate()?;
        Ok(record)
    }

    /// Field map to write back to the store. The id lives on the document,
    /// not in its body.
    fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("id");
                map
            }
            _ => Fields::new(),
        }
    }

    fn to_document(&self) -> Document {
        Document::new(Self::COLLECTION, self.id().clone(), self.to_fields())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: DocumentId,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn user_id(&self) -> UserId {
        UserId(self.id.0.clone())
    }
}

impl Schema for UserProfile {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: DocumentId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub likes: Vec<UserId>,
    #[serde(default)]
    pub dislikes: Vec<UserId>,
    #[serde(default)]
    pub comments_count: u64,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Schema for Post {
    const COLLECTION: Collection = Collection::Posts;

    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if let Some(both) = self.likes.iter().find(|u| self.dislikes.contains(u)) {
            return Err(SchemaError::Invariant {
                id: self.id.to_string(),
                reason: format!("{both} is in both likes and dislikes"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: DocumentId,
    pub post_id: DocumentId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    pub text: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Schema for Comment {
    const COLLECTION: Collection = Collection::Comments;

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: DocumentId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub text: String,
    /// `None` for the global lobby.
    #[serde(default)]
    pub chat_id: Option<ThreadId>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Schema for ChatMessage {
    const COLLECTION: Collection = Collection::Messages;

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: DocumentId,
    pub user_id: UserId,
    pub status: TransactionStatus,
    /// Public URL of the uploaded payment proof.
    pub proof_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<UserId>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Schema for Transaction {
    const COLLECTION: Collection = Collection::Transactions;

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

/// A document decoded according to the collection it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    User(UserProfile),
    Post(Post),
    Comment(Comment),
    Message(ChatMessage),
    Transaction(Transaction),
}

impl Record {
    pub fn decode(doc: &Document) -> Result<Self, SchemaError> {
        Ok(match doc.collection {
            Collection::Users => Record::User(UserProfile::from_document(doc)?),
            Collection::Posts => Record::Post(Post::from_document(doc)?),
            Collection::Comments => Record::Comment(Comment::from_document(doc)?),
            Collection::Messages => Record::Message(ChatMessage::from_document(doc)?),
            Collection::Transactions => Record::Transaction(Transaction::from_document(doc)?),
        })
    }
}
