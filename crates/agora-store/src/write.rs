//! Write operations accepted by the store.
//!
//! Field updates are applied by the store itself, inside the commit, so
//! concurrent writers never lose each other's set additions, removals or
//! increments.

use agora_shared::document::Fields;
use agora_shared::{Collection, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldUpdate {
    Assign(String, Value),
    Increment(String, i64),
    /// Add to a set-valued field; no-op if already present.
    ArrayUnion(String, Value),
    /// Remove every occurrence from a set-valued field.
    ArrayRemove(String, Value),
}

impl FieldUpdate {
    pub fn field(&self) -> &str {
        match self {
            FieldUpdate::Assign(f, _)
            | FieldUpdate::Increment(f, _)
            | FieldUpdate::ArrayUnion(f, _)
            | FieldUpdate::ArrayRemove(f, _) => f,
        }
    }

    pub fn apply(&self, fields: &mut Fields) -> Result<()> {
        match self {
            FieldUpdate::Assign(field, value) => {
                fields.insert(field.clone(), value.clone());
            }
            FieldUpdate::Increment(field, by) => {
                let current = match fields.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                        StoreError::InvalidOperation(format!("{field} is not an integer"))
                    })?,
                    Some(_) => {
                        return Err(StoreError::InvalidOperation(format!(
                            "cannot increment non-numeric field {field}"
                        )))
                    }
                };
                let next = current.checked_add(*by).ok_or_else(|| {
                    StoreError::InvalidOperation(format!("{field} would overflow"))
                })?;
                fields.insert(field.clone(), Value::from(next));
            }
            FieldUpdate::ArrayUnion(field, value) => {
                let items = array_field(fields, field)?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            FieldUpdate::ArrayRemove(field, value) => {
                let items = array_field(fields, field)?;
                items.retain(|v| v != value);
            }
        }
        Ok(())
    }
}

fn array_field<'a>(fields: &'a mut Fields, field: &str) -> Result<&'a mut Vec<Value>> {
    let slot = fields
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(StoreError::InvalidOperation(format!(
            "{field} is not an array"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteKind {
    /// Replace the whole document, creating it if needed.
    Set(Fields),
    /// Overwrite the given top-level fields, creating the document if needed.
    Merge(Fields),
    /// Apply field updates to an existing document.
    Update(Vec<FieldUpdate>),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Write {
    pub collection: Collection,
    pub id: DocumentId,
    pub kind: WriteKind,
}

impl Write {
    pub fn set(collection: Collection, id: DocumentId, fields: Fields) -> Self {
        Self {
            collection,
            id,
            kind: WriteKind::Set(fields),
        }
    }

    pub fn merge(collection: Collection, id: DocumentId, fields: Fields) -> Self {
        Self {
            collection,
            id,
            kind: WriteKind::Merge(fields),
        }
    }

    pub fn update(collection: Collection, id: DocumentId, updates: Vec<FieldUpdate>) -> Self {
        Self {
            collection,
            id,
            kind: WriteKind::Update(updates),
        }
    }

    pub fn increment(collection: Collection, id: DocumentId, field: &str, by: i64) -> Self {
        Self::update(
            collection,
            id,
            vec![FieldUpdate::Increment(field.to_string(), by)],
        )
    }

    pub fn delete(collection: Collection, id: DocumentId) -> Self {
        Self {
            collection,
            id,
            kind: WriteKind::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn increment_starts_from_zero() {
        let mut fields = Fields::new();
        FieldUpdate::Increment("commentsCount".into(), 1)
            .apply(&mut fields)
            .unwrap();
        FieldUpdate::Increment("commentsCount".into(), 2)
            .apply(&mut fields)
            .unwrap();
        assert_eq!(fields["commentsCount"], json!(3));
    }

    #[test]
    fn increment_rejects_strings() {
        let mut fields = Fields::new();
        fields.insert("n".into(), json!("three"));
        assert!(FieldUpdate::Increment("n".into(), 1)
            .apply(&mut fields)
            .is_err());
    }

    #[test]
    fn array_ops_have_set_semantics() {
        let mut fields = Fields::new();
        let union = FieldUpdate::ArrayUnion("likes".into(), json!("u1"));
        union.apply(&mut fields).unwrap();
        union.apply(&mut fields).unwrap();
        assert_eq!(fields["likes"], json!(["u1"]));

        let remove = FieldUpdate::ArrayRemove("likes".into(), json!("u1"));
        remove.apply(&mut fields).unwrap();
        remove.apply(&mut fields).unwrap();
        assert_eq!(fields["likes"], json!([]));
    }

    #[test]
    fn array_remove_on_missing_field_creates_empty_set() {
        let mut fields = Fields::new();
        FieldUpdate::ArrayRemove("dislikes".into(), json!("u1"))
            .apply(&mut fields)
            .unwrap();
        assert_eq!(fields["dislikes"], json!([]));
    }

    #[test]
    fn array_ops_reject_scalars() {
        let mut fields = Fields::new();
        fields.insert("likes".into(), json!(4));
        assert!(FieldUpdate::ArrayUnion("likes".into(), json!("u1"))
            .apply(&mut fields)
            .is_err());
    }
}
