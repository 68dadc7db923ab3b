//! The untyped record exchanged with the collection store.
//!
//! A [`Document`] is an opaque field map plus the identity and revision the
//! store assigns to it. Views never read fields directly; they decode a
//! document into its collection's schema (see [`crate::schema`]) first.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Collection, DocumentId};

pub type Fields = Map<String, Value>;

/// Store-wide commit counter. Every document touched by a commit carries the
/// revision of that commit.
pub type Revision = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub collection: Collection,
    pub id: DocumentId,
    #[serde(default)]
    pub revision: Revision,
    pub fields: Fields,
}

impl Document {
    pub fn new(collection: Collection, id: DocumentId, fields: Fields) -> Self {
        Self {
            collection,
            id,
            revision: 0,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Members of a set-valued (array of strings) field. Missing or
    /// non-array fields read as empty.
    pub fn members(&self, field: &str) -> Vec<&str> {
        match self.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_member(&self, field: &str, member: &str) -> bool {
        match self.get(field) {
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(member)),
            _ => false,
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over field values used for sorting query results.
///
/// A missing field sorts before everything, then
/// null < bool < number < string < array < object.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        let fields = match fields {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Document::new(Collection::Posts, DocumentId::from("p1"), fields)
    }

    #[test]
    fn members_ignore_non_string_entries() {
        let d = doc(json!({ "likes": ["u1", 7, "u2"] }));
        assert_eq!(d.members("likes"), vec!["u1", "u2"]);
        assert!(d.has_member("likes", "u2"));
        assert!(!d.has_member("likes", "u3"));
        assert!(d.members("dislikes").is_empty());
    }

    #[test]
    fn missing_sorts_first() {
        let v = json!(1);
        assert_eq!(compare_values(None, Some(&v)), Ordering::Less);
        assert_eq!(compare_values(Some(&Value::Null), None), Ordering::Greater);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(2.5)), Some(&json!(2))),
            Ordering::Greater
        );
    }

    #[test]
    fn mixed_types_follow_rank() {
        assert_eq!(
            compare_values(Some(&json!("a")), Some(&json!(99))),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(Some(&json!(false)), Some(&json!(0))),
            Ordering::Less
        );
    }
}
