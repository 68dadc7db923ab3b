//! Live-query description: collection, filter predicate, sort key, bound.

use std::cmp::Ordering;

use agora_shared::document::compare_values;
use agora_shared::{Collection, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    All,
    Eq(String, Value),
    /// Matches documents where the field is missing or null.
    IsNull(String),
    ArrayContains(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn is_null(field: &str) -> Self {
        Filter::IsNull(field.to_string())
    }

    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Filter::ArrayContains(field.to_string(), value.into())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::IsNull(field) => matches!(doc.get(field), None | Some(Value::Null)),
            Filter::ArrayContains(field, value) => match doc.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Filter::And(all) => all.iter().all(|f| f.matches(doc)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }

    /// Ties are always broken by ascending document id so the order is
    /// deterministic regardless of direction.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = compare_values(a.get(&self.field), b.get(&self.field));
        let by_field = match self.direction {
            Direction::Asc => by_field,
            Direction::Desc => by_field.reverse(),
        };
        by_field.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: Collection,
    pub filter: Filter,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            filter: Filter::All,
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = match self.filter {
            Filter::All => filter,
            Filter::And(mut all) => {
                all.push(filter);
                Filter::And(all)
            }
            existing => Filter::And(vec![existing, filter]),
        };
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sort documents into this query's order. Without an explicit sort key
    /// documents are ordered by id.
    pub fn sort(&self, docs: &mut [Document]) {
        match &self.order {
            Some(order) => docs.sort_by(|a, b| order.compare(a, b)),
            None => docs.sort_by(|a, b| a.id.cmp(&b.id)),
        }
    }

    /// Evaluate the query against every document of its collection.
    pub fn evaluate(&self, candidates: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = candidates
            .into_iter()
            .filter(|d| d.collection == self.collection && self.filter.matches(d))
            .collect();
        self.sort(&mut docs);
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}
