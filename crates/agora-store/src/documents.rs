use agora_shared::document::{Fields, Revision};
use agora_shared::{Collection, Document, DocumentId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::query::{Filter, Query};
use crate::write::{Write, WriteKind};

impl Database {
    pub fn get_document(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<Document>> {
        let row = self
            .conn()
            .query_row(
                "SELECT body, revision FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((body, revision)) => Ok(Some(Document {
                collection,
                id: id.clone(),
                revision: revision as Revision,
                fields: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    pub fn list_collection(&self, collection: Collection) -> Result<Vec<Document>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, body, revision FROM documents WHERE collection = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, body, revision) = row?;
            docs.push(Document {
                collection,
                id: DocumentId(id),
                revision: revision as Revision,
                fields: serde_json::from_str(&body)?,
            });
        }
        Ok(docs)
    }

    pub fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(query.evaluate(self.list_collection(query.collection)?))
    }

    pub fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        Ok(self
            .list_collection(collection)?
            .iter()
            .filter(|d| filter.matches(d))
            .count() as u64)
    }

    pub fn current_revision(&self) -> Result<Revision> {
        let value: i64 = self.conn().query_row(
            "SELECT value FROM store_meta WHERE key = 'revision'",
            [],
            |row| row.get(0),
        )?;
        Ok(value as Revision)
    }

    /// Apply a batch of writes atomically and return the new store revision.
    ///
    /// Either every write lands or none does; the transaction rolls back on
    /// drop if any write fails.
    pub fn commit(&mut self, writes: &[Write]) -> Result<Revision> {
        let tx = self.conn_mut().transaction()?;

        let previous: i64 = tx.query_row(
            "SELECT value FROM store_meta WHERE key = 'revision'",
            [],
            |row| row.get(0),
        )?;
        let revision = previous + 1;
        let now = Utc::now().to_rfc3339();

        for write in writes {
            apply_write(&tx, write, revision, &now)?;
        }

        tx.execute(
            "UPDATE store_meta SET value = ?1 WHERE key = 'revision'",
            params![revision],
        )?;
        tx.commit()?;

        Ok(revision as Revision)
    }
}

fn apply_write(conn: &Connection, write: &Write, revision: i64, now: &str) -> Result<()> {
    let collection = write.collection;
    let id = write.id.as_str();

    match &write.kind {
        WriteKind::Set(fields) => store_body(conn, collection, id, fields, revision, now),
        WriteKind::Merge(patch) => {
            let mut fields = load_body(conn, collection, id)?.unwrap_or_default();
            for (key, value) in patch {
                fields.insert(key.clone(), value.clone());
            }
            store_body(conn, collection, id, &fields, revision, now)
        }
        WriteKind::Update(updates) => {
            let mut fields =
                load_body(conn, collection, id)?.ok_or_else(|| StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            for update in updates {
                update.apply(&mut fields)?;
            }
            store_body(conn, collection, id, &fields, revision, now)
        }
        WriteKind::Delete => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )?;
            Ok(())
        }
    }
}

fn load_body(conn: &Connection, collection: Collection, id: &str) -> Result<Option<Fields>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

fn store_body(
    conn: &Connection,
    collection: Collection,
    id: &str,
    fields: &Fields,
    revision: i64,
    now: &str,
) -> Result<()> {
    let body = serde_json::to_string(fields)?;
    conn.execute(
        "INSERT INTO documents (collection, id, body, revision, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (collection, id)
         DO UPDATE SET body = excluded.body,
                       revision = excluded.revision,
                       updated_at = excluded.updated_at",
        params![collection.as_str(), id, body, revision, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::FieldUpdate;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> Fields {
        match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn set_then_get() {
        let mut db = Database::open_in_memory().unwrap();
        let id = DocumentId::from("p1");
        let rev = db
            .commit(&[Write::set(
                Collection::Posts,
                id.clone(),
                fields(json!({ "content": "hello" })),
            )])
            .unwrap();

        let doc = db.get_document(Collection::Posts, &id).unwrap().unwrap();
        assert_eq!(doc.get_str("content"), Some("hello"));
        assert_eq!(doc.revision, rev);
        assert_eq!(db.current_revision().unwrap(), rev);
    }

    #[test]
    fn merge_keeps_other_fields() {
        let mut db = Database::open_in_memory().unwrap();
        let id = DocumentId::from("u1");
        db.commit(&[Write::set(
            Collection::Users,
            id.clone(),
            fields(json!({ "email": "a@b.c", "role": "user" })),
        )])
        .unwrap();
        db.commit(&[Write::merge(
            Collection::Users,
            id.clone(),
            fields(json!({ "role": "pro" })),
        )])
        .unwrap();

        let doc = db.get_document(Collection::Users, &id).unwrap().unwrap();
        assert_eq!(doc.get_str("email"), Some("a@b.c"));
        assert_eq!(doc.get_str("role"), Some("pro"));
    }

    #[test]
    fn update_on_missing_document_fails() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db
            .commit(&[Write::increment(
                Collection::Posts,
                DocumentId::from("nope"),
                "commentsCount",
                1,
            )])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn failed_batch_rolls_back_every_write() {
        let mut db = Database::open_in_memory().unwrap();
        let before = db.current_revision().unwrap();
        let result = db.commit(&[
            Write::set(
                Collection::Comments,
                DocumentId::from("c1"),
                fields(json!({ "postId": "missing" })),
            ),
            Write::increment(
                Collection::Posts,
                DocumentId::from("missing"),
                "commentsCount",
                1,
            ),
        ]);
        assert!(result.is_err());
        assert!(db
            .get_document(Collection::Comments, &DocumentId::from("c1"))
            .unwrap()
            .is_none());
        assert_eq!(db.current_revision().unwrap(), before);
    }

    #[test]
    fn field_updates_apply_in_order() {
        let mut db = Database::open_in_memory().unwrap();
        let id = DocumentId::from("p1");
        db.commit(&[Write::set(
            Collection::Posts,
            id.clone(),
            fields(json!({ "likes": ["u1"], "dislikes": [] })),
        )])
        .unwrap();
        db.commit(&[Write::update(
            Collection::Posts,
            id.clone(),
            vec![
                FieldUpdate::ArrayUnion("dislikes".into(), json!("u1")),
                FieldUpdate::ArrayRemove("likes".into(), json!("u1")),
            ],
        )])
        .unwrap();

        let doc = db.get_document(Collection::Posts, &id).unwrap().unwrap();
        assert!(doc.members("likes").is_empty());
        assert_eq!(doc.members("dislikes"), vec!["u1"]);
    }

    #[test]
    fn delete_and_count() {
        let mut db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            let status = if id == "a" { "approved" } else { "pending" };
            db.commit(&[Write::set(
                Collection::Transactions,
                DocumentId::from(id),
                fields(json!({ "status": status })),
            )])
            .unwrap();
        }
        let pending = Filter::eq("status", "pending");
        assert_eq!(db.count(Collection::Transactions, &pending).unwrap(), 2);

        db.commit(&[Write::delete(Collection::Transactions, DocumentId::from("b"))])
            .unwrap();
        assert_eq!(db.count(Collection::Transactions, &pending).unwrap(), 1);
        assert_eq!(db.count(Collection::Transactions, &Filter::All).unwrap(), 2);
    }
}
