//! Nimbus Collection - Document CRUD Surface
//!
//! A handle to one named collection. Reads load rows through the storage
//! adapter and decode the JSON payloads; writes serialize documents back
//! and go through single statements or batched transactions. Multi-
//! document writes (`insert_many`, `update_many`, `delete_many`) are
//! atomic and durable together.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use crate::id::ObjectId;
use crate::pipeline::{DocumentSource, Pipeline};
use crate::query::Query;
use crate::types::Document;
use chrono::Utc;
use nimbus_common::{NimbusError, Result};
use nimbus_storage::{Batch, SqlValue, StorageAdapter, TABLE_DOCUMENTS};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Collection
// =============================================================================

/// A named bag of schemaless documents.
///
/// Handles are cheap to create and hold only the collection name and a
/// shared reference to the storage adapter; the owning [`crate::Store`]
/// outlives every handle it gives out.
pub struct Collection {
    name: String,
    storage: Arc<dyn StorageAdapter>,
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }

    /// Get the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------------------------------------------------------------
    // Write Operations
    // -------------------------------------------------------------------------

    /// Insert a document, assigning an `_id` when absent. Returns the id.
    pub fn insert(&self, mut doc: Document) -> Result<String> {
        let id = ensure_id(&mut doc);
        let data = encode(&doc)?;
        let now = now_ms();
        self.storage
            .insert(TABLE_DOCUMENTS, &self.row_values(&id, data, now))?;
        Ok(id)
    }

    /// Insert several documents in one transaction. Returns the ids in
    /// input order.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let now = now_ms();
        let mut batch = Batch::new();
        let mut ids = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = ensure_id(&mut doc);
            let data = encode(&doc)?;
            batch.insert(TABLE_DOCUMENTS, self.row_values(&id, data, now));
            ids.push(id);
        }
        debug!(collection = %self.name, count = ids.len(), "batched insert");
        self.storage.apply_batch(batch)?;
        Ok(ids)
    }

    /// Shallow-merge `patch` into the document with the given id: top-
    /// level keys overwrite, `_id` is preserved, `updated_at` advances.
    /// Returns whether the document existed.
    pub fn update_by_id(&self, id: &str, patch: &JsonValue) -> Result<bool> {
        let patch = parse_patch(patch)?;
        let Some(mut doc) = self.find_by_id(id)? else {
            return Ok(false);
        };

        doc.merge(&patch);
        doc.set_id(id);
        let data = encode(&doc)?;
        self.storage.update(
            TABLE_DOCUMENTS,
            &[
                ("data".to_string(), SqlValue::from(data)),
                ("updated_at".to_string(), SqlValue::Integer(now_ms())),
            ],
            "id = ? AND collection_name = ?",
            &[SqlValue::from(id), SqlValue::from(self.name.as_str())],
        )?;
        Ok(true)
    }

    /// Apply the same shallow merge to every document matching the query,
    /// in one transaction. Returns the number matched.
    pub fn update_many(&self, query: &JsonValue, patch: &JsonValue) -> Result<usize> {
        let patch = parse_patch(patch)?;
        let matched = self.find(query)?;
        let now = now_ms();

        let mut batch = Batch::new();
        let mut count = 0;
        for mut doc in matched {
            let Some(id) = doc.id().map(str::to_string) else {
                continue;
            };
            doc.merge(&patch);
            doc.set_id(id.as_str());
            let data = encode(&doc)?;
            batch.update(
                TABLE_DOCUMENTS,
                vec![
                    ("data".to_string(), SqlValue::from(data)),
                    ("updated_at".to_string(), SqlValue::Integer(now)),
                ],
                "id = ? AND collection_name = ?",
                vec![SqlValue::from(id), SqlValue::from(self.name.as_str())],
            );
            count += 1;
        }
        debug!(collection = %self.name, count, "batched update");
        self.storage.apply_batch(batch)?;
        Ok(count)
    }

    /// Delete one document by id. Returns whether a row went away.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let removed = self.storage.delete(
            TABLE_DOCUMENTS,
            "id = ? AND collection_name = ?",
            &[SqlValue::from(id), SqlValue::from(self.name.as_str())],
        )?;
        Ok(removed > 0)
    }

    /// Delete every document matching the query, in one transaction.
    /// Returns the count.
    pub fn delete_many(&self, query: &JsonValue) -> Result<usize> {
        let matched = self.find(query)?;
        let mut batch = Batch::new();
        let mut count = 0;
        for doc in &matched {
            let Some(id) = doc.id() else {
                continue;
            };
            batch.delete(
                TABLE_DOCUMENTS,
                "id = ? AND collection_name = ?",
                vec![SqlValue::from(id), SqlValue::from(self.name.as_str())],
            );
            count += 1;
        }
        debug!(collection = %self.name, count, "batched delete");
        self.storage.apply_batch(batch)?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Read Operations
    // -------------------------------------------------------------------------

    /// Find every document matching the query, in id order.
    pub fn find(&self, query: &JsonValue) -> Result<Vec<Document>> {
        let query = Query::parse(query)?;
        Ok(self
            .load(&self.name)?
            .into_iter()
            .filter(|d| query.matches(d))
            .collect())
    }

    /// First document matching the query, if any.
    pub fn find_one(&self, query: &JsonValue) -> Result<Option<Document>> {
        let mut found = self.find(query)?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    /// Direct primary-key lookup within this collection.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let rows = self.storage.query(
            "SELECT data FROM documents WHERE collection_name = ? AND id = ?",
            &[SqlValue::from(self.name.as_str()), SqlValue::from(id)],
        )?;
        match rows.first() {
            Some(row) => Ok(Some(decode(data_column(row)?)?)),
            None => Ok(None),
        }
    }

    /// Number of documents in the collection.
    pub fn count(&self) -> Result<usize> {
        let rows = self.storage.raw_query(
            "SELECT COUNT(*) AS count FROM documents WHERE collection_name = ?",
            &[SqlValue::from(self.name.as_str())],
        )?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);
        Ok(count as usize)
    }

    /// Number of documents matching the query. Empty queries take the
    /// `COUNT(*)` fast path.
    pub fn count_matching(&self, query: &JsonValue) -> Result<usize> {
        let query = Query::parse(query)?;
        if query.is_empty() {
            return self.count();
        }
        Ok(self
            .load(&self.name)?
            .iter()
            .filter(|d| query.matches(d))
            .count())
    }

    /// Run an aggregation pipeline over the whole collection.
    pub fn aggregate(&self, stages: &JsonValue) -> Result<Vec<Document>> {
        let pipeline = Pipeline::parse(stages)?;
        let docs = self.load(&self.name)?;
        pipeline.run(docs, self)
    }

    // -------------------------------------------------------------------------
    // Row Mapping
    // -------------------------------------------------------------------------

    fn load(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = self.storage.query(
            "SELECT data FROM documents WHERE collection_name = ? ORDER BY id",
            &[SqlValue::from(collection)],
        )?;
        rows.iter().map(|row| decode(data_column(row)?)).collect()
    }

    fn row_values(&self, id: &str, data: String, now: i64) -> Vec<(String, SqlValue)> {
        vec![
            ("id".to_string(), SqlValue::from(id)),
            (
                "collection_name".to_string(),
                SqlValue::from(self.name.as_str()),
            ),
            ("data".to_string(), SqlValue::from(data)),
            ("created_at".to_string(), SqlValue::Integer(now)),
            ("updated_at".to_string(), SqlValue::Integer(now)),
        ]
    }
}

impl DocumentSource for Collection {
    fn load_collection(&self, name: &str) -> Result<Vec<Document>> {
        self.load(name)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ensure_id(doc: &mut Document) -> String {
    match doc.id() {
        Some(id) => id.to_string(),
        None => {
            let id = ObjectId::new().into_string();
            doc.set_id(id.as_str());
            id
        }
    }
}

fn encode(doc: &Document) -> Result<String> {
    serde_json::to_string(doc).map_err(|e| NimbusError::Serialization(e.to_string()))
}

fn decode(text: &str) -> Result<Document> {
    serde_json::from_str(text).map_err(|e| NimbusError::Serialization(e.to_string()))
}

fn data_column(row: &nimbus_storage::SqlRow) -> Result<&str> {
    row.get("data")
        .and_then(SqlValue::as_str)
        .ok_or_else(|| NimbusError::Storage("documents row missing data column".to_string()))
}

fn parse_patch(patch: &JsonValue) -> Result<Document> {
    Document::from_json(patch.clone())
        .ok_or_else(|| NimbusError::Query("update patch must be an object".to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::Value;
    use serde_json::json;

    fn seeded() -> (Store, Collection) {
        let store = Store::in_memory().unwrap();
        let people = store.collection("people").unwrap();
        people
            .insert_many(
                [
                    json!({"_id": "a", "name": "Alice", "age": 25, "city": "New York"}),
                    json!({"_id": "b", "name": "Bob", "age": 30, "city": "LA"}),
                    json!({"_id": "c", "name": "Charlie", "age": 35, "city": "New York"}),
                    json!({"_id": "d", "name": "Diana", "age": 28, "city": "Chicago"}),
                ]
                .into_iter()
                .map(|j| Document::from_json(j).unwrap())
                .collect(),
            )
            .unwrap();
        (store, people)
    }

    fn names(docs: &[Document]) -> Vec<&str> {
        docs.iter()
            .map(|d| d.get("name").and_then(Value::as_str).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_assigns_valid_id_and_round_trips() {
        let store = Store::in_memory().unwrap();
        let col = store.collection("users").unwrap();

        let mut doc = Document::new();
        doc.set("name", "Alice");
        doc.set("age", 25i64);

        let id = col.insert(doc).unwrap();
        assert!(ObjectId::is_valid(&id));

        let found = col.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.id(), Some(id.as_str()));
        assert_eq!(found.get("name"), Some(&Value::from("Alice")));
        assert_eq!(found.get("age"), Some(&Value::Int(25)));
    }

    #[test]
    fn test_insert_keeps_caller_id() {
        let store = Store::in_memory().unwrap();
        let col = store.collection("users").unwrap();
        let doc = Document::from_json(json!({"_id": "custom", "x": 1})).unwrap();
        assert_eq!(col.insert(doc).unwrap(), "custom");
    }

    #[test]
    fn test_duplicate_id_is_a_constraint_error() {
        let store = Store::in_memory().unwrap();
        let col = store.collection("users").unwrap();
        col.insert(Document::from_json(json!({"_id": "dup"})).unwrap())
            .unwrap();
        let err = col
            .insert(Document::from_json(json!({"_id": "dup"})).unwrap())
            .unwrap_err();
        assert!(err.is_constraint_error());
    }

    #[test]
    fn test_find_by_comparison_in_id_order() {
        let (_store, people) = seeded();
        let found = people.find(&json!({"age": {"$gt": 26}})).unwrap();
        assert_eq!(names(&found), vec!["Bob", "Charlie", "Diana"]);
    }

    #[test]
    fn test_find_empty_query_returns_all_and_matches_count() {
        let (_store, people) = seeded();
        let all = people.find(&json!({})).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(people.count().unwrap(), all.len());
        assert_eq!(people.count_matching(&json!({})).unwrap(), all.len());
    }

    #[test]
    fn test_find_results_are_a_subset_satisfying_the_predicate() {
        let (_store, people) = seeded();
        let query = json!({"city": "New York"});
        let parsed = Query::parse(&query).unwrap();
        let found = people.find(&query).unwrap();
        let all = people.find(&json!({})).unwrap();
        assert!(found.iter().all(|d| parsed.matches(d)));
        assert!(found.iter().all(|d| all.contains(d)));
    }

    #[test]
    fn test_find_one() {
        let (_store, people) = seeded();
        let first = people.find_one(&json!({"city": "New York"})).unwrap();
        assert_eq!(first.unwrap().get("name"), Some(&Value::from("Alice")));
        assert!(people.find_one(&json!({"city": "Boston"})).unwrap().is_none());
    }

    #[test]
    fn test_update_by_id_merges_and_preserves_id() {
        let (_store, people) = seeded();
        let updated = people
            .update_by_id("a", &json!({"age": 26, "_id": "hijack"}))
            .unwrap();
        assert!(updated);

        let alice = people.find_by_id("a").unwrap().unwrap();
        assert_eq!(alice.get("age"), Some(&Value::Int(26)));
        assert_eq!(alice.id(), Some("a"));
        assert_eq!(alice.get("name"), Some(&Value::from("Alice")));
        assert!(people.find_by_id("hijack").unwrap().is_none());

        assert!(!people.update_by_id("missing", &json!({"x": 1})).unwrap());
    }

    #[test]
    fn test_update_many_returns_matched_count() {
        let (_store, people) = seeded();
        let count = people
            .update_many(&json!({"city": "New York"}), &json!({"status": "NY Resident"}))
            .unwrap();
        assert_eq!(count, 2);

        let tagged = people.find(&json!({"status": {"$exists": true}})).unwrap();
        assert_eq!(names(&tagged), vec!["Alice", "Charlie"]);
        // Untouched documents keep matching their old predicates.
        assert_eq!(people.count_matching(&json!({"city": "LA"})).unwrap(), 1);
    }

    #[test]
    fn test_or_query_deduplicates_documents() {
        let (_store, people) = seeded();
        people
            .update_many(&json!({"city": "New York"}), &json!({"status": "NY Resident"}))
            .unwrap();

        let found = people
            .find(&json!({"$or": [{"age": {"$lt": 28}}, {"status": {"$exists": true}}]}))
            .unwrap();
        assert_eq!(names(&found), vec!["Alice", "Charlie"]);
    }

    #[test]
    fn test_in_against_array_field() {
        let store = Store::in_memory().unwrap();
        let col = store.collection("profiles").unwrap();
        col.insert_many(vec![
            Document::from_json(json!({"_id": "p1", "tags": ["developer", "flutter"]})).unwrap(),
            Document::from_json(json!({"_id": "p2", "tags": ["developer", "flutter"]})).unwrap(),
        ])
        .unwrap();

        let found = col.find(&json!({"tags": {"$in": ["developer"]}})).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_delete_by_id() {
        let (_store, people) = seeded();
        assert!(people.delete_by_id("a").unwrap());
        assert!(!people.delete_by_id("a").unwrap());
        assert!(people.find_by_id("a").unwrap().is_none());
        assert_eq!(people.count().unwrap(), 3);
    }

    #[test]
    fn test_delete_many_reduces_count_by_returned_number() {
        let (_store, people) = seeded();
        let before = people.count().unwrap();
        let removed = people.delete_many(&json!({"city": "New York"})).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(people.count().unwrap(), before - removed);
        assert!(people.find(&json!({"city": "New York"})).unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_group_by_city() {
        let (_store, people) = seeded();
        let groups = people
            .aggregate(&json!([{"$group": {"_id": "$city", "count": {"$sum": 1}}}]))
            .unwrap();
        assert_eq!(groups.len(), 3);
        let count_for = |city: &str| {
            groups
                .iter()
                .find(|g| g.get("_id") == Some(&Value::from(city)))
                .and_then(|g| g.get("count"))
                .cloned()
        };
        assert_eq!(count_for("New York"), Some(Value::Int(2)));
        assert_eq!(count_for("LA"), Some(Value::Int(1)));
        assert_eq!(count_for("Chicago"), Some(Value::Int(1)));
    }

    #[test]
    fn test_aggregate_sort_limit_project() {
        let (_store, people) = seeded();
        let out = people
            .aggregate(&json!([
                {"$sort": {"_id": 1}},
                {"$limit": 10},
                {"$project": {"name": 1, "age": 1, "city": 1, "_id": 0}}
            ]))
            .unwrap();
        assert_eq!(out.len(), 4);
        for doc in &out {
            assert_eq!(doc.len(), 3);
            assert!(doc.contains("name") && doc.contains("age") && doc.contains("city"));
        }
    }

    #[test]
    fn test_aggregate_sort_by_id_then_limit_takes_smallest_ids() {
        let (_store, people) = seeded();
        let out = people
            .aggregate(&json!([{"$sort": {"_id": 1}}, {"$limit": 2}]))
            .unwrap();
        let ids: Vec<_> = out.iter().map(|d| d.id().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_aggregate_match_count_equals_count_matching() {
        let (_store, people) = seeded();
        let query = json!({"age": {"$gte": 28}});
        let out = people
            .aggregate(&json!([{"$match": query.clone()}, {"$count": "n"}]))
            .unwrap();
        let counted = out[0].get("n").and_then(Value::as_i64).unwrap() as usize;
        assert_eq!(counted, people.count_matching(&query).unwrap());
    }

    #[test]
    fn test_aggregate_lookup_across_collections() {
        let store = Store::in_memory().unwrap();
        let users = store.collection("users").unwrap();
        let orders = store.collection("orders").unwrap();

        users
            .insert(Document::from_json(json!({"_id": "u1", "name": "alice"})).unwrap())
            .unwrap();
        orders
            .insert_many(vec![
                Document::from_json(json!({"_id": "o1", "user": "alice", "total": 10})).unwrap(),
                Document::from_json(json!({"_id": "o2", "user": "bob", "total": 5})).unwrap(),
            ])
            .unwrap();

        let out = users
            .aggregate(&json!([{"$lookup": {
                "from": "orders",
                "localField": "name",
                "foreignField": "user",
                "as": "orders"
            }}]))
            .unwrap();
        let attached = out[0].get("orders").and_then(Value::as_array).unwrap();
        assert_eq!(attached.len(), 1);
    }

    #[test]
    fn test_malformed_query_is_rejected() {
        let (_store, people) = seeded();
        assert!(people.find(&json!({"$bogus": 1})).is_err());
        assert!(people.update_by_id("a", &json!("not an object")).is_err());
        assert!(people.aggregate(&json!([{"$nope": {}}])).is_err());
    }
}
