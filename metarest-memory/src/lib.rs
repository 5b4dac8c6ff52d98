//! In-memory [`Storage`] backend for metarest.
//!
//! Keeps every table as an insert-ordered `Vec<Record>` behind an async
//! `RwLock`. Intended for tests, prototyping and as the reference
//! implementation of the backend contract; it evaluates predicates
//! in-process via [`Predicate::eval`] instead of translating them.

use async_trait::async_trait;
use metarest::filter::{self, Op, Predicate};
use metarest::storage::{Record, Selection, SortDirection, Storage, StorageError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct MemoryBackend {
    key_field: String,
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            key_field: "id".to_string(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different primary-key column than `"id"`.
    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// Seed a table at construction time, before the backend is shared.
    pub fn with_table<I>(mut self, table: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        self.tables
            .get_mut()
            .entry(table.into())
            .or_default()
            .extend(records);
        self
    }

    /// Seed a table on a backend already behind a handle.
    pub async fn insert_all<I>(&self, table: &str, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().extend(records);
    }

    pub async fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(Vec::len).unwrap_or(0)
    }

    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }

    fn key_matches(&self, record: &Record, id: &Value) -> bool {
        let stored = record.get(&self.key_field).unwrap_or(&Value::Null);
        filter::value_matches(stored, Op::Eq, id)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryBackend {
    async fn get_by_key(&self, table: &str, id: &Value) -> Result<Option<Record>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|records| records.iter().find(|r| self.key_matches(r, id)))
            .cloned())
    }

    async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Option<Record>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|records| {
                records.iter().find(|r| {
                    let stored = r.get(index).unwrap_or(&Value::Null);
                    filter::value_matches(stored, Op::Eq, value)
                })
            })
            .cloned())
    }

    async fn select(
        &self,
        table: &str,
        selection: &Selection,
    ) -> Result<Vec<Record>, StorageError> {
        let tables = self.tables.read().await;
        let mut matched: Vec<Record> = tables
            .get(table)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| selection.predicate().eval(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, direction)) = selection.order() {
            matched.sort_by(|a, b| {
                let left = a.get(field).unwrap_or(&Value::Null);
                let right = b.get(field).unwrap_or(&Value::Null);
                let ordering = filter::compare(left, right).unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let mut page: Vec<Record> = matched
            .into_iter()
            .skip(selection.offset() as usize)
            .collect();
        if let Some(limit) = selection.limit_value() {
            page.truncate(limit as usize);
        }
        Ok(page)
    }

    async fn count(&self, table: &str, predicate: &Predicate) -> Result<u64, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|records| records.iter().filter(|r| predicate.eval(r)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, table: &str, mut record: Record) -> Result<Value, StorageError> {
        let id = match record.get(&self.key_field) {
            Some(Value::Null) | None => {
                let generated = Value::String(Uuid::new_v4().to_string());
                record.insert(self.key_field.clone(), generated.clone());
                generated
            }
            Some(existing) => existing.clone(),
        };
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(record);
        Ok(id)
    }

    async fn update(
        &self,
        table: &str,
        id: &Value,
        patch: Record,
    ) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let Some(records) = tables.get_mut(table) else {
            return Ok(false);
        };
        let key_field = self.key_field.clone();
        let Some(record) = records.iter_mut().find(|r| {
            let stored = r.get(&key_field).unwrap_or(&Value::Null);
            filter::value_matches(stored, Op::Eq, id)
        }) else {
            return Ok(false);
        };
        for (key, value) in patch {
            record.insert(key, value);
        }
        Ok(true)
    }

    async fn delete(&self, table: &str, id: &Value) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let Some(records) = tables.get_mut(table) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| !self.key_matches(r, id));
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn people() -> MemoryBackend {
        MemoryBackend::new().with_table(
            "people",
            vec![
                record(&[("id", json!("1")), ("name", json!("ada")), ("age", json!(36))]),
                record(&[("id", json!("2")), ("name", json!("bob")), ("age", json!(20))]),
                record(&[("id", json!("3")), ("name", json!("cyd")), ("age", json!(52))]),
            ],
        )
    }

    #[tokio::test]
    async fn get_by_key_and_index() {
        let backend = people();
        let ada = backend
            .get_by_key("people", &json!("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ada["name"], json!("ada"));

        let bob = backend
            .get_by_index("people", "name", &json!("bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob["id"], json!("2"));

        assert!(backend
            .get_by_key("people", &json!("99"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn select_filters_sorts_and_paginates() {
        let backend = people();
        let sel = Selection::new()
            .filter(Predicate::Cmp {
                field: "age".into(),
                op: Op::Gt,
                value: json!(19),
            })
            .order_by("age", SortDirection::Desc)
            .skip(1)
            .limit(1);
        let page = backend.select("people", &sel).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["name"], json!("ada"));

        let total = backend
            .count("people", sel.predicate())
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn insert_generates_an_id_when_absent() {
        let backend = MemoryBackend::new();
        let id = backend
            .insert("notes", record(&[("title", json!("hello"))]))
            .await
            .unwrap();
        assert!(id.as_str().is_some());
        let stored = backend.get_by_key("notes", &id).await.unwrap().unwrap();
        assert_eq!(stored["title"], json!("hello"));
    }

    #[tokio::test]
    async fn update_merges_and_reports_absence() {
        let backend = people();
        let updated = backend
            .update("people", &json!("2"), record(&[("age", json!(21))]))
            .await
            .unwrap();
        assert!(updated);
        let bob = backend
            .get_by_key("people", &json!("2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob["age"], json!(21));
        assert_eq!(bob["name"], json!("bob"));

        let missing = backend
            .update("people", &json!("99"), Record::new())
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn delete_is_per_record() {
        let backend = people();
        assert!(backend.delete("people", &json!("1")).await.unwrap());
        assert!(!backend.delete("people", &json!("1")).await.unwrap());
        assert_eq!(backend.len("people").await, 2);
    }

    #[tokio::test]
    async fn unknown_table_degrades_to_empty() {
        let backend = MemoryBackend::new();
        assert!(backend
            .get_by_key("ghost", &json!("1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            backend
                .select("ghost", &Selection::new())
                .await
                .unwrap()
                .len(),
            0
        );
        assert_eq!(backend.count("ghost", &Predicate::True).await.unwrap(), 0);
        assert!(!backend.delete("ghost", &json!("1")).await.unwrap());
    }
}
