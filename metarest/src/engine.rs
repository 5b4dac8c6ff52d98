use crate::error::ApiError;
use crate::filter;
use crate::meta::{ControllerMeta, ForeignRef, Operation};
use crate::params::ListParams;
use crate::storage::{Record, Selection, Storage};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a multi-id delete: each identifier is handled independently,
/// with no cross-record atomicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
    pub failed: u64,
}

/// The query engine: orchestrates Get/List/Delete against the storage
/// backend and resolves foreign references.
///
/// Wraps the backend handle the way a repository wraps a pool; cheap to
/// clone and share across request handlers.
pub struct Engine<S> {
    storage: Arc<S>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: Storage> Engine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Get the underlying backend handle.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Fetch one record by primary key, or by a secondary index when given.
    /// Absence is a normal outcome, not an error.
    pub async fn get(
        &self,
        meta: &ControllerMeta,
        id: &Value,
        index: Option<&str>,
    ) -> Result<Option<Record>, ApiError> {
        let record = match index {
            Some(index) => self.storage.get_by_index(meta.table(), index, id).await?,
            None => self.storage.get_by_key(meta.table(), id).await?,
        };
        Ok(record)
    }

    /// Run a listing query: compiled filters, gated sort, clamped
    /// pagination. The page fetch and the total count run concurrently so
    /// the added latency is bounded by the slower of the two.
    pub async fn list(
        &self,
        meta: &ControllerMeta,
        params: &ListParams,
    ) -> Result<(Vec<Record>, u64), ApiError> {
        let predicate = filter::compile(meta, &params.filters);

        let mut selection = Selection::new()
            .filter(predicate.clone())
            .skip(params.offset)
            .limit(params.effective_limit());
        if let Some(key) = &params.sort_key {
            let sortable = meta.field(key).map(|f| f.sortable()).unwrap_or(false);
            if sortable {
                selection = selection.order_by(key, params.sort_direction);
            } else {
                // Unknown or unsortable keys degrade gracefully.
                tracing::debug!(field = %key, "ignoring sort on non-sortable field");
            }
        }

        let table = meta.table();
        let (page, total) = tokio::join!(
            self.storage.select(table, &selection),
            self.storage.count(table, &predicate),
        );
        Ok((page?, total?))
    }

    /// Delete a single record; `false` when it did not exist.
    pub async fn delete_one(&self, meta: &ControllerMeta, id: &Value) -> Result<bool, ApiError> {
        Ok(self.storage.delete(meta.table(), id).await?)
    }

    /// Delete records independently per identifier. A failure on one id
    /// never rolls back the others; backend errors count as failures.
    pub async fn delete_many(
        &self,
        meta: &ControllerMeta,
        ids: &[Value],
    ) -> Result<DeleteReport, ApiError> {
        let results = join_all(ids.iter().map(|id| self.storage.delete(meta.table(), id))).await;
        let mut report = DeleteReport {
            deleted: 0,
            failed: 0,
        };
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    tracing::warn!(%id, %err, "delete failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Resolve every foreign field of every record, all records
    /// concurrently. Depth 1: resolved targets are not themselves resolved.
    pub async fn resolve_foreign(
        &self,
        meta: &ControllerMeta,
        records: Vec<Record>,
    ) -> Vec<Record> {
        join_all(
            records
                .into_iter()
                .map(|record| self.resolve_foreign_one(meta, record)),
        )
        .await
    }

    /// Resolve the foreign fields of one record. A dangling or failed
    /// reference becomes `null`; resolution of the remaining fields
    /// continues — foreign failures are never fatal to the response.
    pub async fn resolve_foreign_one(&self, meta: &ControllerMeta, mut record: Record) -> Record {
        for (name, field_meta) in meta.fields() {
            let Some(fref) = field_meta.foreign() else {
                continue;
            };
            let Some(stored) = record.get(name).cloned() else {
                continue;
            };
            let resolved = if fref.multiple() {
                match stored {
                    Value::Array(ids) => {
                        let targets =
                            join_all(ids.iter().map(|id| self.fetch_foreign(fref, id))).await;
                        Value::Array(targets)
                    }
                    other => self.fetch_foreign(fref, &other).await,
                }
            } else {
                self.fetch_foreign(fref, &stored).await
            };
            record.insert(name.to_string(), resolved);
        }
        record
    }

    async fn fetch_foreign(&self, fref: &ForeignRef, id: &Value) -> Value {
        let result = match fref.index() {
            Some(index) => self.storage.get_by_index(fref.table(), index, id).await,
            None => self.storage.get_by_key(fref.table(), id).await,
        };
        match result {
            Ok(Some(target)) => Value::Object(target),
            Ok(None) => {
                tracing::warn!(table = fref.table(), %id, "dangling foreign reference");
                Value::Null
            }
            Err(err) => {
                tracing::warn!(table = fref.table(), %id, %err, "foreign resolution failed");
                Value::Null
            }
        }
    }
}

// ── Projection pipeline ─────────────────────────────────────────────

/// Project a stored record for reading: exactly the fields whose access
/// mode is readable, in declaration order, with getters applied. Fields not
/// declared in metadata are dropped.
pub fn read_properties(meta: &ControllerMeta, record: &Record) -> Record {
    let mut out = Record::new();
    for (name, field_meta) in meta.fields() {
        if !field_meta.readable() {
            continue;
        }
        if let Some(value) = record.get(name) {
            out.insert(name.to_string(), field_meta.apply_getter(value.clone()));
        }
    }
    out
}

/// Narrow an already read-projected record to the fields listable in
/// `mode`. `no_pluck` bypasses the narrowing entirely, keeping "ever
/// exposed" and "shown in this view" as independent axes.
pub fn pluck(meta: &ControllerMeta, record: Record, mode: &str, no_pluck: bool) -> Record {
    if no_pluck {
        return record;
    }
    record
        .into_iter()
        .filter(|(name, _)| {
            meta.field(name)
                .map(|f| f.listable_in(mode))
                .unwrap_or(false)
        })
        .collect()
}

/// Project input for writing. Keys mapped to non-writable or undeclared
/// fields are silently dropped. Validators run before setters; the first
/// failing field fails the whole write.
pub fn write_properties(
    meta: &ControllerMeta,
    input: &Record,
    operation: Operation,
) -> Result<Record, ApiError> {
    tracing::debug!(?operation, controller = meta.name(), "projecting write");
    let mut out = Record::new();
    for (name, field_meta) in meta.fields() {
        let Some(value) = input.get(name) else {
            continue;
        };
        if !field_meta.writable() {
            continue;
        }
        if !field_meta.validate(value) {
            return Err(ApiError::validation(
                name,
                format!("Invalid value for field '{name}'"),
            ));
        }
        out.insert(name.to_string(), field_meta.apply_setter(value.clone()));
    }
    Ok(out)
}

/// Check every field mandatory for `operation`, reporting all missing or
/// empty fields in one batched failure.
pub fn mandatory_fields(
    meta: &ControllerMeta,
    data: &Record,
    operation: Operation,
) -> Result<(), ApiError> {
    let missing: Vec<String> = meta
        .fields()
        .filter(|(_, f)| f.mandatory_for(operation))
        .filter(|(name, _)| is_empty_value(data.get(*name)))
        .map(|(name, _)| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::missing_fields(missing))
    }
}

/// Final defensive pass: strip anything not readable before the response
/// leaves the system. Idempotent.
pub fn clear_internal(meta: &ControllerMeta, record: Record) -> Record {
    record
        .into_iter()
        .filter(|(name, _)| meta.field(name).map(|f| f.readable()).unwrap_or(false))
        .collect()
}

/// Absent, null, empty string and empty array all count as empty.
fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::AccessMode;
    use serde_json::json;

    fn meta() -> ControllerMeta {
        ControllerMeta::builder("notes")
            .table("notes")
            .field("id", |f| f.access(AccessMode::ReadOnly).listable(["list"]))
            .field("title", |f| {
                f.access(AccessMode::ReadWrite)
                    .listable(["list", "detailed"])
                    .mandatory([Operation::New, Operation::Edit])
            })
            .field("body", |f| f.access(AccessMode::ReadWrite).listable(["detailed"]))
            .field("secret", |f| f.access(AccessMode::WriteOnly))
            .build()
            .unwrap()
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn read_projection_excludes_write_only_and_undeclared() {
        let r = record(&[
            ("id", json!(1)),
            ("title", json!("A")),
            ("secret", json!("s")),
            ("internal", json!("x")),
        ]);
        let projected = read_properties(&meta(), &r);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("id"));
        assert!(projected.contains_key("title"));
        assert!(!projected.contains_key("secret"));
        assert!(!projected.contains_key("internal"));
    }

    #[test]
    fn write_projection_drops_read_only_and_unknown() {
        let input = record(&[
            ("id", json!(9)),
            ("title", json!("B")),
            ("unknown", json!("x")),
        ]);
        let stored = write_properties(&meta(), &input, Operation::New).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["title"], json!("B"));
    }

    #[test]
    fn read_after_write_is_exactly_read_write_fields() {
        let input = record(&[
            ("id", json!(1)),
            ("title", json!("A")),
            ("body", json!("b")),
            ("secret", json!("s")),
        ]);
        let written = write_properties(&meta(), &input, Operation::New).unwrap();
        let read = read_properties(&meta(), &written);
        let names: Vec<&String> = read.keys().collect();
        assert_eq!(names, vec!["title", "body"]);
    }

    #[test]
    fn validator_failure_names_the_field() {
        let meta = ControllerMeta::builder("c")
            .table("t")
            .field("age", |f| {
                f.access(AccessMode::ReadWrite)
                    .validator(|v| v.as_i64().map(|n| n >= 0).unwrap_or(false))
            })
            .build()
            .unwrap();
        let err =
            write_properties(&meta, &record(&[("age", json!(-1))]), Operation::New).unwrap_err();
        match err {
            ApiError::Validation(errors) => assert_eq!(errors[0].field, "age"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn setter_applies_after_validation() {
        let meta = ControllerMeta::builder("c")
            .table("t")
            .field("name", |f| {
                f.access(AccessMode::ReadWrite)
                    .validator(|v| v.as_str().map(|s| !s.is_empty()).unwrap_or(false))
                    .setter(|v| json!(v.as_str().unwrap_or("").to_uppercase()))
            })
            .build()
            .unwrap();
        let stored =
            write_properties(&meta, &record(&[("name", json!("ada"))]), Operation::New).unwrap();
        assert_eq!(stored["name"], json!("ADA"));
    }

    #[test]
    fn mandatory_reports_all_missing_fields_batched() {
        let meta = ControllerMeta::builder("c")
            .table("t")
            .field("x", |f| f.access(AccessMode::ReadWrite).mandatory([Operation::New]))
            .field("y", |f| f.access(AccessMode::ReadWrite).mandatory([Operation::New]))
            .build()
            .unwrap();
        let err = mandatory_fields(&meta, &Record::new(), Operation::New).unwrap_err();
        match err {
            ApiError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["x", "y"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let data = record(&[("title", json!(""))]);
        assert!(mandatory_fields(&meta(), &data, Operation::New).is_err());
        let data = record(&[("title", json!(null))]);
        assert!(mandatory_fields(&meta(), &data, Operation::Edit).is_err());
        let data = record(&[("title", json!("A"))]);
        assert!(mandatory_fields(&meta(), &data, Operation::New).is_ok());
    }

    #[test]
    fn pluck_narrows_by_mode_and_no_pluck_bypasses() {
        let projected = read_properties(
            &meta(),
            &record(&[("id", json!(1)), ("title", json!("A")), ("body", json!("b"))]),
        );
        let listed = pluck(&meta(), projected.clone(), "list", false);
        assert!(listed.contains_key("id"));
        assert!(listed.contains_key("title"));
        assert!(!listed.contains_key("body"));

        let detailed = pluck(&meta(), projected.clone(), "detailed", false);
        assert!(!detailed.contains_key("id"));
        assert!(detailed.contains_key("body"));

        let full = pluck(&meta(), projected.clone(), "list", true);
        assert_eq!(full, projected);
    }

    #[test]
    fn clear_internal_is_idempotent() {
        let r = record(&[
            ("id", json!(1)),
            ("title", json!("A")),
            ("bookkeeping", json!("x")),
            ("secret", json!("s")),
        ]);
        let once = clear_internal(&meta(), r);
        assert!(!once.contains_key("bookkeeping"));
        assert!(!once.contains_key("secret"));
        let twice = clear_internal(&meta(), once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn getter_applies_on_read() {
        let meta = ControllerMeta::builder("c")
            .table("t")
            .field("name", |f| {
                f.access(AccessMode::ReadOnly)
                    .getter(|v| json!(v.as_str().unwrap_or("").to_uppercase()))
            })
            .build()
            .unwrap();
        let read = read_properties(&meta, &record(&[("name", json!("ada"))]));
        assert_eq!(read["name"], json!("ADA"));
    }
}
