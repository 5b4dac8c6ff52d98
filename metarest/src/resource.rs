use crate::engine::{self, Engine};
use crate::error::ApiError;
use crate::meta::{ControllerMeta, Operation};
use crate::params::{DeleteParams, EditParams, GetParams, ListParams, NewParams, RawInput};
use crate::storage::{Record, Storage};
use serde_json::{json, Value};
use std::sync::Arc;

/// Static, route-level configuration applied over client-supplied
/// parameters. Any key set here always wins, so deployments can pin
/// security defaults (`no_foreign=1`) or tune `max_page` per route.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    overrides: RawInput,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push(key, value);
        self
    }

    pub fn overrides(&self) -> &RawInput {
        &self.overrides
    }
}

/// One controller wired to a backend: the five canonical operations the
/// routing layer dispatches to.
///
/// The routing layer itself (verbs, paths, serialization of [`ApiError`])
/// stays outside this crate; handlers just call these methods and forward
/// the returned JSON.
pub struct Resource<S> {
    meta: Arc<ControllerMeta>,
    engine: Engine<S>,
    options: RouteOptions,
}

impl<S> Clone for Resource<S> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            engine: self.engine.clone(),
            options: self.options.clone(),
        }
    }
}

impl<S: Storage> Resource<S> {
    pub fn new(meta: Arc<ControllerMeta>, storage: Arc<S>) -> Self {
        tracing::debug!(controller = meta.name(), table = meta.table(), "wiring resource");
        Self {
            meta,
            engine: Engine::new(storage),
            options: RouteOptions::new(),
        }
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn meta(&self) -> &ControllerMeta {
        &self.meta
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    fn effective(&self, raw: &RawInput) -> RawInput {
        raw.overlay(self.options.overrides())
    }

    /// Get: single projected record, 404 when absent.
    pub async fn get(&self, raw: &RawInput) -> Result<Value, ApiError> {
        let raw = self.effective(raw);
        let params = GetParams::extract(&raw)?;
        let Some(record) = self
            .engine
            .get(&self.meta, &params.id, params.index.as_deref())
            .await?
        else {
            return Err(ApiError::NotFound("No such record".to_string()));
        };
        let record = if params.no_foreign {
            record
        } else {
            self.engine.resolve_foreign_one(&self.meta, record).await
        };
        let record = engine::read_properties(&self.meta, &record);
        let record = engine::clear_internal(&self.meta, record);
        Ok(Value::Object(record))
    }

    /// List: `{ results, total, offset, limit }`.
    pub async fn list(&self, raw: &RawInput) -> Result<Value, ApiError> {
        let raw = self.effective(raw);
        let params = ListParams::extract(&raw)?;
        let (records, total) = self.engine.list(&self.meta, &params).await?;
        let records = if params.no_foreign {
            records
        } else {
            self.engine.resolve_foreign(&self.meta, records).await
        };
        let results: Vec<Value> = records
            .iter()
            .map(|record| {
                let projected = engine::read_properties(&self.meta, record);
                let plucked =
                    engine::pluck(&self.meta, projected, &params.pluck_mode, params.no_pluck);
                Value::Object(engine::clear_internal(&self.meta, plucked))
            })
            .collect();
        Ok(json!({
            "results": results,
            "total": total,
            "offset": params.offset,
            "limit": params.effective_limit(),
        }))
    }

    /// New: validate, project, insert; returns the generated identifiers.
    pub async fn create(&self, raw: &RawInput, body: Record) -> Result<Value, ApiError> {
        let raw = self.effective(raw);
        let params = NewParams::extract(&raw)?;
        if !params.no_mandatory {
            engine::mandatory_fields(&self.meta, &body, Operation::New)?;
        }
        let stored = engine::write_properties(&self.meta, &body, Operation::New)?;
        let id = self
            .engine
            .storage()
            .insert(self.meta.table(), stored)
            .await?;
        Ok(Value::Array(vec![id]))
    }

    /// Edit: target must exist (404 otherwise); returns a success indicator.
    pub async fn edit(&self, raw: &RawInput, body: Record) -> Result<Value, ApiError> {
        let raw = self.effective(raw);
        let params = EditParams::extract(&raw)?;
        let Some(existing) = self
            .engine
            .get(&self.meta, &params.id, params.index.as_deref())
            .await?
        else {
            return Err(ApiError::NotFound("No such record".to_string()));
        };
        if !params.no_mandatory {
            engine::mandatory_fields(&self.meta, &body, Operation::Edit)?;
        }
        let patch = engine::write_properties(&self.meta, &body, Operation::Edit)?;

        // When fetched through a secondary index the update still goes
        // through the primary key of the record found.
        let key = match params.index {
            None => params.id.clone(),
            Some(_) => existing
                .get(self.meta.primary_key())
                .cloned()
                .ok_or_else(|| {
                    ApiError::Internal(format!(
                        "record in '{}' has no primary key '{}'",
                        self.meta.table(),
                        self.meta.primary_key()
                    ))
                })?,
        };
        let updated = self
            .engine
            .storage()
            .update(self.meta.table(), &key, patch)
            .await?;
        Ok(json!({ "updated": updated }))
    }

    /// Delete: boolean for a single id, per-id success counts for a list.
    pub async fn delete(&self, raw: &RawInput) -> Result<Value, ApiError> {
        let raw = self.effective(raw);
        let params = DeleteParams::extract(&raw)?;
        match params.ids.as_slice() {
            [id] => {
                let deleted = self.engine.delete_one(&self.meta, id).await?;
                Ok(Value::Bool(deleted))
            }
            ids => {
                let report = self.engine.delete_many(&self.meta, ids).await?;
                Ok(json!({ "deleted": report.deleted, "failed": report.failed }))
            }
        }
    }
}
