use crate::error::ApiError;
use crate::filter::Predicate;
use async_trait::async_trait;
use serde_json::Value;

/// A dynamic record: one row as a JSON object.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `"desc"` (any case) sorts descending, anything else ascending.
    pub fn parse(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// A fluent description of one cursor query: predicate, ordering and
/// pagination window. Built by the engine, executed by the backend.
///
/// # Example
///
/// ```ignore
/// let sel = Selection::new()
///     .filter(predicate)
///     .order_by("created_at", SortDirection::Desc)
///     .skip(20)
///     .limit(10);
/// let page = storage.select("notes", &sel).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Selection {
    predicate: Predicate,
    order: Option<(String, SortDirection)>,
    offset: u64,
    limit: Option<u64>,
}

impl Selection {
    pub fn new() -> Self {
        Self {
            predicate: Predicate::True,
            order: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    pub fn skip(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn order(&self) -> Option<(&str, SortDirection)> {
        self.order.as_ref().map(|(f, d)| (f.as_str(), *d))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by a storage backend.
#[derive(Debug)]
pub enum StorageError {
    Backend(Box<dyn std::error::Error + Send + Sync>),
    Other(String),
}

impl StorageError {
    /// Wrap a driver-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Backend(Box::new(err))
    }

    pub fn other(msg: impl Into<String>) -> Self {
        StorageError::Other(msg.into())
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Backend(err) => write!(f, "Storage backend error: {err}"),
            StorageError::Other(msg) => write!(f, "Storage error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Backend(err) => Some(err.as_ref()),
            StorageError::Other(_) => None,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// The storage backend contract consumed by the engine.
///
/// Cancellation and timeouts are the backend's own concern; a backend
/// failure simply propagates as a failure of the in-flight pipeline stage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Primary-key lookup.
    async fn get_by_key(&self, table: &str, id: &Value) -> Result<Option<Record>, StorageError>;

    /// Secondary-index lookup (first match).
    async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Option<Record>, StorageError>;

    /// Execute a filtered/sorted/paginated cursor query.
    async fn select(&self, table: &str, selection: &Selection)
        -> Result<Vec<Record>, StorageError>;

    /// Count records matching a predicate, without pagination.
    async fn count(&self, table: &str, predicate: &Predicate) -> Result<u64, StorageError>;

    /// Insert a record, returning the generated (or supplied) identifier.
    async fn insert(&self, table: &str, record: Record) -> Result<Value, StorageError>;

    /// Apply a partial update; `false` when the target does not exist.
    async fn update(&self, table: &str, id: &Value, patch: Record)
        -> Result<bool, StorageError>;

    /// Delete by primary key; `false` when the target does not exist.
    async fn delete(&self, table: &str, id: &Value) -> Result<bool, StorageError>;
}
