use crate::error::ApiError;
use crate::filter::{FilterSpec, Op};
use crate::storage::SortDirection;
use serde_json::Value;

/// Limit ceiling applied when a route does not configure its own.
pub const DEFAULT_MAX_PAGE: u64 = 100;

/// Raw request inputs as ordered key/value pairs.
///
/// Query strings, path segments and pre-parsed body fields all funnel into
/// this shape; the typed parameter structs are extracted from it.
#[derive(Debug, Clone, Default)]
pub struct RawInput {
    pairs: Vec<(String, String)>,
}

impl RawInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string into ordered pairs.
    pub fn from_query(query: Option<&str>) -> Self {
        let pairs = match query {
            Some(q) => form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            None => Vec::new(),
        };
        Self { pairs }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First occurrence of a key, if any.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every occurrence of a key, in request order.
    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Apply route-level static overrides: any key present in `overrides`
    /// replaces every client-supplied occurrence of that key, so static
    /// configuration can enforce security defaults.
    pub fn overlay(&self, overrides: &RawInput) -> RawInput {
        let mut pairs: Vec<(String, String)> = self
            .pairs
            .iter()
            .filter(|(k, _)| overrides.first(k).is_none())
            .cloned()
            .collect();
        pairs.extend(overrides.pairs.iter().cloned());
        RawInput { pairs }
    }

    // ── Typed coercions ─────────────────────────────────────────────

    /// Integer coercion; a malformed value is a BadRequest naming the key.
    pub fn int(&self, key: &str) -> Result<Option<i64>, ApiError> {
        match self.first(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
                ApiError::BadRequest(format!("Malformed parameter '{key}'"))
            }),
        }
    }

    /// Float coercion; a malformed value is a BadRequest naming the key.
    pub fn float(&self, key: &str) -> Result<Option<f64>, ApiError> {
        match self.first(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                ApiError::BadRequest(format!("Malformed parameter '{key}'"))
            }),
        }
    }

    /// Flag coercion: `'0'` is false, any other present value is true,
    /// absence is false.
    pub fn flag(&self, key: &str) -> bool {
        match self.first(key) {
            None => false,
            Some("0") => false,
            Some(_) => true,
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.first(key).map(str::to_string)
    }

    fn id_required(&self) -> Result<Value, ApiError> {
        self.first("id")
            .map(|id| Value::String(id.to_string()))
            .ok_or_else(|| ApiError::BadRequest("Missing ID".to_string()))
    }
}

/// Scan `filter_<field>=<op>:<value>` keys into a [`FilterSpec`].
///
/// Repeated filter keys append to the field's pair list. Unknown operators
/// and values missing the `<op>:` prefix are malformed requests.
pub fn extract_filters(raw: &RawInput) -> Result<FilterSpec, ApiError> {
    let mut spec = FilterSpec::new();
    for (key, value) in raw.iter() {
        let Some(field) = key.strip_prefix("filter_") else {
            continue;
        };
        let Some((tag, target)) = value.split_once(':') else {
            return Err(ApiError::BadRequest(format!(
                "Malformed filter for '{field}'"
            )));
        };
        let op = Op::parse(tag).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown filter operator '{tag}'"))
        })?;
        spec.push(field, Value::String(target.to_string()), op);
    }
    Ok(spec)
}

#[derive(Debug, Clone)]
pub struct GetParams {
    pub id: Value,
    pub index: Option<String>,
    pub no_foreign: bool,
}

impl GetParams {
    pub fn extract(raw: &RawInput) -> Result<Self, ApiError> {
        Ok(Self {
            id: raw.id_required()?,
            index: raw.string("index"),
            no_foreign: raw.flag("no_foreign"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ListParams {
    pub filters: FilterSpec,
    pub offset: u64,
    pub limit: Option<u64>,
    pub sort_key: Option<String>,
    pub sort_direction: SortDirection,
    pub max_page: u64,
    pub no_foreign: bool,
    pub no_pluck: bool,
    pub pluck_mode: String,
}

impl ListParams {
    pub fn extract(raw: &RawInput) -> Result<Self, ApiError> {
        let offset = raw.int("offset")?.map(|n| n.max(0) as u64).unwrap_or(0);
        let limit = raw.int("limit")?.map(|n| n.max(0) as u64);
        let max_page = raw
            .int("max_page")?
            .map(|n| n.max(0) as u64)
            .unwrap_or(DEFAULT_MAX_PAGE);
        Ok(Self {
            filters: extract_filters(raw)?,
            offset,
            limit,
            sort_key: raw.string("sort_key"),
            sort_direction: SortDirection::parse(raw.first("sort_direction").unwrap_or("asc")),
            max_page,
            no_foreign: raw.flag("no_foreign"),
            no_pluck: raw.flag("no_pluck"),
            pluck_mode: raw.string("pluck_mode").unwrap_or_else(|| "list".to_string()),
        })
    }

    /// The page size actually used: the requested limit clamped to
    /// `[0, max_page]`, defaulting to `max_page`.
    pub fn effective_limit(&self) -> u64 {
        self.limit.unwrap_or(self.max_page).min(self.max_page)
    }
}

#[derive(Debug, Clone)]
pub struct NewParams {
    pub no_mandatory: bool,
}

impl NewParams {
    pub fn extract(raw: &RawInput) -> Result<Self, ApiError> {
        Ok(Self {
            no_mandatory: raw.flag("no_mandatory"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EditParams {
    pub id: Value,
    pub index: Option<String>,
    pub no_mandatory: bool,
}

impl EditParams {
    pub fn extract(raw: &RawInput) -> Result<Self, ApiError> {
        Ok(Self {
            id: raw.id_required()?,
            index: raw.string("index"),
            no_mandatory: raw.flag("no_mandatory"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeleteParams {
    pub ids: Vec<Value>,
}

impl DeleteParams {
    pub fn extract(raw: &RawInput) -> Result<Self, ApiError> {
        let ids: Vec<Value> = raw
            .all("id")
            .map(|id| Value::String(id.to_string()))
            .collect();
        if ids.is_empty() {
            return Err(ApiError::BadRequest("Missing ID".to_string()));
        }
        Ok(Self { ids })
    }
}
