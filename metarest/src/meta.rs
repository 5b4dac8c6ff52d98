use crate::error::ApiError;
use crate::filter::{Op, Predicate};
use serde_json::Value;
use std::sync::Arc;

/// Whether a field is exposed for reading, writing, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Write operations a field can be mandatory for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    New,
    Edit,
}

/// Marks a field as holding an identifier (or identifiers) referencing
/// another table.
#[derive(Debug, Clone)]
pub struct ForeignRef {
    table: String,
    index: Option<String>,
    multiple: bool,
}

impl ForeignRef {
    /// Reference into `table` by its primary key.
    pub fn to(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            index: None,
            multiple: false,
        }
    }

    /// Resolve through a secondary index instead of the primary key.
    pub fn via(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// The field holds an array of identifiers, each resolved independently.
    pub fn multi(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn multiple(&self) -> bool {
        self.multiple
    }
}

/// Stored function values with fixed signatures (no virtual dispatch).
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type FilterBuilder = Arc<dyn Fn(&Value, Op) -> Predicate + Send + Sync>;

/// The capability declarations attached to one field.
///
/// Every capability is optional so the inheritance merge can distinguish
/// "not declared at this level" from "declared with an empty value".
#[derive(Clone, Default)]
pub struct FieldMeta {
    access: Option<AccessMode>,
    listable: Option<Vec<String>>,
    sortable: Option<bool>,
    mandatory: Option<Vec<Operation>>,
    foreign: Option<ForeignRef>,
    validator: Option<Validator>,
    filter: Option<FilterBuilder>,
    getter: Option<Transform>,
    setter: Option<Transform>,
}

impl FieldMeta {
    pub fn access(&self) -> Option<AccessMode> {
        self.access
    }

    pub fn readable(&self) -> bool {
        self.access.map(AccessMode::readable).unwrap_or(false)
    }

    pub fn writable(&self) -> bool {
        self.access.map(AccessMode::writable).unwrap_or(false)
    }

    /// Empty listable set means the field never appears in a listing
    /// projection.
    pub fn listable_in(&self, mode: &str) -> bool {
        self.listable
            .as_ref()
            .map(|modes| modes.iter().any(|m| m == mode))
            .unwrap_or(false)
    }

    pub fn sortable(&self) -> bool {
        self.sortable.unwrap_or(false)
    }

    pub fn mandatory_for(&self, op: Operation) -> bool {
        self.mandatory
            .as_ref()
            .map(|ops| ops.contains(&op))
            .unwrap_or(false)
    }

    pub fn foreign(&self) -> Option<&ForeignRef> {
        self.foreign.as_ref()
    }

    pub fn validate(&self, value: &Value) -> bool {
        self.validator.as_ref().map(|v| v(value)).unwrap_or(true)
    }

    pub fn filter_builder(&self) -> Option<&FilterBuilder> {
        self.filter.as_ref()
    }

    pub fn apply_getter(&self, value: Value) -> Value {
        match &self.getter {
            Some(getter) => getter(value),
            None => value,
        }
    }

    pub fn apply_setter(&self, value: Value) -> Value {
        match &self.setter {
            Some(setter) => setter(value),
            None => value,
        }
    }

    /// Additive-per-capability merge: capabilities declared by `self` win,
    /// the rest are retained from `parent`. Never whole-record replacement.
    fn merged_over(&self, parent: &FieldMeta) -> FieldMeta {
        FieldMeta {
            access: self.access.or(parent.access),
            listable: self.listable.clone().or_else(|| parent.listable.clone()),
            sortable: self.sortable.or(parent.sortable),
            mandatory: self.mandatory.clone().or_else(|| parent.mandatory.clone()),
            foreign: self.foreign.clone().or_else(|| parent.foreign.clone()),
            validator: self.validator.clone().or_else(|| parent.validator.clone()),
            filter: self.filter.clone().or_else(|| parent.filter.clone()),
            getter: self.getter.clone().or_else(|| parent.getter.clone()),
            setter: self.setter.clone().or_else(|| parent.setter.clone()),
        }
    }
}

/// Fluent per-field declaration handle used inside
/// [`ControllerBuilder::field`]. Redeclaring a capability at the same level
/// replaces the previous declaration of that capability only.
pub struct FieldDecl(FieldMeta);

impl FieldDecl {
    pub fn access(mut self, mode: AccessMode) -> Self {
        self.0.access = Some(mode);
        self
    }

    pub fn listable<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.listable = Some(modes.into_iter().map(Into::into).collect());
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.0.sortable = Some(sortable);
        self
    }

    pub fn mandatory<I>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        self.0.mandatory = Some(ops.into_iter().collect());
        self
    }

    pub fn foreign(mut self, fref: ForeignRef) -> Self {
        self.0.foreign = Some(fref);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.0.validator = Some(Arc::new(validator));
        self
    }

    /// Override default operator translation for this field. The builder
    /// receives the raw filter value and operator tag and may ignore the
    /// operator entirely (e.g. substring search across several columns).
    pub fn filter_with<F>(mut self, builder: F) -> Self
    where
        F: Fn(&Value, Op) -> Predicate + Send + Sync + 'static,
    {
        self.0.filter = Some(Arc::new(builder));
        self
    }

    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.0.getter = Some(Arc::new(getter));
        self
    }

    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.0.setter = Some(Arc::new(setter));
        self
    }
}

/// The resolved, immutable field table of one controller.
///
/// Built once at startup through [`ControllerMeta::builder`], shared via
/// `Arc` afterwards; nothing here is mutated per request.
#[derive(Clone)]
pub struct ControllerMeta {
    name: String,
    table: String,
    primary_key: String,
    fields: Vec<(String, FieldMeta)>,
}

impl ControllerMeta {
    pub fn builder(name: impl Into<String>) -> ControllerBuilder {
        ControllerBuilder {
            name: name.into(),
            table: None,
            primary_key: None,
            parent: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, meta)| meta)
    }

    /// Fields in declaration order (parent declarations first), for
    /// deterministic projection ordering.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldMeta)> {
        self.fields.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Field names matching a capability predicate, in declaration order.
    pub fn fields_with<P>(&self, predicate: P) -> Vec<&str>
    where
        P: Fn(&FieldMeta) -> bool,
    {
        self.fields()
            .filter(|(_, meta)| predicate(meta))
            .map(|(name, _)| name)
            .collect()
    }
}

impl std::fmt::Debug for ControllerMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMeta")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field(
                "fields",
                &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Declaration-time builder for [`ControllerMeta`].
///
/// Resolution happens here, at registration: the ancestor chain is folded
/// root-to-leaf so request-path lookups never walk the chain.
pub struct ControllerBuilder {
    name: String,
    table: Option<String>,
    primary_key: Option<String>,
    parent: Option<ControllerMeta>,
    fields: Vec<(String, FieldMeta)>,
}

impl ControllerBuilder {
    /// Bind the underlying table. Inherited from the parent if not set.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Name of the primary-key column (defaults to the parent's, else "id").
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Inherit the (already resolved) metadata of a parent controller.
    pub fn extends(mut self, parent: &ControllerMeta) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Declare capabilities for one field. Declaring the same field twice at
    /// one level merges per capability rather than replacing the field.
    pub fn field<F>(mut self, name: impl Into<String>, configure: F) -> Self
    where
        F: FnOnce(FieldDecl) -> FieldDecl,
    {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                let declared = configure(FieldDecl(FieldMeta::default())).0;
                *existing = declared.merged_over(existing);
            }
            None => {
                let declared = configure(FieldDecl(FieldMeta::default())).0;
                self.fields.push((name, declared));
            }
        }
        self
    }

    /// Resolve the ancestor chain and freeze the field table.
    ///
    /// Fails with [`ApiError::Config`] when no table is bound anywhere in
    /// the chain — a startup failure, never a request-time one.
    pub fn build(self) -> Result<ControllerMeta, ApiError> {
        let table = self
            .table
            .or_else(|| self.parent.as_ref().map(|p| p.table.clone()))
            .ok_or_else(|| {
                ApiError::Config(format!("controller '{}' has no bound table", self.name))
            })?;

        let primary_key = self
            .primary_key
            .or_else(|| self.parent.as_ref().map(|p| p.primary_key.clone()))
            .unwrap_or_else(|| "id".to_string());

        // Parent fields first, each overlaid by the child's declaration of
        // the same field; child-only fields appended in declaration order.
        let mut fields: Vec<(String, FieldMeta)> = match &self.parent {
            Some(parent) => parent.fields.clone(),
            None => Vec::new(),
        };
        for (name, declared) in self.fields {
            match fields.iter_mut().find(|(n, _)| *n == name) {
                Some((_, inherited)) => *inherited = declared.merged_over(inherited),
                None => fields.push((name, declared)),
            }
        }

        Ok(ControllerMeta {
            name: self.name,
            table,
            primary_key,
            fields,
        })
    }
}
