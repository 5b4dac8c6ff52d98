use crate::meta::ControllerMeta;
use crate::storage::Record;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Comparison operator of a filter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    /// Parse the wire tag (`filter_<field>=<op>:<value>`).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "eq" => Some(Op::Eq),
            "ne" => Some(Op::Ne),
            "gt" => Some(Op::Gt),
            "ge" => Some(Op::Ge),
            "lt" => Some(Op::Lt),
            "le" => Some(Op::Le),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::Lt => "lt",
            Op::Le => "le",
        }
    }
}

/// Parsed per-field `(value, operator)` constraints. Entries for one field
/// keep their request order; everything combines with logical AND.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    entries: Vec<(String, Vec<(Value, Op)>)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a constraint. Repeated fields append to the existing pair
    /// list rather than overwrite it.
    pub fn push(&mut self, field: impl Into<String>, value: Value, op: Op) {
        let field = field.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some((_, pairs)) => pairs.push((value, op)),
            None => self.entries.push((field, vec![(value, op)])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[(Value, Op)])> {
        self.entries.iter().map(|(f, pairs)| (f.as_str(), pairs.as_slice()))
    }
}

/// A predicate the storage cursor can apply.
///
/// Backends that translate comparisons natively match on [`Predicate::Cmp`];
/// anything else (notably [`Predicate::Custom`]) is evaluated in-process via
/// [`Predicate::eval`].
#[derive(Clone)]
pub enum Predicate {
    /// Matches every record.
    True,
    /// Default operator translation against a stored field value.
    Cmp { field: String, op: Op, value: Value },
    /// Arbitrary matching installed by a field's custom filter builder.
    Custom(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
    /// Conjunction of sub-predicates.
    All(Vec<Predicate>),
}

impl Predicate {
    /// Conjoin, collapsing the trivial cases.
    pub fn all(mut predicates: Vec<Predicate>) -> Predicate {
        predicates.retain(|p| !matches!(p, Predicate::True));
        match predicates.len() {
            0 => Predicate::True,
            1 => predicates.remove(0),
            _ => Predicate::All(predicates),
        }
    }

    pub fn custom<F>(f: F) -> Predicate
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    pub fn eval(&self, record: &Record) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Cmp { field, op, value } => {
                let stored = record.get(field).unwrap_or(&Value::Null);
                value_matches(stored, *op, value)
            }
            Predicate::Custom(f) => f(record),
            Predicate::All(predicates) => predicates.iter().all(|p| p.eval(record)),
        }
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::True => write!(f, "True"),
            Predicate::Cmp { field, op, value } => {
                write!(f, "Cmp({field} {} {value})", op.as_str())
            }
            Predicate::Custom(_) => write!(f, "Custom(..)"),
            Predicate::All(ps) => f.debug_tuple("All").field(ps).finish(),
        }
    }
}

/// Compare two JSON values for filtering and sorting.
///
/// Values that both read as numbers compare numerically (a string like
/// `"30"` coming off the query string compares against a stored number 30);
/// otherwise strings compare lexicographically and booleans as booleans.
/// Incomparable combinations yield `None`.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Whether a stored value satisfies `op` against a filter target.
///
/// Ordered operators on incomparable types match nothing; `ne` holds
/// whenever equality does not.
pub fn value_matches(stored: &Value, op: Op, target: &Value) -> bool {
    let equal = stored == target || compare(stored, target) == Some(Ordering::Equal);
    match op {
        Op::Eq => equal,
        Op::Ne => !equal,
        Op::Gt => compare(stored, target) == Some(Ordering::Greater),
        Op::Ge => matches!(
            compare(stored, target),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Op::Lt => compare(stored, target) == Some(Ordering::Less),
        Op::Le => matches!(
            compare(stored, target),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

/// Compile a [`FilterSpec`] into one conjoined predicate.
///
/// A field declaring a custom filter builder delegates construction to it;
/// otherwise the operator translates to the cursor's native comparison. A
/// filter naming an undeclared field is inert.
pub fn compile(meta: &ControllerMeta, spec: &FilterSpec) -> Predicate {
    let mut predicates = Vec::new();
    for (field, pairs) in spec.entries() {
        let Some(field_meta) = meta.field(field) else {
            tracing::debug!(field, "ignoring filter on undeclared field");
            continue;
        };
        for (value, op) in pairs {
            match field_meta.filter_builder() {
                Some(builder) => predicates.push(builder(value, *op)),
                None => predicates.push(Predicate::Cmp {
                    field: field.to_string(),
                    op: *op,
                    value: value.clone(),
                }),
            }
        }
    }
    Predicate::all(predicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AccessMode, ControllerMeta};
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn meta() -> ControllerMeta {
        ControllerMeta::builder("c")
            .table("t")
            .field("age", |f| f.access(AccessMode::ReadWrite))
            .field("name", |f| {
                f.access(AccessMode::ReadWrite).filter_with(|value, _op| {
                    let needle = value.as_str().unwrap_or("").to_string();
                    Predicate::custom(move |r| {
                        r.get("name")
                            .and_then(Value::as_str)
                            .map(|s| s.contains(&needle))
                            .unwrap_or(false)
                    })
                })
            })
            .build()
            .unwrap()
    }

    #[test]
    fn op_parse_round_trip() {
        for tag in ["eq", "ne", "gt", "ge", "lt", "le"] {
            assert_eq!(Op::parse(tag).unwrap().as_str(), tag);
        }
        assert!(Op::parse("like").is_none());
    }

    #[test]
    fn numeric_comparison_coerces_strings() {
        let r = record(&[("age", json!(30))]);
        let gt = Predicate::Cmp {
            field: "age".into(),
            op: Op::Gt,
            value: json!("20"),
        };
        assert!(gt.eval(&r));
        let lt = Predicate::Cmp {
            field: "age".into(),
            op: Op::Lt,
            value: json!("20"),
        };
        assert!(!lt.eval(&r));
    }

    #[test]
    fn gt_is_strict() {
        let r = record(&[("age", json!(20))]);
        assert!(!value_matches(&json!(20), Op::Gt, &json!(20)));
        let p = Predicate::Cmp {
            field: "age".into(),
            op: Op::Ge,
            value: json!(20),
        };
        assert!(p.eval(&r));
    }

    #[test]
    fn missing_field_matches_ne_only() {
        assert!(!value_matches(&Value::Null, Op::Eq, &json!("x")));
        assert!(value_matches(&Value::Null, Op::Ne, &json!("x")));
        assert!(!value_matches(&Value::Null, Op::Gt, &json!("x")));
    }

    #[test]
    fn same_field_entries_conjoin() {
        let mut spec = FilterSpec::new();
        spec.push("age", json!("10"), Op::Gt);
        spec.push("age", json!("20"), Op::Lt);
        let p = compile(&meta(), &spec);
        assert!(p.eval(&record(&[("age", json!(15))])));
        assert!(!p.eval(&record(&[("age", json!(25))])));
        assert!(!p.eval(&record(&[("age", json!(5))])));
    }

    #[test]
    fn undeclared_field_is_inert() {
        let mut spec = FilterSpec::new();
        spec.push("ghost", json!("x"), Op::Eq);
        let p = compile(&meta(), &spec);
        assert!(p.is_true());
        assert!(p.eval(&record(&[("age", json!(1))])));
    }

    #[test]
    fn custom_filter_overrides_operator() {
        let mut spec = FilterSpec::new();
        // Operator says eq, the custom builder does substring matching.
        spec.push("name", json!("lic"), Op::Eq);
        let p = compile(&meta(), &spec);
        assert!(p.eval(&record(&[("name", json!("alice"))])));
        assert!(!p.eval(&record(&[("name", json!("bob"))])));
    }

    #[test]
    fn empty_spec_compiles_to_true() {
        assert!(compile(&meta(), &FilterSpec::new()).is_true());
    }
}
