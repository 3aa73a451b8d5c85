use serde_json::{Map, Value};

use crate::schema::RowFilter;

/// Which kind of rule produced a value. Only filter rules may return objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Operation,
    Filter,
    Item,
    Field,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Operation => "operation",
            Granularity::Filter => "filter",
            Granularity::Item => "item",
            Granularity::Field => "field",
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Granularity::Filter => "boolean | object",
            _ => "boolean",
        }
    }
}

/// A rule's return value after type checking.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    Deny,
    /// An unvalidated filter object.
    Filter(Map<String, Value>),
}

/// A rule returned a value of the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnTypeMismatch {
    pub returned: &'static str,
    pub expected: &'static str,
}

/// The outcome of a filter check.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allowed,
    Denied,
    AllowedWithFilter(RowFilter),
}

impl AccessDecision {
    pub fn is_denied(&self) -> bool {
        matches!(self, AccessDecision::Denied)
    }

    /// The decision as a row filter: allow-all, match-nothing, or the filter.
    pub fn into_filter(self) -> RowFilter {
        match self {
            AccessDecision::Allowed => RowFilter::Always,
            AccessDecision::Denied => RowFilter::Never,
            AccessDecision::AllowedWithFilter(filter) => filter,
        }
    }
}

/// Runtime type name of a JSON value, as reported in errors. Values
/// themselves are never reported.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The single place where rule return values are classified.
pub fn classify(granularity: Granularity, value: Value) -> Result<Verdict, ReturnTypeMismatch> {
    match value {
        Value::Bool(true) => Ok(Verdict::Allow),
        Value::Bool(false) => Ok(Verdict::Deny),
        Value::Object(object) if granularity == Granularity::Filter => Ok(Verdict::Filter(object)),
        other => Err(ReturnTypeMismatch {
            returned: type_name(&other),
            expected: granularity.expected(),
        }),
    }
}

/// [`classify`] for granularities that only accept booleans.
pub fn classify_boolean(granularity: Granularity, value: Value) -> Result<bool, ReturnTypeMismatch> {
    match classify(granularity, value)? {
        Verdict::Allow => Ok(true),
        Verdict::Deny => Ok(false),
        Verdict::Filter(_) => Err(ReturnTypeMismatch {
            returned: "object",
            expected: granularity.expected(),
        }),
    }
}
