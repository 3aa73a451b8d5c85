//! Where-input shapes and the row filters coerced from them.
//!
//! Each list gets a `<ListKey>WhereInput` built from its filterable fields.
//! Filter objects (from access rules or from callers) are coerced against it
//! into a typed [`RowFilter`]; anything the shape does not describe is an
//! error, never ignored.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use super::Item;
use crate::access::type_name;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value at \"{path}\": {message}")]
pub struct CoercionError {
    pub path: String,
    pub message: String,
}

impl CoercionError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn expected(path: &str, expected: &str, found: &Value) -> Self {
        Self::new(path, format!("expected {expected}, found {}", type_name(found)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarKind {
    Id,
    String,
    Int,
    Float,
    Boolean,
    DateTime,
    Enum(Arc<[String]>),
}

impl ScalarKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::Id => "ID",
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Enum(_) => "Enum",
        }
    }

    fn operators(&self) -> &'static [&'static str] {
        match self {
            ScalarKind::Id | ScalarKind::Int | ScalarKind::Float | ScalarKind::DateTime => {
                &["equals", "in", "notIn", "lt", "lte", "gt", "gte", "not"]
            }
            ScalarKind::String => &[
                "equals",
                "in",
                "notIn",
                "lt",
                "lte",
                "gt",
                "gte",
                "contains",
                "startsWith",
                "endsWith",
                "not",
            ],
            ScalarKind::Boolean => &["equals", "not"],
            ScalarKind::Enum(_) => &["equals", "in", "notIn", "not"],
        }
    }

    /// Coerce one non-null input value.
    pub fn coerce(&self, value: &Value, path: &str) -> Result<Scalar, CoercionError> {
        match (self, value) {
            (_, Value::Null) => Err(CoercionError::new(path, "null is not allowed here")),
            (ScalarKind::Id, Value::String(s)) => Ok(Scalar::String(s.clone())),
            (ScalarKind::Id, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(Scalar::String(n.to_string()))
            }
            (ScalarKind::String, Value::String(s)) => Ok(Scalar::String(s.clone())),
            (ScalarKind::Int, Value::Number(n)) => n
                .as_i64()
                .filter(|v| i32::try_from(*v).is_ok())
                .map(Scalar::Int)
                .ok_or_else(|| CoercionError::new(path, "expected Int, found a number that is not a 32-bit integer")),
            (ScalarKind::Float, Value::Number(n)) => n
                .as_f64()
                .map(Scalar::Float)
                .ok_or_else(|| CoercionError::expected(path, "Float", value)),
            (ScalarKind::Boolean, Value::Bool(b)) => Ok(Scalar::Bool(*b)),
            (ScalarKind::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Scalar::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| CoercionError::new(path, "expected DateTime, found a string that is not RFC 3339")),
            (ScalarKind::Enum(options), Value::String(s)) => {
                if options.iter().any(|o| o == s) {
                    Ok(Scalar::String(s.clone()))
                } else {
                    Err(CoercionError::new(
                        path,
                        format!("expected one of {}", options.join(", ")),
                    ))
                }
            }
            (kind, other) => Err(CoercionError::expected(path, kind.type_name(), other)),
        }
    }

    fn coerce_nullable(&self, value: &Value, path: &str) -> Result<Scalar, CoercionError> {
        if value.is_null() {
            return Ok(Scalar::Null);
        }
        self.coerce(value, path)
    }

    fn coerce_list(&self, value: &Value, path: &str) -> Result<Vec<Scalar>, CoercionError> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.coerce(item, &format!("{path}[{i}]")))
                .collect(),
            Value::Null => Err(CoercionError::new(path, "null is not allowed here")),
            // a single value stands in for a one-element list
            single => Ok(vec![self.coerce(single, path)?]),
        }
    }

    fn coerce_string(value: &Value, path: &str) -> Result<String, CoercionError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoercionError::expected(path, "String", value))
    }

    fn coerce_conditions(&self, object: &Map<String, Value>, path: &str) -> Result<Vec<Condition>, CoercionError> {
        let mut conditions = Vec::with_capacity(object.len());
        for (op, value) in object {
            let path = format!("{path}.{op}");
            if !self.operators().contains(&op.as_str()) {
                return Err(CoercionError::new(
                    &path,
                    format!("field \"{op}\" is not defined by type \"{}Filter\"", self.type_name()),
                ));
            }
            let condition = match op.as_str() {
                "equals" => Condition::Equals(self.coerce_nullable(value, &path)?),
                "in" => Condition::In(self.coerce_list(value, &path)?),
                "notIn" => Condition::NotIn(self.coerce_list(value, &path)?),
                "lt" => Condition::Lt(self.coerce(value, &path)?),
                "lte" => Condition::Lte(self.coerce(value, &path)?),
                "gt" => Condition::Gt(self.coerce(value, &path)?),
                "gte" => Condition::Gte(self.coerce(value, &path)?),
                "contains" => Condition::Contains(Self::coerce_string(value, &path)?),
                "startsWith" => Condition::StartsWith(Self::coerce_string(value, &path)?),
                "endsWith" => Condition::EndsWith(Self::coerce_string(value, &path)?),
                _ => {
                    let nested = value
                        .as_object()
                        .ok_or_else(|| CoercionError::expected(&path, &format!("{}Filter", self.type_name()), value))?;
                    let nested = self.coerce_conditions(nested, &path)?;
                    if nested.is_empty() {
                        continue;
                    }
                    Condition::Not(nested)
                }
            };
            conditions.push(condition);
        }
        Ok(conditions)
    }
}

/// A coerced filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::String(s) => Value::String(s.clone()),
            Scalar::DateTime(dt) => Value::String(dt.to_rfc3339()),
        }
    }

    /// Order of a stored value relative to this operand, when comparable.
    fn compare(&self, stored: &Value) -> Option<Ordering> {
        match (self, stored) {
            (Scalar::Bool(b), Value::Bool(v)) => Some(v.cmp(b)),
            (Scalar::Int(i), Value::Number(n)) => match n.as_i64() {
                Some(v) => Some(v.cmp(i)),
                None => n.as_f64()?.partial_cmp(&(*i as f64)),
            },
            (Scalar::Float(f), Value::Number(n)) => n.as_f64()?.partial_cmp(f),
            (Scalar::String(s), Value::String(v)) => Some(v.as_str().cmp(s.as_str())),
            (Scalar::DateTime(dt), Value::String(v)) => DateTime::parse_from_rfc3339(v)
                .ok()
                .map(|v| v.with_timezone(&Utc).cmp(dt)),
            _ => None,
        }
    }

    fn equals(&self, stored: &Value) -> bool {
        match self {
            Scalar::Null => stored.is_null(),
            _ => self.compare(stored) == Some(Ordering::Equal),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Scalar),
    In(Vec<Scalar>),
    NotIn(Vec<Scalar>),
    Lt(Scalar),
    Lte(Scalar),
    Gt(Scalar),
    Gte(Scalar),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Holds unless every nested condition holds.
    Not(Vec<Condition>),
}

impl Condition {
    pub fn matches(&self, stored: &Value) -> bool {
        let ordered = |operand: &Scalar, accept: fn(Ordering) -> bool| {
            operand.compare(stored).map(accept).unwrap_or(false)
        };
        match self {
            Condition::Equals(operand) => operand.equals(stored),
            Condition::In(operands) => operands.iter().any(|o| o.equals(stored)),
            Condition::NotIn(operands) => !stored.is_null() && !operands.iter().any(|o| o.equals(stored)),
            Condition::Lt(operand) => ordered(operand, Ordering::is_lt),
            Condition::Lte(operand) => ordered(operand, Ordering::is_le),
            Condition::Gt(operand) => ordered(operand, Ordering::is_gt),
            Condition::Gte(operand) => ordered(operand, Ordering::is_ge),
            Condition::Contains(needle) => stored.as_str().is_some_and(|s| s.contains(needle.as_str())),
            Condition::StartsWith(prefix) => stored.as_str().is_some_and(|s| s.starts_with(prefix.as_str())),
            Condition::EndsWith(suffix) => stored.as_str().is_some_and(|s| s.ends_with(suffix.as_str())),
            Condition::Not(conditions) => !stored.is_null() && !conditions.iter().all(|c| c.matches(stored)),
        }
    }
}

/// A validated row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    Always,
    Never,
    And(Vec<RowFilter>),
    Or(Vec<RowFilter>),
    /// Matches when none of the filters match.
    Not(Vec<RowFilter>),
    Field { field: String, condition: Condition },
}

impl RowFilter {
    /// Conjunction, simplified: empty is `Always`, any `Never` wins.
    pub fn all(filters: Vec<RowFilter>) -> RowFilter {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                RowFilter::Always => {}
                RowFilter::Never => return RowFilter::Never,
                RowFilter::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => RowFilter::Always,
            1 => parts.remove(0),
            _ => RowFilter::And(parts),
        }
    }

    /// Disjunction, simplified: empty is `Never`, any `Always` wins.
    pub fn any(filters: Vec<RowFilter>) -> RowFilter {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                RowFilter::Never => {}
                RowFilter::Always => return RowFilter::Always,
                RowFilter::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => RowFilter::Never,
            1 => parts.remove(0),
            _ => RowFilter::Or(parts),
        }
    }

    pub fn none(filters: Vec<RowFilter>) -> RowFilter {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            match filter {
                RowFilter::Never => {}
                RowFilter::Always => return RowFilter::Never,
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            RowFilter::Always
        } else {
            RowFilter::Not(parts)
        }
    }

    /// Intersect with another filter.
    pub fn and(self, other: RowFilter) -> RowFilter {
        RowFilter::all(vec![self, other])
    }

    pub fn id_equals(id: &str) -> RowFilter {
        RowFilter::Field {
            field: "id".to_string(),
            condition: Condition::Equals(Scalar::String(id.to_string())),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        match self {
            RowFilter::Always => true,
            RowFilter::Never => false,
            RowFilter::And(filters) => filters.iter().all(|f| f.matches(item)),
            RowFilter::Or(filters) => filters.iter().any(|f| f.matches(item)),
            RowFilter::Not(filters) => !filters.iter().any(|f| f.matches(item)),
            RowFilter::Field { field, condition } => condition.matches(item.get(field).unwrap_or(&Value::Null)),
        }
    }
}

/// The filter shape for one list.
#[derive(Debug, Clone)]
pub struct WhereInput {
    name: String,
    fields: BTreeMap<String, ScalarKind>,
}

impl WhereInput {
    pub fn new(list_key: &str, fields: BTreeMap<String, ScalarKind>) -> Self {
        Self {
            name: format!("{list_key}WhereInput"),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, key: &str) -> Option<&ScalarKind> {
        self.fields.get(key)
    }

    /// Coerce a caller-supplied `where` value. `null` means no restriction.
    pub fn coerce(&self, value: &Value) -> Result<RowFilter, CoercionError> {
        match value {
            Value::Null => Ok(RowFilter::Always),
            Value::Object(object) => self.coerce_object(object),
            other => Err(CoercionError::expected("where", &self.name, other)),
        }
    }

    pub fn coerce_object(&self, object: &Map<String, Value>) -> Result<RowFilter, CoercionError> {
        self.coerce_where(object, "where")
    }

    fn coerce_where(&self, object: &Map<String, Value>, path: &str) -> Result<RowFilter, CoercionError> {
        let mut parts = Vec::with_capacity(object.len());
        for (key, value) in object {
            let path = format!("{path}.{key}");
            let part = match key.as_str() {
                "AND" => RowFilter::all(self.coerce_nested_list(value, &path)?),
                "OR" => RowFilter::any(self.coerce_nested_list(value, &path)?),
                "NOT" => RowFilter::none(self.coerce_nested_list(value, &path)?),
                _ => {
                    let kind = self.fields.get(key).ok_or_else(|| {
                        CoercionError::new(
                            &path,
                            format!("field \"{key}\" is not defined by type \"{}\"", self.name),
                        )
                    })?;
                    let filter = value
                        .as_object()
                        .ok_or_else(|| CoercionError::expected(&path, &format!("{}Filter", kind.type_name()), value))?;
                    let conditions = kind.coerce_conditions(filter, &path)?;
                    RowFilter::all(
                        conditions
                            .into_iter()
                            .map(|condition| RowFilter::Field {
                                field: key.clone(),
                                condition,
                            })
                            .collect(),
                    )
                }
            };
            parts.push(part);
        }
        Ok(RowFilter::all(parts))
    }

    fn coerce_nested_list(&self, value: &Value, path: &str) -> Result<Vec<RowFilter>, CoercionError> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let path = format!("{path}[{i}]");
                    item.as_object()
                        .ok_or_else(|| CoercionError::expected(&path, &self.name, item))
                        .and_then(|object| self.coerce_where(object, &path))
                })
                .collect(),
            Value::Object(object) => Ok(vec![self.coerce_where(object, path)?]),
            other => Err(CoercionError::expected(path, &format!("[{}]", self.name), other)),
        }
    }
}
