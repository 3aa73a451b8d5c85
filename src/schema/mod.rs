//! List and field definitions, and the immutable schema built from them.

mod filter;

pub use filter::{CoercionError, Condition, RowFilter, Scalar, ScalarKind, WhereInput};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::access::{
    normalize_field_access, normalize_list_access, ConfigurationError, DefaultRules, FieldAccessConfig,
    FieldAccessPolicy, ListAccessConfig, ListAccessPolicy,
};

/// A stored row: a JSON object with an `id` entry.
pub type Item = Map<String, Value>;

const RESERVED_FIELD_NAMES: [&str; 4] = ["id", "AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Checkbox,
    Timestamp,
    Select(Vec<String>),
}

impl FieldType {
    fn scalar_kind(&self) -> ScalarKind {
        match self {
            FieldType::Text => ScalarKind::String,
            FieldType::Integer => ScalarKind::Int,
            FieldType::Float => ScalarKind::Float,
            FieldType::Checkbox => ScalarKind::Boolean,
            FieldType::Timestamp => ScalarKind::DateTime,
            FieldType::Select(options) => ScalarKind::Enum(options.clone().into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldConfig {
    field_type: FieldType,
    access: FieldAccessConfig,
    is_filterable: bool,
}

impl FieldConfig {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            access: FieldAccessConfig::default(),
            is_filterable: true,
        }
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    pub fn checkbox() -> Self {
        Self::new(FieldType::Checkbox)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldType::Timestamp)
    }

    pub fn select<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldType::Select(options.into_iter().map(Into::into).collect()))
    }

    pub fn access(mut self, access: impl Into<FieldAccessConfig>) -> Self {
        self.access = access.into();
        self
    }

    /// Keep the field out of the where input.
    pub fn filterable(mut self, is_filterable: bool) -> Self {
        self.is_filterable = is_filterable;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ListConfig {
    key: String,
    access: ListAccessConfig,
    fields: Vec<(String, FieldConfig)>,
}

impl ListConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            access: ListAccessConfig::default(),
            fields: Vec::new(),
        }
    }

    pub fn access(mut self, access: impl Into<ListAccessConfig>) -> Self {
        self.access = access.into();
        self
    }

    pub fn field(mut self, key: impl Into<String>, field: FieldConfig) -> Self {
        self.fields.push((key.into(), field));
        self
    }
}

#[derive(Debug)]
pub struct Field {
    key: String,
    field_type: FieldType,
    access: FieldAccessPolicy,
    is_filterable: bool,
}

impl Field {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn access(&self) -> &FieldAccessPolicy {
        &self.access
    }

    pub fn is_filterable(&self) -> bool {
        self.is_filterable
    }
}

/// A list after loading: canonical access policy, fields and where input.
#[derive(Debug)]
pub struct List {
    key: String,
    access: ListAccessPolicy,
    fields: Vec<Field>,
    where_input: WhereInput,
}

impl List {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn access(&self) -> &ListAccessPolicy {
        &self.access
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn where_input(&self) -> &WhereInput {
        &self.where_input
    }

    /// Validate mutation input: an object of known, writable fields whose
    /// values fit the field types. `null` clears a field.
    pub fn coerce_input(&self, data: &Value) -> Result<Item, CoercionError> {
        let object = data.as_object().ok_or_else(|| CoercionError {
            path: "data".to_string(),
            message: format!("expected object, found {}", crate::access::type_name(data)),
        })?;

        let mut item = Item::new();
        for (key, value) in object {
            let path = format!("data.{key}");
            let field = self.field(key).ok_or_else(|| CoercionError {
                path: path.clone(),
                message: format!("field \"{key}\" is not defined by list \"{}\"", self.key),
            })?;
            let coerced = if value.is_null() {
                Value::Null
            } else {
                field.field_type.scalar_kind().coerce(value, &path)?.to_json()
            };
            item.insert(key.clone(), coerced);
        }
        Ok(item)
    }
}

/// Every list, keyed by list key. Built once and shared read-only.
#[derive(Debug, Default)]
pub struct Schema {
    lists: BTreeMap<String, Arc<List>>,
}

impl Schema {
    pub fn new(configs: Vec<ListConfig>) -> Result<Self, ConfigurationError> {
        Self::with_defaults(configs, &DefaultRules::default())
    }

    pub fn with_defaults(configs: Vec<ListConfig>, defaults: &DefaultRules) -> Result<Self, ConfigurationError> {
        let mut lists = BTreeMap::new();
        for config in configs {
            let list = build_list(config, defaults)?;
            if lists.contains_key(&list.key) {
                return Err(ConfigurationError::DuplicateList(list.key));
            }
            tracing::debug!(list_key = %list.key, fields = list.fields.len(), "list access normalized");
            lists.insert(list.key.clone(), Arc::new(list));
        }
        Ok(Self { lists })
    }

    pub fn list(&self, key: &str) -> Option<&Arc<List>> {
        self.lists.get(key)
    }

    pub fn lists(&self) -> impl Iterator<Item = &Arc<List>> {
        self.lists.values()
    }
}

fn build_list(config: ListConfig, defaults: &DefaultRules) -> Result<List, ConfigurationError> {
    let ListConfig { key, access, fields } = config;

    if !is_valid_list_key(&key) {
        return Err(ConfigurationError::InvalidListKey(key));
    }

    let access = normalize_list_access(&key, &access, defaults)?;

    let mut seen = HashSet::new();
    let mut where_fields = BTreeMap::new();
    where_fields.insert("id".to_string(), ScalarKind::Id);

    let mut built = Vec::with_capacity(fields.len());
    for (field_key, field) in fields {
        if !is_valid_field_name(&field_key) {
            return Err(ConfigurationError::InvalidFieldName {
                list_key: key,
                field_key,
            });
        }
        if !seen.insert(field_key.clone()) {
            return Err(ConfigurationError::DuplicateField {
                list_key: key,
                field_key,
            });
        }
        if matches!(&field.field_type, FieldType::Select(options) if options.is_empty()) {
            return Err(ConfigurationError::EmptySelect {
                list_key: key,
                field_key,
            });
        }

        if field.is_filterable {
            where_fields.insert(field_key.clone(), field.field_type.scalar_kind());
        }
        built.push(Field {
            access: normalize_field_access(&field.access, defaults),
            key: field_key,
            field_type: field.field_type,
            is_filterable: field.is_filterable,
        });
    }

    Ok(List {
        where_input: WhereInput::new(&key, where_fields),
        key,
        access,
        fields: built,
    })
}

fn is_valid_list_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase()) && chars.all(|c| c.is_ascii_alphanumeric())
}

fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !RESERVED_FIELD_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{GranularListAccess, ListRule, Operation};
    use serde_json::json;

    fn order() -> ListConfig {
        ListConfig::new("Order")
            .field("ownerId", FieldConfig::text())
            .field("total", FieldConfig::float())
            .field("secret", FieldConfig::text().filterable(false))
            .field("status", FieldConfig::select(["pending", "shipped"]))
    }

    #[test]
    fn builds_where_input_from_filterable_fields() {
        let schema = Schema::new(vec![order()]).unwrap();
        let list = schema.list("Order").unwrap();
        assert_eq!(list.where_input().name(), "OrderWhereInput");
        assert_eq!(list.where_input().field("id"), Some(&ScalarKind::Id));
        assert_eq!(list.where_input().field("total"), Some(&ScalarKind::Float));
        assert!(list.where_input().field("secret").is_none());
        assert_eq!(list.fields().len(), 4);
    }

    #[test]
    fn rejects_malformed_configuration() {
        let duplicate = Schema::new(vec![order(), order()]).unwrap_err();
        assert_eq!(duplicate, ConfigurationError::DuplicateList("Order".to_string()));

        let bad_key = Schema::new(vec![ListConfig::new("order")]).unwrap_err();
        assert_eq!(bad_key, ConfigurationError::InvalidListKey("order".to_string()));

        let reserved = Schema::new(vec![ListConfig::new("Order").field("id", FieldConfig::text())]).unwrap_err();
        assert!(matches!(reserved, ConfigurationError::InvalidFieldName { .. }));

        let twice = Schema::new(vec![ListConfig::new("Order")
            .field("a", FieldConfig::text())
            .field("a", FieldConfig::integer())])
        .unwrap_err();
        assert!(matches!(twice, ConfigurationError::DuplicateField { .. }));

        let empty = Schema::new(vec![ListConfig::new("Order").field("s", FieldConfig::select(Vec::<String>::new()))])
            .unwrap_err();
        assert!(matches!(empty, ConfigurationError::EmptySelect { .. }));

        let filter_on_create = Schema::new(vec![ListConfig::new("Order").access(
            GranularListAccess::new().filter(Operation::Create, ListRule::allow_all()),
        )])
        .unwrap_err();
        assert!(matches!(filter_on_create, ConfigurationError::UnsupportedGranularity { .. }));
    }

    #[test]
    fn coerces_mutation_input() {
        let schema = Schema::new(vec![order()]).unwrap();
        let list = schema.list("Order").unwrap();

        let item = list
            .coerce_input(&json!({"ownerId": "a", "total": 3, "status": null}))
            .unwrap();
        assert_eq!(item.get("total"), Some(&json!(3.0)));
        assert_eq!(item.get("status"), Some(&Value::Null));

        let err = list.coerce_input(&json!({"id": "x"})).unwrap_err();
        assert_eq!(err.path, "data.id");

        let err = list.coerce_input(&json!({"status": "lost"})).unwrap_err();
        assert_eq!(err.path, "data.status");

        let err = list.coerce_input(&json!([1])).unwrap_err();
        assert_eq!(err.message, "expected object, found array");
    }
}
