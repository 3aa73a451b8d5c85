//! Turns raw access configuration into canonical policies.
//!
//! A canonical policy has every slot filled: four operation rules, three
//! filter rules (no `create`), three item rules (no `query`) for lists, and
//! `read` / `create` / `update` for fields. Unset slots take the default
//! rule, which is allow-all unless the caller supplies another.

use super::config::{FieldAccessConfig, ListAccessConfig, OperationAccess, RuleMap};
use super::error::ConfigurationError;
use super::rules::{FieldOperation, FieldRule, ListRule, Operation};

/// Rules used for slots the configuration leaves empty.
#[derive(Debug, Clone)]
pub struct DefaultRules {
    pub list: ListRule,
    pub field: FieldRule,
}

impl Default for DefaultRules {
    fn default() -> Self {
        Self {
            list: ListRule::allow_all(),
            field: FieldRule::allow_all(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationRules {
    pub query: ListRule,
    pub create: ListRule,
    pub update: ListRule,
    pub delete: ListRule,
}

impl OperationRules {
    pub fn get(&self, operation: Operation) -> &ListRule {
        match operation {
            Operation::Query => &self.query,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterRules {
    pub query: ListRule,
    pub update: ListRule,
    pub delete: ListRule,
}

impl FilterRules {
    /// `None` for `create`, which has no rows to filter.
    pub fn get(&self, operation: Operation) -> Option<&ListRule> {
        match operation {
            Operation::Query => Some(&self.query),
            Operation::Create => None,
            Operation::Update => Some(&self.update),
            Operation::Delete => Some(&self.delete),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemRules {
    pub create: ListRule,
    pub update: ListRule,
    pub delete: ListRule,
}

impl ItemRules {
    /// `None` for `query`, which never checks single items.
    pub fn get(&self, operation: Operation) -> Option<&ListRule> {
        match operation {
            Operation::Query => None,
            Operation::Create => Some(&self.create),
            Operation::Update => Some(&self.update),
            Operation::Delete => Some(&self.delete),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListAccessPolicy {
    pub operation: OperationRules,
    pub filter: FilterRules,
    pub item: ItemRules,
}

impl ListAccessPolicy {
    /// Every slot with its path, in a fixed order.
    pub fn slots(&self) -> [(&'static str, &ListRule); 10] {
        [
            ("operation.query", &self.operation.query),
            ("operation.create", &self.operation.create),
            ("operation.update", &self.operation.update),
            ("operation.delete", &self.operation.delete),
            ("filter.query", &self.filter.query),
            ("filter.update", &self.filter.update),
            ("filter.delete", &self.filter.delete),
            ("item.create", &self.item.create),
            ("item.update", &self.item.update),
            ("item.delete", &self.item.delete),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct FieldAccessPolicy {
    pub read: FieldRule,
    pub create: FieldRule,
    pub update: FieldRule,
}

impl FieldAccessPolicy {
    pub fn get(&self, operation: FieldOperation) -> &FieldRule {
        match operation {
            FieldOperation::Read => &self.read,
            FieldOperation::Create => &self.create,
            FieldOperation::Update => &self.update,
        }
    }

    pub fn slots(&self) -> [(&'static str, &FieldRule); 3] {
        [
            ("read", &self.read),
            ("create", &self.create),
            ("update", &self.update),
        ]
    }
}

pub fn normalize_list_access(
    list_key: &str,
    raw: &ListAccessConfig,
    defaults: &DefaultRules,
) -> Result<ListAccessPolicy, ConfigurationError> {
    let allow = &defaults.list;

    let granular = match raw {
        ListAccessConfig::All(rule) => {
            return Ok(ListAccessPolicy {
                operation: OperationRules {
                    query: rule.clone(),
                    create: rule.clone(),
                    update: rule.clone(),
                    delete: rule.clone(),
                },
                filter: FilterRules {
                    query: allow.clone(),
                    update: allow.clone(),
                    delete: allow.clone(),
                },
                item: ItemRules {
                    create: allow.clone(),
                    update: allow.clone(),
                    delete: allow.clone(),
                },
            });
        }
        ListAccessConfig::Granular(granular) => granular,
    };

    reject_unsupported(list_key, "filter", &granular.filter, Operation::Create)?;
    reject_unsupported(list_key, "item", &granular.item, Operation::Query)?;

    let operation = match &granular.operation {
        Some(OperationAccess::All(rule)) => OperationRules {
            query: rule.clone(),
            create: rule.clone(),
            update: rule.clone(),
            delete: rule.clone(),
        },
        Some(OperationAccess::PerOperation(rules)) => OperationRules {
            query: pick(rules, Operation::Query, allow),
            create: pick(rules, Operation::Create, allow),
            update: pick(rules, Operation::Update, allow),
            delete: pick(rules, Operation::Delete, allow),
        },
        None => OperationRules {
            query: allow.clone(),
            create: allow.clone(),
            update: allow.clone(),
            delete: allow.clone(),
        },
    };

    Ok(ListAccessPolicy {
        operation,
        filter: FilterRules {
            query: pick(&granular.filter, Operation::Query, allow),
            update: pick(&granular.filter, Operation::Update, allow),
            delete: pick(&granular.filter, Operation::Delete, allow),
        },
        item: ItemRules {
            create: pick(&granular.item, Operation::Create, allow),
            update: pick(&granular.item, Operation::Update, allow),
            delete: pick(&granular.item, Operation::Delete, allow),
        },
    })
}

pub fn normalize_field_access(raw: &FieldAccessConfig, defaults: &DefaultRules) -> FieldAccessPolicy {
    match raw {
        FieldAccessConfig::All(rule) => FieldAccessPolicy {
            read: rule.clone(),
            create: rule.clone(),
            update: rule.clone(),
        },
        FieldAccessConfig::PerOperation {
            read,
            create,
            update,
        } => {
            let or_default = |slot: &Option<FieldRule>| slot.clone().unwrap_or_else(|| defaults.field.clone());
            FieldAccessPolicy {
                read: or_default(read),
                create: or_default(create),
                update: or_default(update),
            }
        }
    }
}

fn pick(rules: &RuleMap, operation: Operation, default: &ListRule) -> ListRule {
    rules.get(&operation).unwrap_or(default).clone()
}

fn reject_unsupported(
    list_key: &str,
    granularity: &'static str,
    rules: &RuleMap,
    unsupported: Operation,
) -> Result<(), ConfigurationError> {
    if rules.contains_key(&unsupported) {
        return Err(ConfigurationError::UnsupportedGranularity {
            list_key: list_key.to_string(),
            granularity,
            operation: unsupported,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::config::GranularListAccess;

    #[test]
    fn single_rule_is_broadcast_to_operations_only() {
        let defaults = DefaultRules::default();
        let rule = ListRule::from_fn(|_| true).named("signed_in");
        let policy = normalize_list_access("Post", &ListAccessConfig::All(rule.clone()), &defaults).unwrap();

        for op in Operation::ALL {
            assert!(policy.operation.get(op).ptr_eq(&rule), "operation.{op} should be the shared rule");
        }
        for (path, slot) in &policy.slots()[4..] {
            assert!(slot.ptr_eq(&defaults.list), "{path} should be the default");
        }
    }

    #[test]
    fn empty_granular_config_is_all_defaults() {
        let defaults = DefaultRules::default();
        let policy = normalize_list_access("Post", &ListAccessConfig::default(), &defaults).unwrap();
        for (path, slot) in policy.slots() {
            assert!(slot.ptr_eq(&defaults.list), "{path} should be the default");
        }
    }

    #[test]
    fn operation_shorthand_is_broadcast_before_merging() {
        let defaults = DefaultRules::default();
        let shared = ListRule::from_fn(|_| true);
        let deny_delete = ListRule::deny_all();
        let filter = ListRule::from_fn(|_| serde_json::json!({}));

        let raw = GranularListAccess::new()
            .operation(shared.clone())
            .operation_rule(Operation::Delete, deny_delete.clone())
            .filter(Operation::Query, filter.clone());
        let policy = normalize_list_access("Post", &raw.into(), &defaults).unwrap();

        assert!(policy.operation.query.ptr_eq(&shared));
        assert!(policy.operation.create.ptr_eq(&shared));
        assert!(policy.operation.update.ptr_eq(&shared));
        assert!(policy.operation.delete.ptr_eq(&deny_delete));
        assert!(policy.filter.query.ptr_eq(&filter));
        assert!(policy.filter.update.ptr_eq(&defaults.list));
        assert!(policy.item.update.ptr_eq(&defaults.list));
    }

    #[test]
    fn operation_map_shorthand_keeps_unset_slots_default() {
        let defaults = DefaultRules::default();
        let query = ListRule::from_fn(|_| true);
        let delete = ListRule::deny_all();
        let rules: RuleMap = [(Operation::Query, query.clone()), (Operation::Delete, delete.clone())]
            .into_iter()
            .collect();
        let policy = normalize_list_access("Post", &rules.into(), &defaults).unwrap();

        assert!(policy.operation.query.ptr_eq(&query));
        assert!(policy.operation.delete.ptr_eq(&delete));
        assert!(policy.operation.create.ptr_eq(&defaults.list));
        assert!(policy.operation.update.ptr_eq(&defaults.list));
        for (path, slot) in &policy.slots()[4..] {
            assert!(slot.ptr_eq(&defaults.list), "{path} should be the default");
        }
    }

    #[test]
    fn filter_on_create_is_a_configuration_error() {
        let raw = GranularListAccess::new().filter(Operation::Create, ListRule::allow_all());
        let err = normalize_list_access("Order", &raw.into(), &DefaultRules::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnsupportedGranularity {
                list_key: "Order".to_string(),
                granularity: "filter",
                operation: Operation::Create,
            }
        );
        assert!(err.to_string().starts_with("Order.access.filter.create"));
    }

    #[test]
    fn item_on_query_is_a_configuration_error() {
        let raw = GranularListAccess::new().item(Operation::Query, ListRule::allow_all());
        let err = normalize_list_access("Order", &raw.into(), &DefaultRules::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnsupportedGranularity { granularity: "item", operation: Operation::Query, .. }
        ));
    }

    #[test]
    fn custom_default_fills_unset_slots() {
        let defaults = DefaultRules {
            list: ListRule::deny_all(),
            field: FieldRule::deny_all(),
        };
        let policy = normalize_list_access("Post", &ListAccessConfig::default(), &defaults).unwrap();
        assert_eq!(policy.operation.query.name(), "deny_all");

        let field = normalize_field_access(&FieldAccessConfig::default(), &defaults);
        assert_eq!(field.read.name(), "deny_all");
    }

    #[test]
    fn field_rules_broadcast_or_default() {
        let defaults = DefaultRules::default();
        let rule = FieldRule::from_fn(|_| false);

        let all = normalize_field_access(&FieldAccessConfig::All(rule.clone()), &defaults);
        for (path, slot) in all.slots() {
            assert!(slot.ptr_eq(&rule), "{path} should be the shared rule");
        }

        let partial = normalize_field_access(&FieldAccessConfig::default().update(rule.clone()), &defaults);
        assert!(partial.update.ptr_eq(&rule));
        assert!(partial.read.ptr_eq(&defaults.field));
        assert!(partial.create.ptr_eq(&defaults.field));
    }

    #[test]
    fn normalization_is_deterministic() {
        let defaults = DefaultRules::default();
        let filter = ListRule::from_fn(|_| false);
        let raw: ListAccessConfig = GranularListAccess::new().filter(Operation::Update, filter).into();

        let first = normalize_list_access("Post", &raw, &defaults).unwrap();
        let second = normalize_list_access("Post", &raw, &defaults).unwrap();
        for ((path, a), (_, b)) in first.slots().into_iter().zip(second.slots()) {
            assert!(a.ptr_eq(b), "{path} differs between runs");
        }
    }
}
