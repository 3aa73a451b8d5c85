//! User-authored access configuration, in every shorthand shape it may take.
//!
//! Nothing here is evaluated directly. [`super::normalize`] turns these into
//! canonical policies once, at load time.

use std::collections::BTreeMap;

use super::rules::{FieldRule, ListRule, Operation};

pub type RuleMap = BTreeMap<Operation, ListRule>;

/// Access configuration for a list.
#[derive(Debug, Clone)]
pub enum ListAccessConfig {
    /// One rule for every operation. Filter and item checks use the default.
    All(ListRule),
    Granular(GranularListAccess),
}

impl Default for ListAccessConfig {
    fn default() -> Self {
        ListAccessConfig::Granular(GranularListAccess::default())
    }
}

impl From<ListRule> for ListAccessConfig {
    fn from(rule: ListRule) -> Self {
        ListAccessConfig::All(rule)
    }
}

impl From<GranularListAccess> for ListAccessConfig {
    fn from(access: GranularListAccess) -> Self {
        ListAccessConfig::Granular(access)
    }
}

/// Per-operation rules only. Filter and item checks use the default.
impl From<RuleMap> for ListAccessConfig {
    fn from(rules: RuleMap) -> Self {
        ListAccessConfig::Granular(GranularListAccess {
            operation: Some(OperationAccess::PerOperation(rules)),
            ..Default::default()
        })
    }
}

/// The `operation` / `filter` / `item` shape.
///
/// `filter` and `item` are keyed by operation so that unsupported pairs
/// (`filter.create`, `item.query`) can be written and then rejected by
/// normalization with a proper error.
#[derive(Debug, Clone, Default)]
pub struct GranularListAccess {
    pub operation: Option<OperationAccess>,
    pub filter: RuleMap,
    pub item: RuleMap,
}

impl GranularListAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, access: impl Into<OperationAccess>) -> Self {
        self.operation = Some(access.into());
        self
    }

    /// Set the operation rule for a single operation.
    ///
    /// When a single rule was set for all operations it is broadcast first,
    /// so the other operations keep it.
    pub fn operation_rule(mut self, operation: Operation, rule: ListRule) -> Self {
        let mut rules = match self.operation.take() {
            Some(OperationAccess::PerOperation(rules)) => rules,
            Some(OperationAccess::All(shared)) => Operation::ALL
                .into_iter()
                .map(|op| (op, shared.clone()))
                .collect(),
            None => RuleMap::new(),
        };
        rules.insert(operation, rule);
        self.operation = Some(OperationAccess::PerOperation(rules));
        self
    }

    pub fn filter(mut self, operation: Operation, rule: ListRule) -> Self {
        self.filter.insert(operation, rule);
        self
    }

    pub fn item(mut self, operation: Operation, rule: ListRule) -> Self {
        self.item.insert(operation, rule);
        self
    }
}

/// The value of the `operation` key.
#[derive(Debug, Clone)]
pub enum OperationAccess {
    All(ListRule),
    PerOperation(RuleMap),
}

impl From<ListRule> for OperationAccess {
    fn from(rule: ListRule) -> Self {
        OperationAccess::All(rule)
    }
}

impl From<RuleMap> for OperationAccess {
    fn from(rules: RuleMap) -> Self {
        OperationAccess::PerOperation(rules)
    }
}

/// Access configuration for a field.
#[derive(Debug, Clone)]
pub enum FieldAccessConfig {
    All(FieldRule),
    PerOperation {
        read: Option<FieldRule>,
        create: Option<FieldRule>,
        update: Option<FieldRule>,
    },
}

impl Default for FieldAccessConfig {
    fn default() -> Self {
        FieldAccessConfig::PerOperation {
            read: None,
            create: None,
            update: None,
        }
    }
}

impl From<FieldRule> for FieldAccessConfig {
    fn from(rule: FieldRule) -> Self {
        FieldAccessConfig::All(rule)
    }
}

impl FieldAccessConfig {
    pub fn read(self, rule: FieldRule) -> Self {
        self.with_slot(|read, _, _| *read = Some(rule))
    }

    pub fn create(self, rule: FieldRule) -> Self {
        self.with_slot(|_, create, _| *create = Some(rule))
    }

    pub fn update(self, rule: FieldRule) -> Self {
        self.with_slot(|_, _, update| *update = Some(rule))
    }

    fn with_slot(
        self,
        set: impl FnOnce(&mut Option<FieldRule>, &mut Option<FieldRule>, &mut Option<FieldRule>),
    ) -> Self {
        let (mut read, mut create, mut update) = match self {
            FieldAccessConfig::All(rule) => (Some(rule.clone()), Some(rule.clone()), Some(rule)),
            FieldAccessConfig::PerOperation {
                read,
                create,
                update,
            } => (read, create, update),
        };
        set(&mut read, &mut create, &mut update);
        FieldAccessConfig::PerOperation {
            read,
            create,
            update,
        }
    }
}
