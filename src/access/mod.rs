//! Access control for lists and fields.
//!
//! Raw configuration ([`ListAccessConfig`], [`FieldAccessConfig`]) is
//! normalized once at schema build time into canonical policies. At request
//! time the [`AccessEvaluator`] runs the canonical rules and turns whatever
//! they return into decisions or tagged failures.

mod config;
mod context;
mod decision;
mod error;
mod evaluator;
mod normalize;
mod rules;

pub use config::{FieldAccessConfig, GranularListAccess, ListAccessConfig, OperationAccess, RuleMap};
pub use context::{RequestContext, Session};
pub use decision::{classify, classify_boolean, type_name, AccessDecision, Granularity, ReturnTypeMismatch, Verdict};
pub use error::{
    cannot_for_item, cannot_for_item_fields, AccessError, AccessFailure, ConfigurationError, ExtensionError,
    FailureKind,
};
pub use evaluator::{AccessEvaluator, EvaluatorConfig, ItemContext};
pub use normalize::{
    normalize_field_access, normalize_list_access, DefaultRules, FieldAccessPolicy, FilterRules, ItemRules,
    ListAccessPolicy, OperationRules,
};
pub use rules::{FieldAccessArgs, FieldOperation, FieldRule, ListAccessArgs, ListRule, Operation, Rule, RuleFuture};
