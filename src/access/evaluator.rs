use std::time::Duration;

use serde_json::Value;

use super::context::RequestContext;
use super::decision::{classify, classify_boolean, AccessDecision, Granularity, ReturnTypeMismatch, Verdict};
use super::error::{AccessError, AccessFailure, ConfigurationError, FailureKind};
use super::rules::{FieldAccessArgs, FieldOperation, ListAccessArgs, Operation, Rule};
use crate::schema::{Field, Item, List, RowFilter};

/// Evaluator options.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Upper bound on a single rule evaluation.
    pub rule_timeout: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            rule_timeout: Duration::from_secs(30),
        }
    }
}

impl EvaluatorConfig {
    pub fn with_rule_timeout(mut self, rule_timeout: Duration) -> Self {
        self.rule_timeout = rule_timeout;
        self
    }
}

/// The item an item-level or field-level rule is about.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemContext<'a> {
    /// The stored item (update, delete, read).
    pub item: Option<&'a Item>,
    /// The incoming data (create, update).
    pub input_data: Option<&'a Item>,
}

/// Runs canonical rules against a request and classifies what they return.
///
/// Holds no per-request state; one instance serves every request.
#[derive(Debug, Clone, Default)]
pub struct AccessEvaluator {
    config: EvaluatorConfig,
}

impl AccessEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Operation-level check. `false` rejects the operation outright.
    pub async fn evaluate_operation(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
    ) -> Result<bool, AccessError> {
        let tag = format!("{}.access.operation.{}", list.key(), operation);
        let rule = list.access().operation.get(operation);
        let args = ListAccessArgs::new(operation, list.key(), ctx);

        let value = self.run(rule, args, ctx, &tag).await?;
        let allowed = classify_boolean(Granularity::Operation, value)
            .map_err(|mismatch| invalid_return(&tag, mismatch))?;

        tracing::debug!(list_key = %list.key(), operation = %operation, allowed, "operation access evaluated");
        Ok(allowed)
    }

    /// Filter-level check for `query`, `update` or `delete`.
    ///
    /// A returned object is coerced against the list's where input. An empty
    /// object is the same as `true`.
    pub async fn evaluate_filter(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
    ) -> Result<AccessDecision, AccessError> {
        let rule = list
            .access()
            .filter
            .get(operation)
            .ok_or_else(|| unsupported(list, "filter", operation))?;
        let tag = format!("{}.access.filter.{}", list.key(), operation);
        let args = ListAccessArgs::new(operation, list.key(), ctx);

        let value = self.run(rule, args, ctx, &tag).await?;
        let decision = match classify(Granularity::Filter, value) {
            Ok(Verdict::Allow) => AccessDecision::Allowed,
            Ok(Verdict::Deny) => AccessDecision::Denied,
            Ok(Verdict::Filter(object)) => match list.where_input().coerce_object(&object) {
                Ok(RowFilter::Always) => AccessDecision::Allowed,
                Ok(filter) => AccessDecision::AllowedWithFilter(filter),
                Err(error) => {
                    let failure = AccessFailure::new(tag, FailureKind::InvalidFilterShape(error));
                    tracing::warn!(tag = %failure.tag, error = %failure.kind, "access filter failed validation");
                    return Err(failure.into());
                }
            },
            Err(mismatch) => return Err(invalid_return(&tag, mismatch)),
        };

        tracing::debug!(list_key = %list.key(), operation = %operation, decision = ?decision, "filter access evaluated");
        Ok(decision)
    }

    /// Item-level check for `create`, `update` or `delete`.
    pub async fn evaluate_item(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
        item_ctx: ItemContext<'_>,
    ) -> Result<bool, AccessError> {
        let rule = list
            .access()
            .item
            .get(operation)
            .ok_or_else(|| unsupported(list, "item", operation))?;
        let tag = format!("{}.access.item.{}", list.key(), operation);
        let mut args = ListAccessArgs::new(operation, list.key(), ctx);
        args.item = item_ctx.item.cloned();
        args.input_data = item_ctx.input_data.cloned();

        let value = self.run(rule, args, ctx, &tag).await?;
        let allowed = classify_boolean(Granularity::Item, value)
            .map_err(|mismatch| invalid_return(&tag, mismatch))?;

        tracing::debug!(list_key = %list.key(), operation = %operation, allowed, "item access evaluated");
        Ok(allowed)
    }

    /// Field-level check for a single field.
    pub async fn evaluate_field(
        &self,
        list: &List,
        field: &Field,
        ctx: &RequestContext,
        operation: FieldOperation,
        item_ctx: ItemContext<'_>,
    ) -> Result<bool, AccessError> {
        self.field_decision(list, field, ctx, operation, item_ctx)
            .await
            .map_err(AccessError::single)
    }

    /// Field-level checks for several fields of one item.
    ///
    /// Every field is evaluated even after a failure, so that all failures
    /// are reported together. Returns each field key with its decision.
    pub async fn evaluate_fields<'f>(
        &self,
        list: &List,
        fields: impl IntoIterator<Item = &'f Field>,
        ctx: &RequestContext,
        operation: FieldOperation,
        item_ctx: ItemContext<'_>,
    ) -> Result<Vec<(String, bool)>, AccessError> {
        let mut decisions = Vec::new();
        let mut failures = Vec::new();
        for field in fields {
            match self.field_decision(list, field, ctx, operation, item_ctx).await {
                Ok(allowed) => decisions.push((field.key().to_string(), allowed)),
                Err(failure) if failure.kind.is_cancellation() => return Err(failure.into()),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(decisions)
        } else {
            Err(AccessError::Failed(failures))
        }
    }

    async fn field_decision(
        &self,
        list: &List,
        field: &Field,
        ctx: &RequestContext,
        operation: FieldOperation,
        item_ctx: ItemContext<'_>,
    ) -> Result<bool, AccessFailure> {
        let tag = format!("{}.{}.access.{}", list.key(), field.key(), operation);
        let args = FieldAccessArgs {
            operation,
            list_key: list.key().to_string(),
            field_key: field.key().to_string(),
            session: ctx.session().cloned(),
            context: ctx.clone(),
            item: item_ctx.item.cloned(),
            input_data: item_ctx.input_data.cloned(),
        };

        let value = self.invoke(field.access().get(operation), args, ctx, &tag).await?;
        classify_boolean(Granularity::Field, value).map_err(|mismatch| {
            let failure = AccessFailure::new(
                tag,
                FailureKind::InvalidReturnType {
                    returned: mismatch.returned,
                    expected: mismatch.expected,
                },
            );
            tracing::warn!(tag = %failure.tag, returned = mismatch.returned, "access rule returned an invalid type");
            failure
        })
    }

    async fn run<A: 'static>(
        &self,
        rule: &Rule<A>,
        args: A,
        ctx: &RequestContext,
        tag: &str,
    ) -> Result<Value, AccessError> {
        self.invoke(rule, args, ctx, tag).await.map_err(AccessError::single)
    }

    /// Await a rule, giving up when the request is cancelled or the rule
    /// exceeds its timeout.
    async fn invoke<A: 'static>(
        &self,
        rule: &Rule<A>,
        args: A,
        ctx: &RequestContext,
        tag: &str,
    ) -> Result<Value, AccessFailure> {
        if ctx.is_cancelled() {
            return Err(AccessFailure::new(tag, FailureKind::Cancelled));
        }

        let timeout = self.config.rule_timeout;
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(FailureKind::Cancelled),
            result = tokio::time::timeout(timeout, rule.call(args)) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(FailureKind::EvaluationThrew(error)),
                Err(_) => Err(FailureKind::TimedOut {
                    duration_ms: timeout.as_millis() as u64,
                }),
            },
        };

        outcome.map_err(|kind| {
            tracing::warn!(tag = %tag, rule = rule.name(), code = kind.code(), error = %kind, "access rule failed");
            AccessFailure::new(tag, kind)
        })
    }
}

fn invalid_return(tag: &str, mismatch: ReturnTypeMismatch) -> AccessError {
    tracing::warn!(tag = %tag, returned = mismatch.returned, "access rule returned an invalid type");
    AccessFailure::new(
        tag,
        FailureKind::InvalidReturnType {
            returned: mismatch.returned,
            expected: mismatch.expected,
        },
    )
    .into()
}

fn unsupported(list: &List, granularity: &'static str, operation: Operation) -> AccessError {
    ConfigurationError::UnsupportedGranularity {
        list_key: list.key().to_string(),
        granularity,
        operation,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::access::{FieldAccessConfig, FieldRule, GranularListAccess, ListRule, Session};
    use crate::schema::{Condition, FieldConfig, ListConfig, Scalar, Schema};

    fn schema_with(access: GranularListAccess) -> Schema {
        Schema::new(vec![ListConfig::new("Order")
            .access(access)
            .field("ownerId", FieldConfig::text())
            .field(
                "internalNote",
                FieldConfig::text().access(FieldAccessConfig::default().read(FieldRule::from_fn(
                    |args: FieldAccessArgs| args.session.map(|s| s.flag("isAdmin")).unwrap_or(false),
                ))),
            )])
        .unwrap()
    }

    fn order(schema: &Schema) -> &List {
        schema.list("Order").unwrap()
    }

    #[tokio::test]
    async fn operation_rule_booleans_are_decisions() {
        let schema = schema_with(
            GranularListAccess::new()
                .operation_rule(Operation::Query, ListRule::allow_all())
                .operation_rule(Operation::Delete, ListRule::deny_all()),
        );
        let evaluator = AccessEvaluator::default();
        let ctx = RequestContext::new();

        assert!(evaluator.evaluate_operation(order(&schema), &ctx, Operation::Query).await.unwrap());
        assert!(!evaluator.evaluate_operation(order(&schema), &ctx, Operation::Delete).await.unwrap());
    }

    #[tokio::test]
    async fn operation_rule_returning_string_is_invalid() {
        let schema = schema_with(GranularListAccess::new().operation(ListRule::from_fn(|_| "yes")));
        let err = AccessEvaluator::default()
            .evaluate_operation(order(&schema), &RequestContext::new(), Operation::Update)
            .await
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].tag, "Order.access.operation.update");
        assert!(matches!(
            failures[0].kind,
            FailureKind::InvalidReturnType { returned: "string", expected: "boolean" }
        ));
    }

    #[tokio::test]
    async fn operation_rule_errors_are_wrapped_with_tag() {
        let schema = schema_with(GranularListAccess::new().operation(ListRule::new(|_| async {
            Err::<bool, _>(anyhow::anyhow!("session store unreachable"))
        })));
        let err = AccessEvaluator::default()
            .evaluate_operation(order(&schema), &RequestContext::new(), Operation::Query)
            .await
            .unwrap_err();

        let extensions = err.extensions();
        assert_eq!(extensions[0].tag, "Order.access.operation.query");
        assert_eq!(extensions[0].code, "EVALUATION_THREW");
        assert_eq!(extensions[0].message, "session store unreachable");
    }

    #[tokio::test]
    async fn operation_rule_receives_argument_bundle() {
        let schema = schema_with(GranularListAccess::new().operation(ListRule::from_fn(|args: ListAccessArgs| {
            args.list_key == "Order"
                && args.operation == Operation::Create
                && args.session.as_ref().and_then(|s| s.id()) == Some("u1")
        })));
        let ctx = RequestContext::new().with_session(Session::new(json!({"id": "u1"})));
        assert!(AccessEvaluator::default()
            .evaluate_operation(order(&schema), &ctx, Operation::Create)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn filter_rule_objects_are_coerced() {
        let schema = schema_with(GranularListAccess::new().filter(
            Operation::Query,
            ListRule::from_fn(|args: ListAccessArgs| {
                json!({"ownerId": {"equals": args.session.and_then(|s| s.id().map(str::to_string))}})
            }),
        ));
        let ctx = RequestContext::new().with_session(Session::new(json!({"id": "u1"})));
        let decision = AccessEvaluator::default()
            .evaluate_filter(order(&schema), &ctx, Operation::Query)
            .await
            .unwrap();

        assert_eq!(
            decision,
            AccessDecision::AllowedWithFilter(RowFilter::Field {
                field: "ownerId".to_string(),
                condition: Condition::Equals(Scalar::String("u1".to_string())),
            })
        );
    }

    #[tokio::test]
    async fn filter_rule_empty_object_and_booleans() {
        let evaluator = AccessEvaluator::default();
        let ctx = RequestContext::new();

        let empty = schema_with(GranularListAccess::new().filter(Operation::Update, ListRule::from_fn(|_| json!({}))));
        assert_eq!(
            evaluator.evaluate_filter(order(&empty), &ctx, Operation::Update).await.unwrap(),
            AccessDecision::Allowed
        );

        let deny = schema_with(GranularListAccess::new().filter(Operation::Delete, ListRule::deny_all()));
        let decision = evaluator.evaluate_filter(order(&deny), &ctx, Operation::Delete).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.into_filter(), RowFilter::Never);
    }

    #[tokio::test]
    async fn filter_rule_unknown_field_is_invalid_shape() {
        let schema = schema_with(
            GranularListAccess::new().filter(Operation::Query, ListRule::from_fn(|_| json!({"unknownField": 1}))),
        );
        let err = AccessEvaluator::default()
            .evaluate_filter(order(&schema), &RequestContext::new(), Operation::Query)
            .await
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures[0].tag, "Order.access.filter.query");
        assert!(matches!(failures[0].kind, FailureKind::InvalidFilterShape(_)));
    }

    #[tokio::test]
    async fn filter_rule_null_is_invalid_return_type() {
        let schema = schema_with(
            GranularListAccess::new().filter(Operation::Query, ListRule::from_fn(|_| Value::Null)),
        );
        let err = AccessEvaluator::default()
            .evaluate_filter(order(&schema), &RequestContext::new(), Operation::Query)
            .await
            .unwrap_err();
        assert!(matches!(
            err.failures()[0].kind,
            FailureKind::InvalidReturnType { returned: "null", .. }
        ));
    }

    #[tokio::test]
    async fn filter_for_create_is_a_configuration_error() {
        let schema = schema_with(GranularListAccess::new());
        let err = AccessEvaluator::default()
            .evaluate_filter(order(&schema), &RequestContext::new(), Operation::Create)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::Configuration(ConfigurationError::UnsupportedGranularity {
                granularity: "filter",
                operation: Operation::Create,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn item_rule_sees_item_and_input() {
        let schema = schema_with(GranularListAccess::new().item(
            Operation::Update,
            ListRule::from_fn(|args: ListAccessArgs| {
                let owner = args.item.as_ref().and_then(|i| i.get("ownerId")).cloned();
                let changes_owner = args.input_data.as_ref().is_some_and(|d| d.contains_key("ownerId"));
                owner == Some(json!("u1")) && !changes_owner
            }),
        ));
        let evaluator = AccessEvaluator::default();
        let ctx = RequestContext::new();
        let item = json!({"id": "1", "ownerId": "u1"}).as_object().cloned().unwrap();
        let note = json!({"internalNote": "x"}).as_object().cloned().unwrap();
        let steal = json!({"ownerId": "u2"}).as_object().cloned().unwrap();

        let allowed = evaluator
            .evaluate_item(order(&schema), &ctx, Operation::Update, ItemContext { item: Some(&item), input_data: Some(&note) })
            .await
            .unwrap();
        assert!(allowed);

        let denied = evaluator
            .evaluate_item(order(&schema), &ctx, Operation::Update, ItemContext { item: Some(&item), input_data: Some(&steal) })
            .await
            .unwrap();
        assert!(!denied);

        let err = evaluator
            .evaluate_item(order(&schema), &ctx, Operation::Query, ItemContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Configuration(_)));
    }

    #[tokio::test]
    async fn field_rules_are_per_field() {
        let schema = schema_with(GranularListAccess::new());
        let list = order(&schema);
        let evaluator = AccessEvaluator::default();
        let item = json!({"id": "1", "ownerId": "u1", "internalNote": "x"}).as_object().cloned().unwrap();
        let item_ctx = ItemContext { item: Some(&item), input_data: None };

        let anonymous = RequestContext::new();
        let decisions = evaluator
            .evaluate_fields(list, list.fields(), &anonymous, FieldOperation::Read, item_ctx)
            .await
            .unwrap();
        assert_eq!(
            decisions,
            vec![("ownerId".to_string(), true), ("internalNote".to_string(), false)]
        );

        let admin = RequestContext::new().with_session(Session::new(json!({"id": "a", "isAdmin": true})));
        let note = list.field("internalNote").unwrap();
        assert!(evaluator
            .evaluate_field(list, note, &admin, FieldOperation::Read, item_ctx)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn field_failures_are_collected() {
        let broken = FieldRule::from_fn(|_| 1);
        let schema = Schema::new(vec![ListConfig::new("Order")
            .field("a", FieldConfig::text().access(broken.clone()))
            .field("b", FieldConfig::text())
            .field("c", FieldConfig::text().access(broken))])
        .unwrap();
        let list = order(&schema);

        let err = AccessEvaluator::default()
            .evaluate_fields(list, list.fields(), &RequestContext::new(), FieldOperation::Create, ItemContext::default())
            .await
            .unwrap_err();
        let tags: Vec<_> = err.failures().iter().map(|f| f.tag.as_str()).collect();
        assert_eq!(tags, vec!["Order.a.access.create", "Order.c.access.create"]);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let schema = schema_with(GranularListAccess::new().operation(ListRule::from_fn(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            true
        })));
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::new().with_cancellation(token);

        let err = AccessEvaluator::default()
            .evaluate_operation(order(&schema), &ctx, Operation::Query)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_a_slow_rule() {
        let schema = schema_with(GranularListAccess::new().operation(ListRule::new(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, anyhow::Error>(true)
        })));
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = AccessEvaluator::default()
            .evaluate_operation(order(&schema), &ctx, Operation::Query)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err.failures()[0].kind, FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn slow_rules_time_out() {
        let schema = schema_with(GranularListAccess::new().filter(
            Operation::Query,
            ListRule::new(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, anyhow::Error>(true)
            }),
        ));
        let evaluator = AccessEvaluator::new(EvaluatorConfig::default().with_rule_timeout(Duration::from_millis(10)));
        let err = evaluator
            .evaluate_filter(order(&schema), &RequestContext::new(), Operation::Query)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.extensions()[0].code, "TIMED_OUT");
    }
}
