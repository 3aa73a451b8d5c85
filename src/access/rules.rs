use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::context::{RequestContext, Session};
use crate::schema::Item;

/// What a rule resolves to. The value is checked by the evaluator, so a
/// rule can return anything JSON can express.
pub type RuleFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// List operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Query,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Query,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOperation {
    Read,
    Create,
    Update,
}

impl FieldOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOperation::Read => "read",
            FieldOperation::Create => "create",
            FieldOperation::Update => "update",
        }
    }
}

impl fmt::Display for FieldOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to list-level rules (operation, filter and item).
#[derive(Debug, Clone)]
pub struct ListAccessArgs {
    pub operation: Operation,
    pub list_key: String,
    pub session: Option<Session>,
    pub context: RequestContext,
    /// Stored item, for item-level update and delete rules.
    pub item: Option<Item>,
    /// Incoming data, for item-level create and update rules.
    pub input_data: Option<Item>,
}

impl ListAccessArgs {
    pub(crate) fn new(operation: Operation, list_key: &str, ctx: &RequestContext) -> Self {
        Self {
            operation,
            list_key: list_key.to_string(),
            session: ctx.session().cloned(),
            context: ctx.clone(),
            item: None,
            input_data: None,
        }
    }
}

/// Arguments handed to field-level rules.
#[derive(Debug, Clone)]
pub struct FieldAccessArgs {
    pub operation: FieldOperation,
    pub list_key: String,
    pub field_key: String,
    pub session: Option<Session>,
    pub context: RequestContext,
    pub item: Option<Item>,
    pub input_data: Option<Item>,
}

/// An access rule. Cloning shares the underlying function.
pub struct Rule<A> {
    name: Cow<'static, str>,
    func: Arc<dyn Fn(A) -> RuleFuture + Send + Sync>,
}

pub type ListRule = Rule<ListAccessArgs>;
pub type FieldRule = Rule<FieldAccessArgs>;

impl<A: 'static> Rule<A> {
    /// Wrap an async rule.
    pub fn new<F, Fut, R>(func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Value>,
    {
        Self {
            name: Cow::Borrowed("custom"),
            func: Arc::new(move |args: A| -> RuleFuture {
                let fut = func(args);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }

    /// Wrap a synchronous rule that cannot fail.
    pub fn from_fn<F, R>(func: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        Self {
            name: Cow::Borrowed("custom"),
            func: Arc::new(move |args: A| -> RuleFuture {
                let value = func(args).into();
                Box::pin(async move { Ok(value) })
            }),
        }
    }

    pub fn allow_all() -> Self {
        Self::from_fn(|_: A| true).named("allow_all")
    }

    pub fn deny_all() -> Self {
        Self::from_fn(|_: A| false).named("deny_all")
    }

    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when both handles point at the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    pub(crate) fn call(&self, args: A) -> RuleFuture {
        (self.func)(args)
    }
}

impl<A> Clone for Rule<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<A> fmt::Debug for Rule<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rule").field(&self.name).finish()
    }
}
