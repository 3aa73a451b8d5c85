//! Access-checked list operations.
//!
//! Every operation runs the checks in the same order: operation, then filter,
//! then the fetched item, then fields. Storage is only touched once the
//! checks before it have passed.

use std::sync::Arc;

use serde_json::Value;

use crate::access::{
    cannot_for_item, cannot_for_item_fields, AccessError, AccessEvaluator, FieldOperation, ItemContext,
    Operation, RequestContext,
};
use crate::schema::{CoercionError, Field, Item, List, Schema};
use crate::store::{ItemStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("list \"{0}\" does not exist")]
    UnknownList(String),
    /// A denial. The message never reveals whether the item exists.
    #[error("{0}")]
    AccessDenied(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("invalid where: {0}")]
    InvalidWhere(CoercionError),
    #[error("invalid data: {0}")]
    InvalidData(CoercionError),
    #[error("request was cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ExecuteResult<T> = Result<T, ExecuteError>;

#[derive(Clone)]
pub struct Executor {
    schema: Arc<Schema>,
    evaluator: AccessEvaluator,
    store: Arc<dyn ItemStore>,
}

impl Executor {
    pub fn new(schema: Arc<Schema>, evaluator: AccessEvaluator, store: Arc<dyn ItemStore>) -> Self {
        Self {
            schema,
            evaluator,
            store,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Items matching the caller's `where` that the access filter lets through,
    /// with unreadable fields removed.
    pub async fn query(&self, ctx: &RequestContext, list_key: &str, where_input: &Value) -> ExecuteResult<Vec<Item>> {
        let list = self.list(list_key)?;
        let caller_filter = list
            .where_input()
            .coerce(where_input)
            .map_err(ExecuteError::InvalidWhere)?;

        self.check_operation(&list, ctx, Operation::Query).await?;
        let access_filter = self.evaluator.evaluate_filter(&list, ctx, Operation::Query).await?;
        let filter = access_filter.into_filter().and(caller_filter);

        let items = self.store.find_many(list.key(), &filter).await?;
        tracing::debug!(list_key = %list.key(), count = items.len(), "query resolved");

        let mut readable = Vec::with_capacity(items.len());
        for item in items {
            readable.push(self.readable_fields(&list, ctx, item).await?);
        }
        Ok(readable)
    }

    /// A single item by id, or `None` when it does not exist or is filtered out.
    pub async fn query_one(&self, ctx: &RequestContext, list_key: &str, id: &str) -> ExecuteResult<Option<Item>> {
        let list = self.list(list_key)?;

        self.check_operation(&list, ctx, Operation::Query).await?;
        let filter = self
            .evaluator
            .evaluate_filter(&list, ctx, Operation::Query)
            .await?
            .into_filter();

        match self.store.find_one(list.key(), id, &filter).await? {
            Some(item) => Ok(Some(self.readable_fields(&list, ctx, item).await?)),
            None => Ok(None),
        }
    }

    pub async fn create(&self, ctx: &RequestContext, list_key: &str, data: &Value) -> ExecuteResult<Item> {
        let list = self.list(list_key)?;
        let data = list.coerce_input(data).map_err(ExecuteError::InvalidData)?;

        self.check_operation(&list, ctx, Operation::Create).await?;
        let item_ctx = ItemContext {
            item: None,
            input_data: Some(&data),
        };
        self.check_item(&list, ctx, Operation::Create, item_ctx).await?;
        self.check_input_fields(&list, ctx, Operation::Create, item_ctx).await?;

        ensure_live(ctx)?;
        let created = self.store.create(list.key(), data).await?;
        tracing::info!(list_key = %list.key(), id = ?created.get("id"), "item created");

        Ok(self.readable_after_write(&list, ctx, created).await)
    }

    pub async fn update(&self, ctx: &RequestContext, list_key: &str, id: &str, data: &Value) -> ExecuteResult<Item> {
        let list = self.list(list_key)?;
        let data = list.coerce_input(data).map_err(ExecuteError::InvalidData)?;

        let existing = self.fetch_for_mutation(&list, ctx, Operation::Update, id).await?;
        let item_ctx = ItemContext {
            item: Some(&existing),
            input_data: Some(&data),
        };
        self.check_item(&list, ctx, Operation::Update, item_ctx).await?;
        self.check_input_fields(&list, ctx, Operation::Update, item_ctx).await?;

        ensure_live(ctx)?;
        let updated = self.store.update(list.key(), id, data).await?;
        tracing::info!(list_key = %list.key(), id = %id, "item updated");

        Ok(self.readable_after_write(&list, ctx, updated).await)
    }

    pub async fn delete(&self, ctx: &RequestContext, list_key: &str, id: &str) -> ExecuteResult<Item> {
        let list = self.list(list_key)?;

        let existing = self.fetch_for_mutation(&list, ctx, Operation::Delete, id).await?;
        let item_ctx = ItemContext {
            item: Some(&existing),
            input_data: None,
        };
        self.check_item(&list, ctx, Operation::Delete, item_ctx).await?;

        ensure_live(ctx)?;
        let deleted = self.store.delete(list.key(), id).await?;
        tracing::info!(list_key = %list.key(), id = %id, "item deleted");

        Ok(self.readable_after_write(&list, ctx, deleted).await)
    }

    fn list(&self, list_key: &str) -> ExecuteResult<Arc<List>> {
        self.schema
            .list(list_key)
            .cloned()
            .ok_or_else(|| ExecuteError::UnknownList(list_key.to_string()))
    }

    async fn check_operation(&self, list: &List, ctx: &RequestContext, operation: Operation) -> ExecuteResult<()> {
        if self.evaluator.evaluate_operation(list, ctx, operation).await? {
            Ok(())
        } else {
            Err(denied(list, operation))
        }
    }

    async fn check_item(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
        item_ctx: ItemContext<'_>,
    ) -> ExecuteResult<()> {
        if self.evaluator.evaluate_item(list, ctx, operation, item_ctx).await? {
            Ok(())
        } else {
            Err(denied(list, operation))
        }
    }

    /// Operation check, then the filtered fetch of the target item. An item
    /// the filter hides is reported exactly like a missing one.
    async fn fetch_for_mutation(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
        id: &str,
    ) -> ExecuteResult<Item> {
        self.check_operation(list, ctx, operation).await?;
        let filter = self
            .evaluator
            .evaluate_filter(list, ctx, operation)
            .await?
            .into_filter();

        self.store
            .find_one(list.key(), id, &filter)
            .await?
            .ok_or_else(|| denied(list, operation))
    }

    /// Field create/update checks for every field present in the input.
    async fn check_input_fields(
        &self,
        list: &List,
        ctx: &RequestContext,
        operation: Operation,
        item_ctx: ItemContext<'_>,
    ) -> ExecuteResult<()> {
        let field_operation = match operation {
            Operation::Create => FieldOperation::Create,
            _ => FieldOperation::Update,
        };
        let fields: Vec<&Field> = item_ctx
            .input_data
            .into_iter()
            .flat_map(|data| data.keys())
            .filter_map(|key| list.field(key))
            .collect();

        let decisions = self
            .evaluator
            .evaluate_fields(list, fields, ctx, field_operation, item_ctx)
            .await?;
        let fields_denied: Vec<String> = decisions
            .into_iter()
            .filter(|(_, allowed)| !allowed)
            .map(|(key, _)| key)
            .collect();

        if fields_denied.is_empty() {
            Ok(())
        } else {
            tracing::debug!(list_key = %list.key(), operation = %operation, fields = ?fields_denied, "field access denied");
            Err(ExecuteError::AccessDenied(cannot_for_item_fields(
                operation,
                list.key(),
                &fields_denied,
            )))
        }
    }

    /// Drop the fields whose read rule denies access.
    async fn readable_fields(&self, list: &List, ctx: &RequestContext, mut item: Item) -> ExecuteResult<Item> {
        let decisions = {
            let item_ctx = ItemContext {
                item: Some(&item),
                input_data: None,
            };
            self.evaluator
                .evaluate_fields(list, list.fields(), ctx, FieldOperation::Read, item_ctx)
                .await?
        };

        for (key, allowed) in decisions {
            if !allowed {
                item.remove(&key);
            }
        }
        Ok(item)
    }

    /// Read filtering for an item that is already written. The write stands,
    /// so a failing read rule hides its field instead of failing the call.
    async fn readable_after_write(&self, list: &List, ctx: &RequestContext, mut item: Item) -> Item {
        let mut hidden = Vec::new();
        {
            let item_ctx = ItemContext {
                item: Some(&item),
                input_data: None,
            };
            for field in list.fields() {
                match self
                    .evaluator
                    .evaluate_field(list, field, ctx, FieldOperation::Read, item_ctx)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => hidden.push(field.key().to_string()),
                    Err(err) => {
                        tracing::warn!(list_key = %list.key(), field = %field.key(), error = %err, "read rule failed after write, field omitted");
                        hidden.push(field.key().to_string());
                    }
                }
            }
        }

        for key in hidden {
            item.remove(&key);
        }
        item
    }
}

fn denied(list: &List, operation: Operation) -> ExecuteError {
    tracing::debug!(list_key = %list.key(), operation = %operation, "access denied");
    ExecuteError::AccessDenied(cannot_for_item(operation, list.key()))
}

fn ensure_live(ctx: &RequestContext) -> ExecuteResult<()> {
    if ctx.is_cancelled() {
        return Err(ExecuteError::Cancelled);
    }
    Ok(())
}
