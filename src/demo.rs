//! The lists served by the binary.
//!
//! `Order`: anyone may query and create, nobody may update or delete, and a
//! query only sees the caller's own orders. `internalNote` is admin-only.
//!
//! `Person`: signed-in users only. A person can only be edited by themselves
//! or an admin, and only admins can set `role`.

use serde_json::{json, Map, Value};

use crate::access::{
    FieldAccessArgs, FieldAccessConfig, FieldRule, GranularListAccess, ListAccessArgs, ListRule, Operation,
    RuleMap,
};
use crate::schema::{FieldConfig, ListConfig};

pub fn is_signed_in() -> ListRule {
    ListRule::from_fn(|args: ListAccessArgs| args.session.is_some()).named("is_signed_in")
}

pub fn is_admin() -> FieldRule {
    FieldRule::from_fn(|args: FieldAccessArgs| args.session.is_some_and(|s| s.flag("isAdmin"))).named("is_admin")
}

/// Filter rule matching rows whose `field` equals the session id. Without a
/// session nothing matches.
pub fn owned_by(field: &'static str) -> ListRule {
    ListRule::from_fn(move |args: ListAccessArgs| match args.session.as_ref().and_then(|s| s.id()) {
        Some(id) => {
            let mut filter = Map::new();
            filter.insert(field.to_string(), json!({ "equals": id }));
            Value::Object(filter)
        }
        None => json!(false),
    })
    .named("owned_by")
}

pub fn order_list() -> ListConfig {
    let operations: RuleMap = [
        (Operation::Query, ListRule::allow_all()),
        (Operation::Create, ListRule::allow_all()),
        (Operation::Update, ListRule::deny_all()),
        (Operation::Delete, ListRule::deny_all()),
    ]
    .into_iter()
    .collect();

    ListConfig::new("Order")
        .access(
            GranularListAccess::new()
                .operation(operations)
                .filter(Operation::Query, owned_by("ownerId")),
        )
        .field("ownerId", FieldConfig::text())
        .field("description", FieldConfig::text())
        .field("total", FieldConfig::float())
        .field("status", FieldConfig::select(["pending", "paid", "shipped"]))
        .field("placedAt", FieldConfig::timestamp())
        .field(
            "internalNote",
            FieldConfig::text().filterable(false).access(is_admin()),
        )
}

pub fn person_list() -> ListConfig {
    let self_or_admin = ListRule::from_fn(|args: ListAccessArgs| {
        let Some(session) = args.session else {
            return json!(false);
        };
        if session.flag("isAdmin") {
            return json!(true);
        }
        match session.id() {
            Some(id) => json!({ "id": { "equals": id } }),
            None => json!(false),
        }
    })
    .named("self_or_admin");

    ListConfig::new("Person")
        .access(
            GranularListAccess::new()
                .operation(is_signed_in())
                .filter(Operation::Update, self_or_admin.clone())
                .filter(Operation::Delete, self_or_admin),
        )
        .field("name", FieldConfig::text())
        .field("email", FieldConfig::text())
        .field("age", FieldConfig::integer())
        .field(
            "role",
            FieldConfig::select(["member", "admin"]).access(
                FieldAccessConfig::default()
                    .create(is_admin())
                    .update(is_admin()),
            ),
        )
}

pub fn lists() -> Vec<ListConfig> {
    vec![order_list(), person_list()]
}
