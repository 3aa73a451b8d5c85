use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

use list_access::access::{AccessEvaluator, GranularListAccess, ListRule, Operation};
use list_access::jwt::JwtConfig;
use list_access::schema::{FieldConfig, ListConfig, Schema};
use list_access::store::MemoryStore;
use list_access::{create_app, demo, AppState, Executor};

const SECRET: &str = "test-secret";

fn app_with(lists: Vec<ListConfig>) -> Result<Router> {
    let schema = Schema::new(lists)?;
    let executor = Executor::new(Arc::new(schema), AccessEvaluator::default(), Arc::new(MemoryStore::new()));
    Ok(create_app(AppState::new(executor, JwtConfig::new(SECRET))))
}

fn token(id: &str, data: Value) -> Result<String> {
    Ok(JwtConfig::new(SECRET).encode(id, data)?)
}

async fn send(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn health_reports_loaded_lists() -> Result<()> {
    let app = app_with(demo::lists())?;

    let (status, body) = send(&app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["lists"], 2);
    assert_eq!(body["store_ok"], true);

    Ok(())
}

#[tokio::test]
async fn order_flow_over_http() -> Result<()> {
    let app = app_with(demo::lists())?;
    let alice = token("alice", json!({}))?;
    let bob = token("bob", json!({}))?;

    let (status, created) = send(
        &app,
        "POST",
        "/api/lists/Order/items",
        Some(&alice),
        Some(json!({"data": {"ownerId": "alice", "description": "tea", "status": "pending"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {created}");
    let id = created["id"].as_str().unwrap_or_default().to_string();

    send(
        &app,
        "POST",
        "/api/lists/Order/items",
        Some(&bob),
        Some(json!({"data": {"ownerId": "bob", "description": "coffee"}})),
    )
    .await?;

    let (status, listed) = send(&app, "GET", "/api/lists/Order/items", Some(&alice), None).await?;
    assert_eq!(status, StatusCode::OK);
    let items = listed["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["description"], "tea");

    let (status, queried) = send(
        &app,
        "POST",
        "/api/lists/Order/query",
        Some(&bob),
        Some(json!({"where": {"status": {"equals": "pending"}}})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queried["items"], json!([]));

    // bob cannot see alice's order, and cannot tell it exists
    let (status, body) = send(&app, "GET", &format!("/api/lists/Order/items/{id}"), Some(&bob), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "not found: You cannot query that Order - it may not exist");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/lists/Order/items/{id}"),
        Some(&alice),
        Some(json!({"data": {"description": "green tea"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "access_denied");
    assert_eq!(body["message"], "You cannot update that Order - it may not exist");

    Ok(())
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() -> Result<()> {
    let app = app_with(demo::lists())?;
    let alice = token("alice", json!({}))?;

    let (status, body) = send(
        &app,
        "POST",
        "/api/lists/Order/query",
        Some(&alice),
        Some(json!({"where": {"internalNote": {"equals": "x"}}})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, _) = send(
        &app,
        "POST",
        "/api/lists/Order/items",
        Some(&alice),
        Some(json!({"data": {"status": "lost"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/lists/Nope/items", Some(&alice), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn sessions_come_from_bearer_tokens() -> Result<()> {
    let app = app_with(demo::lists())?;

    // Person requires a session for every operation
    let (status, _) = send(&app, "GET", "/api/lists/Person/items", None, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/api/lists/Person/items", Some("not-a-token"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token");

    let admin = token("root", json!({"isAdmin": true}))?;
    let (status, _) = send(
        &app,
        "POST",
        "/api/lists/Person/items",
        Some(&admin),
        Some(json!({"data": {"name": "Ada", "role": "admin"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let member = token("m1", json!({}))?;
    let (status, body) = send(
        &app,
        "POST",
        "/api/lists/Person/items",
        Some(&member),
        Some(json!({"data": {"name": "Mallory", "role": "admin"}})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "You cannot create that Person - you cannot create the fields [\"role\"]"
    );

    Ok(())
}

#[tokio::test]
async fn rule_failures_carry_extensions() -> Result<()> {
    let app = app_with(vec![ListConfig::new("Post")
        .access(GranularListAccess::new().filter(Operation::Query, ListRule::from_fn(|_| Value::Null)))
        .field("title", FieldConfig::text())])?;

    let (status, body) = send(&app, "GET", "/api/lists/Post/items", None, None).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "access_control");
    assert_eq!(
        body["extensions"],
        json!([{
            "tag": "Post.access.filter.query",
            "code": "INVALID_RETURN_TYPE",
            "message": "Returned: null. Expected: boolean | object."
        }])
    );

    Ok(())
}
