use std::collections::HashMap;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use pyaz_kv::KvStore;
use pyaz_types::PyazError;

use crate::KvContext;

/// The text request surface.
pub fn router(ctx: KvContext) -> Router {
    Router::new()
        .route("/get", get(handle_get))
        .route("/set", post(handle_set))
        .route("/delete", post(handle_delete))
        .route("/metrics", get(handle_metrics))
        .with_state(ctx)
}

#[derive(serde::Deserialize)]
struct SetBody {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(serde::Deserialize)]
struct DeleteBody {
    key: String,
}

async fn handle_get(
    State(ctx): State<KvContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(key) = params.get("key").filter(|k| !k.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing key parameter").into_response();
    };
    if !ctx.raft.is_leader() {
        return forward_get(&ctx, key).await;
    }
    match ctx.store.get(key).await {
        Ok(Some(value)) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], value).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Key not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn handle_set(State(ctx): State<KvContext>, body: Bytes) -> Response {
    let req: SetBody = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    };
    if req.key.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing key field").into_response();
    }
    if !ctx.raft.is_leader() {
        return forward_post(&ctx, "/set", body).await;
    }
    match ctx.store.set(&req.key, &req.value).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        // Leadership flipped between the role check and the proposal; retry
        // the lookup once and forward.
        Err(PyazError::NotLeader { .. }) => forward_post(&ctx, "/set", body).await,
        Err(PyazError::Timeout) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Proposal timed out").into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to set key").into_response(),
    }
}

async fn handle_delete(State(ctx): State<KvContext>, body: Bytes) -> Response {
    let req: DeleteBody = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    };
    if req.key.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing key field").into_response();
    }
    if !ctx.raft.is_leader() {
        return forward_post(&ctx, "/delete", body).await;
    }
    match ctx.store.delete(&req.key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(PyazError::NotLeader { .. }) => forward_post(&ctx, "/delete", body).await,
        Err(PyazError::Timeout) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Proposal timed out").into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete key").into_response(),
    }
}

async fn handle_metrics(State(ctx): State<KvContext>) -> Response {
    let m = ctx.store.metrics();
    Json(serde_json::json!({
        "operations": {
            "get": m.get_count,
            "set": m.set_count,
            "delete": m.delete_count,
        },
        "avg_latency": {
            "get": format!("{:?}", m.get_avg_latency),
            "set": format!("{:?}", m.set_avg_latency),
            "delete": format!("{:?}", m.delete_avg_latency),
        },
    }))
    .into_response()
}

/// The leader's HTTP surface address, per the discovery registry.
async fn leader_http_addr(ctx: &KvContext) -> Option<String> {
    match ctx.discovery.get_leader().await {
        Ok(Some(record)) => Some(record.http_addr),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(error = %e, "leader lookup failed");
            None
        }
    }
}

async fn forward_get(ctx: &KvContext, key: &str) -> Response {
    let Some(leader) = leader_http_addr(ctx).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Not leader and no leader known")
            .into_response();
    };
    let result = ctx
        .http
        .get(format!("http://{leader}/get"))
        .query(&[("key", key)])
        .send()
        .await;
    match result {
        Ok(resp) => relay(resp).await,
        Err(e) => {
            (StatusCode::BAD_GATEWAY, format!("Failed to forward to leader: {e}"))
                .into_response()
        }
    }
}

async fn forward_post(ctx: &KvContext, path: &str, body: Bytes) -> Response {
    let Some(leader) = leader_http_addr(ctx).await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Not leader and no leader known")
            .into_response();
    };
    let result = ctx
        .http
        .post(format!("http://{leader}{path}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await;
    match result {
        Ok(resp) => relay(resp).await,
        Err(e) => {
            (StatusCode::BAD_GATEWAY, format!("Failed to forward to leader: {e}"))
                .into_response()
        }
    }
}

/// Relay the leader's status, content type, and body back to the client.
async fn relay(resp: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("Failed to read leader response: {e}"))
                .into_response()
        }
    };
    let mut builder = axum::http::Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
