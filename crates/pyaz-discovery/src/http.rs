use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;

use pyaz_types::{JoinRequest, LeaderRecord};

use crate::Registry;

/// The discovery surface: a leader slot and the join-request queue.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/leader", get(get_leader).put(put_leader))
        .route(
            "/join-requests",
            get(list_joins).post(post_join).delete(delete_join),
        )
        .with_state(registry)
}

async fn get_leader(State(registry): State<Arc<Registry>>) -> Response {
    match registry.get_leader() {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "leader not available").into_response(),
    }
}

async fn put_leader(State(registry): State<Arc<Registry>>, body: Bytes) -> Response {
    let record: LeaderRecord = match serde_json::from_slice(&body) {
        Ok(record) => record,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    registry.put_leader(record);
    StatusCode::NO_CONTENT.into_response()
}

async fn post_join(State(registry): State<Arc<Registry>>, body: Bytes) -> Response {
    let request: JoinRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    registry.post_join(request);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_joins(State(registry): State<Arc<Registry>>) -> Json<Vec<JoinRequest>> {
    Json(registry.list_joins())
}

async fn delete_join(
    State(registry): State<Arc<Registry>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(id) = params.get("id").filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing id").into_response();
    };
    registry.delete_join(id);
    StatusCode::NO_CONTENT.into_response()
}
