use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::api::error::{ok, ok_message, parse_instance_id, ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    #[serde(default)]
    pub name: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_instance(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateInstanceRequest>,
) -> Result<Response, ApiError> {
    let name = body
        .name
        .ok_or_else(|| ApiError::Validation("\"name\" is required".into()))?;
    if name.is_empty() {
        return Err(ApiError::Validation("\"name\" must not be empty".into()));
    }
    let instance = state.registry.create(&name)?;
    Ok(ok("instance created", instance))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_instances(State(state): State<AppState>) -> impl IntoResponse {
    ok("instances", state.registry.list())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /instances/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_instance_id(&id)?;
    let instance = state.registry.get(id)?;
    Ok(ok("instance details", instance))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /instances/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_instance_id(&id)?;
    if !state.registry.delete(id).await {
        return Err(ApiError::NotFound("instance not found".into()));
    }
    Ok(ok_message(format!("instance {id} deleted")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /instances/:id/events: SSE stream of snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the instance's snapshot now and after every change.  The stream
/// ends when the instance is deleted.
pub async fn instance_events_sse(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = parse_instance_id(&id)?;
    let mut rx = state.registry.watch(id)?;

    let stream = async_stream::stream! {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if let Ok(json) = serde_json::to_string(&snapshot) {
                yield Ok(Event::default().event("instance.update").data(json));
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
