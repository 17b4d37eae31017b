pub mod auth;
pub mod error;
pub mod health;
pub mod instances;
pub mod messages;

use axum::http::header::ALLOW;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        // Instances
        .route(
            "/instances",
            get(instances::list_instances).post(instances::create_instance),
        )
        .route(
            "/instances/:id",
            get(instances::get_instance).delete(instances::delete_instance),
        )
        .route("/instances/:id/events", get(instances::instance_events_sse))
        // Messages
        .route("/messages", post(messages::send_message))
        .route("/messages/history", get(messages::message_history))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .fallback(not_found)
        .layer(middleware::map_response(envelope_method_not_allowed))
}

async fn not_found() -> impl IntoResponse {
    ApiError::NotFound("route not found".into())
}

/// Axum answers a wrong verb on a known path with an empty `405`; give it
/// the envelope and keep its `Allow` header.
async fn envelope_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let allow = response.headers().get(ALLOW).cloned();
    let mut enveloped = ApiError::MethodNotAllowed("method not allowed".into()).into_response();
    if let Some(allow) = allow {
        enveloped.headers_mut().insert(ALLOW, allow);
    }
    enveloped
}
