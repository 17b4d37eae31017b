use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use uuid::Uuid;

use rg_domain::HistoryQuery;

use crate::api::error::{ok, ApiError, ApiJson, ApiQuery};
use crate::state::AppState;

/// Body of `POST /messages`.  Fields are optional here so missing ones are
/// reported with a field-specific message instead of a serde error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

struct ValidSend {
    instance_id: Uuid,
    phone: String,
    message: String,
}

impl SendMessageRequest {
    fn validate(self) -> Result<ValidSend, ApiError> {
        let required = |field: &str| ApiError::Validation(format!("\"{field}\" is required"));

        let instance_id = self.instance_id.ok_or_else(|| required("instanceId"))?;
        let instance_id = Uuid::parse_str(instance_id.trim())
            .map_err(|_| ApiError::Validation("\"instanceId\" must be a valid UUID".into()))?;

        let phone = self.phone.ok_or_else(|| required("phone"))?;
        if phone.is_empty() || !phone.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ApiError::Validation("\"phone\" must contain only digits".into()));
        }

        let message = self.message.ok_or_else(|| required("message"))?;
        if message.is_empty() {
            return Err(ApiError::Validation("\"message\" must not be empty".into()));
        }

        Ok(ValidSend {
            instance_id,
            phone,
            message,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send_message(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let req = body.validate()?;
    let result = state
        .dispatch
        .send_message(req.instance_id, &req.phone, &req.message)
        .await?;
    Ok(ok("message sent", result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /messages/history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message_history(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Response, ApiError> {
    let records = state
        .message_log
        .query(query)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read message history: {e}")))?;
    Ok(ok("message history", records))
}
