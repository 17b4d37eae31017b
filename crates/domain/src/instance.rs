//! Instance model: identity, connection state and the events that move it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type InstanceId = Uuid;

/// Connection state of a messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Client handle allocated, no event received yet.
    Initializing,
    /// A scan payload has been emitted and is waiting to be scanned.
    AwaitingScan,
    Authenticated,
    Ready,
    AuthFailed,
    Disconnected,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingScan => "awaiting_scan",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::AuthFailed => "auth_failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event surfaced by a messaging client for one session.
///
/// The serialized form (`{"type": "qr", "payload": "..."}`) is also the wire
/// format of the automation bridge's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Qr {
        payload: String,
    },
    Authenticated,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Authenticated => "authenticated",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Ready => "ready",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Snapshot of a registered instance, as returned to callers.
///
/// The client handle never leaves the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
    /// Send-authorization flag, set by `authenticated` and cleared by
    /// `auth_failure` / `disconnected`.
    pub auth: bool,
    /// Last scan payload; empty until the client emits one.
    #[serde(rename = "qrCode")]
    pub qr_payload: String,
    /// Last auth-failure message or disconnect reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(id: InstanceId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            state: InstanceState::Initializing,
            auth: false,
            qr_payload: String::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_starts_unauthenticated() {
        let inst = Instance::new(Uuid::new_v4(), "alice");
        assert_eq!(inst.state, InstanceState::Initializing);
        assert!(!inst.auth);
        assert!(inst.qr_payload.is_empty());
        assert!(inst.last_error.is_none());
    }

    #[test]
    fn summary_uses_camel_case_and_qr_code() {
        let inst = Instance::new(Uuid::nil(), "alice");
        let json = serde_json::to_value(&inst).unwrap();
        assert_eq!(json["qrCode"], "");
        assert_eq!(json["state"], "initializing");
        assert_eq!(json["auth"], false);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("lastError").is_none());
    }

    #[test]
    fn session_event_wire_format() {
        let ev: SessionEvent =
            serde_json::from_str(r#"{"type":"qr","payload":"2@abc"}"#).unwrap();
        assert_eq!(ev, SessionEvent::Qr { payload: "2@abc".into() });

        let ev: SessionEvent = serde_json::from_str(r#"{"type":"disconnected"}"#).unwrap();
        assert_eq!(ev, SessionEvent::Disconnected { reason: String::new() });

        let ev: SessionEvent = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ev.kind(), "ready");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<SessionEvent>(r#"{"type":"loading_screen"}"#).is_err());
    }
}
