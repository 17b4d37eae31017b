//! Session state machine.
//!
//! Client events are the only input.  Applying an event is a pure function of
//! the previous snapshot and the event, so the rules are tested here without
//! a registry or a client.

use chrono::{DateTime, Utc};

use rg_domain::config::SendGate;
use rg_domain::{Instance, InstanceState, SessionEvent};

/// State change caused by one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: InstanceState,
    pub to: InstanceState,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Apply `event` to `instance`.
///
/// | Event          | State           | `auth`    | Other                  |
/// |----------------|-----------------|-----------|------------------------|
/// | `qr`           | `AwaitingScan`  | unchanged | `qr_payload = payload` |
/// | `authenticated`| `Authenticated` | `true`    |                        |
/// | `auth_failure` | `AuthFailed`    | `false`   | `last_error = message` |
/// | `ready`        | `Ready`         | unchanged |                        |
/// | `disconnected` | `Disconnected`  | `false`   | `last_error = reason`  |
pub fn apply_event(instance: &mut Instance, event: &SessionEvent, now: DateTime<Utc>) -> Transition {
    let from = instance.state;
    match event {
        SessionEvent::Qr { payload } => {
            instance.state = InstanceState::AwaitingScan;
            instance.qr_payload = payload.clone();
        }
        SessionEvent::Authenticated => {
            instance.state = InstanceState::Authenticated;
            instance.auth = true;
        }
        SessionEvent::AuthFailure { message } => {
            instance.state = InstanceState::AuthFailed;
            instance.auth = false;
            instance.last_error = Some(message.clone());
        }
        SessionEvent::Ready => {
            instance.state = InstanceState::Ready;
        }
        SessionEvent::Disconnected { reason } => {
            instance.state = InstanceState::Disconnected;
            instance.auth = false;
            instance.last_error = Some(reason.clone());
        }
    }
    instance.updated_at = now;
    Transition {
        from,
        to: instance.state,
    }
}

/// Whether `instance` may send under `gate`.
pub fn may_send(instance: &Instance, gate: SendGate) -> bool {
    match gate {
        SendGate::AuthFlag => instance.auth,
        SendGate::Ready => instance.state == InstanceState::Ready,
    }
}
