use std::sync::Arc;

use rg_domain::error::Result;
use rg_domain::SessionEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel a client pushes its session events into.  One per session;
/// the receiving end is owned by the registry's state-machine task.
pub type EventSink = mpsc::Sender<SessionEvent>;

/// Parameters for allocating a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Stable identifier of the session on the backend (the instance id).
    pub session_id: String,
}

/// A destination validated by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Backend chat identifier, e.g. `5511999999999@c.us`.
    pub chat_id: String,
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One messaging session on an automation backend.
///
/// Lifecycle: [`subscribe`](Self::subscribe) → [`initialize`](Self::initialize)
/// → any number of lookups and sends → exactly one [`destroy`](Self::destroy).
#[async_trait::async_trait]
pub trait MessagingClient: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Register the sink for `qr`, `authenticated`, `auth_failure`, `ready`
    /// and `disconnected`.  Events for one session arrive in causal order.
    fn subscribe(&self, sink: EventSink);

    /// Start connecting in the background and return immediately.
    ///
    /// Connection failures are reported through the sink as
    /// [`SessionEvent::Disconnected`], never to the caller.
    fn initialize(&self);

    /// Check that `phone` exists on the network.  `Ok(None)` means the
    /// backend answered and the number is not registered.
    async fn resolve_address(&self, phone: &str) -> Result<Option<Address>>;

    async fn send(&self, address: &Address, body: &str) -> Result<DeliveryReceipt>;

    /// Release every resource held by the session.  Safe to call once;
    /// later calls are no-ops.
    async fn destroy(&self) -> Result<()>;
}

/// Allocates client sessions.  Must not perform network I/O.
pub trait ClientFactory: Send + Sync {
    fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn MessagingClient>>;
}
