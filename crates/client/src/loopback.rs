//! In-process messaging client.
//!
//! Two modes share one implementation:
//!
//! - **auto**: every session emits `qr`, `authenticated` and `ready` as soon
//!   as it is initialized, and every send succeeds.  Used for local
//!   development (`client.kind = "loopback"`).
//! - **manual**: nothing happens on its own.  The owner of the
//!   [`LoopbackFactory`] drives sessions with [`LoopbackFactory::emit`],
//!   marks numbers unknown, injects send failures and inspects what each
//!   session sent and how often it was destroyed.  This is the test double
//!   for the registry and dispatch gate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rg_domain::error::{Error, Result};
use rg_domain::SessionEvent;

use crate::traits::{Address, ClientFactory, DeliveryReceipt, EventSink, MessagingClient, SessionSpec};

const BACKEND: &str = "loopback";

/// A message accepted by a loopback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub body: String,
}

#[derive(Default)]
struct SessionState {
    sink: Mutex<Option<EventSink>>,
    sent: Mutex<Vec<SentMessage>>,
    initialized: AtomicBool,
    destroy_calls: AtomicUsize,
}

#[derive(Default)]
struct Shared {
    auto: bool,
    sessions: Mutex<HashMap<String, Arc<SessionState>>>,
    unknown_numbers: Mutex<HashSet<String>>,
    lookup_failure: Mutex<Option<String>>,
    send_failure: Mutex<Option<String>>,
    send_delay: Mutex<Option<Duration>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Creates loopback sessions.  Cheap to clone; clones share all sessions
/// and scripted behaviour.
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    shared: Arc<Shared>,
}

impl LoopbackFactory {
    /// Sessions authenticate on their own.
    pub fn auto() -> Self {
        Self {
            shared: Arc::new(Shared {
                auto: true,
                ..Shared::default()
            }),
        }
    }

    /// Sessions only change state through [`emit`](Self::emit).
    pub fn manual() -> Self {
        Self::default()
    }

    fn session(&self, session_id: &str) -> Option<Arc<SessionState>> {
        self.shared.sessions.lock().get(session_id).cloned()
    }

    /// Push an event into a session's sink.  Returns `false` when the
    /// session is unknown, not subscribed, or its consumer has gone away.
    pub async fn emit(&self, session_id: &str, event: SessionEvent) -> bool {
        let sink = self
            .session(session_id)
            .and_then(|s| s.sink.lock().clone());
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Make lookups for `phone` report "not registered".
    pub fn mark_unknown(&self, phone: impl Into<String>) {
        self.shared.unknown_numbers.lock().insert(phone.into());
    }

    /// Make every lookup fail with `message`.
    pub fn fail_lookups(&self, message: impl Into<String>) {
        *self.shared.lookup_failure.lock() = Some(message.into());
    }

    /// Make every send fail with `message`.
    pub fn fail_sends(&self, message: impl Into<String>) {
        *self.shared.send_failure.lock() = Some(message.into());
    }

    /// Hold every send for `delay` before completing it.
    pub fn delay_sends(&self, delay: Duration) {
        *self.shared.send_delay.lock() = Some(delay);
    }

    /// Messages a session accepted, oldest first.
    pub fn sent(&self, session_id: &str) -> Vec<SentMessage> {
        self.session(session_id)
            .map(|s| s.sent.lock().clone())
            .unwrap_or_default()
    }

    pub fn destroy_count(&self, session_id: &str) -> usize {
        self.session(session_id)
            .map(|s| s.destroy_calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn is_initialized(&self, session_id: &str) -> bool {
        self.session(session_id)
            .map(|s| s.initialized.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Number of sessions ever created by this factory.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }
}

impl ClientFactory for LoopbackFactory {
    fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn MessagingClient>> {
        let state = Arc::new(SessionState::default());
        self.shared
            .sessions
            .lock()
            .insert(spec.session_id.clone(), state.clone());
        Ok(Arc::new(LoopbackClient {
            session_id: spec.session_id.clone(),
            state,
            shared: self.shared.clone(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LoopbackClient {
    session_id: String,
    state: Arc<SessionState>,
    shared: Arc<Shared>,
}

impl LoopbackClient {
    fn ensure_live(&self) -> Result<()> {
        if self.state.destroy_calls.load(Ordering::SeqCst) > 0 {
            return Err(Error::SessionClosed(self.session_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for LoopbackClient {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn subscribe(&self, sink: EventSink) {
        *self.state.sink.lock() = Some(sink);
    }

    fn initialize(&self) {
        self.state.initialized.store(true, Ordering::SeqCst);
        if !self.shared.auto {
            return;
        }
        let Some(sink) = self.state.sink.lock().clone() else {
            return;
        };
        let payload = format!("loopback:{}", self.session_id);
        tokio::spawn(async move {
            for event in [
                SessionEvent::Qr { payload },
                SessionEvent::Authenticated,
                SessionEvent::Ready,
            ] {
                if sink.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn resolve_address(&self, phone: &str) -> Result<Option<Address>> {
        self.ensure_live()?;
        if let Some(message) = self.shared.lookup_failure.lock().clone() {
            return Err(Error::Client {
                backend: BACKEND.into(),
                message,
            });
        }
        if self.shared.unknown_numbers.lock().contains(phone) {
            return Ok(None);
        }
        Ok(Some(Address {
            chat_id: format!("{phone}@c.us"),
        }))
    }

    async fn send(&self, address: &Address, body: &str) -> Result<DeliveryReceipt> {
        self.ensure_live()?;
        let delay = *self.shared.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        // A destroy that slipped in during the delay would be a lifecycle bug.
        self.ensure_live()?;

        if let Some(message) = self.shared.send_failure.lock().clone() {
            return Err(Error::Client {
                backend: BACKEND.into(),
                message,
            });
        }
        self.state.sent.lock().push(SentMessage {
            chat_id: address.chat_id.clone(),
            body: body.to_owned(),
        });
        Ok(DeliveryReceipt {
            message_id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    async fn destroy(&self) -> Result<()> {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.state.sink.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn spec(id: &str) -> SessionSpec {
        SessionSpec {
            session_id: id.into(),
        }
    }

    #[tokio::test]
    async fn auto_mode_authenticates_on_initialize() {
        let factory = LoopbackFactory::auto();
        let client = factory.create(&spec("s1")).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        client.subscribe(tx);
        client.initialize();

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Qr {
                payload: "loopback:s1".into()
            })
        );
        assert_eq!(rx.recv().await, Some(SessionEvent::Authenticated));
        assert_eq!(rx.recv().await, Some(SessionEvent::Ready));
    }

    #[tokio::test]
    async fn manual_mode_only_emits_on_request() {
        let factory = LoopbackFactory::manual();
        let client = factory.create(&spec("s1")).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        client.subscribe(tx);
        client.initialize();
        assert!(factory.is_initialized("s1"));
        assert!(rx.try_recv().is_err());

        assert!(factory.emit("s1", SessionEvent::Authenticated).await);
        assert_eq!(rx.recv().await, Some(SessionEvent::Authenticated));
        assert!(!factory.emit("missing", SessionEvent::Ready).await);
    }

    #[tokio::test]
    async fn scripted_lookups_and_sends() {
        let factory = LoopbackFactory::manual();
        let client = factory.create(&spec("s1")).unwrap();

        factory.mark_unknown("000");
        assert_eq!(client.resolve_address("000").await.unwrap(), None);

        let addr = client.resolve_address("5511999999999").await.unwrap().unwrap();
        assert_eq!(addr.chat_id, "5511999999999@c.us");

        let receipt = client.send(&addr, "hi").await.unwrap();
        assert!(receipt.message_id.is_some());
        assert_eq!(factory.sent("s1").len(), 1);

        factory.fail_sends("socket hang up");
        let err = client.send(&addr, "again").await.unwrap_err();
        assert!(err.to_string().contains("socket hang up"));
        assert_eq!(factory.sent("s1").len(), 1);
    }

    #[tokio::test]
    async fn destroyed_session_rejects_calls() {
        let factory = LoopbackFactory::manual();
        let client = factory.create(&spec("s1")).unwrap();
        client.destroy().await.unwrap();
        assert_eq!(factory.destroy_count("s1"), 1);
        assert!(matches!(
            client.resolve_address("1").await,
            Err(Error::SessionClosed(_))
        ));
    }
}
