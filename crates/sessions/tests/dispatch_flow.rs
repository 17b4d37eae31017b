//! End-to-end send flows over the registry, the loopback client and the
//! in-memory message log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rg_client::LoopbackFactory;
use rg_domain::config::{DispatchConfig, SendGate};
use rg_domain::{HistoryQuery, Instance, InstanceState, MessageRecord, NewMessageRecord, SessionEvent};
use rg_sessions::message_log::LogResult;
use rg_sessions::{DispatchError, DispatchGate, InstanceRegistry, LogError, MemoryMessageLog, MessageLog};
use uuid::Uuid;

struct Harness {
    factory: LoopbackFactory,
    registry: InstanceRegistry,
    log: Arc<MemoryMessageLog>,
    gate: DispatchGate,
}

fn harness(send_gate: SendGate) -> Harness {
    let factory = LoopbackFactory::manual();
    let registry = InstanceRegistry::new(Arc::new(factory.clone()), &DispatchConfig::default());
    let log = Arc::new(MemoryMessageLog::new());
    let gate = DispatchGate::new(registry.clone(), log.clone(), send_gate);
    Harness {
        factory,
        registry,
        log,
        gate,
    }
}

impl Harness {
    /// Create an instance and feed it `events`, waiting until each one has
    /// been applied.
    async fn instance_after(&self, name: &str, events: Vec<SessionEvent>) -> Instance {
        let inst = self.registry.create(name).unwrap();
        let mut rx = self.registry.watch(inst.id).unwrap();
        for event in events {
            assert!(self.factory.emit(&inst.id.to_string(), event).await);
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .expect("event was not applied")
                .unwrap();
        }
        self.registry.get(inst.id).unwrap()
    }

    async fn authenticated(&self, name: &str) -> Instance {
        self.instance_after(name, vec![SessionEvent::Authenticated]).await
    }
}

#[tokio::test]
async fn alice_sends_after_authentication() {
    let h = harness(SendGate::AuthFlag);
    let alice = h
        .instance_after(
            "Alice",
            vec![SessionEvent::Qr { payload: "2@abc".into() }, SessionEvent::Authenticated],
        )
        .await;
    assert!(alice.auth);

    let result = h
        .gate
        .send_message(alice.id, "5511999999999", "hello")
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.instance_id, alice.id);
    assert_eq!(result.name, "Alice");
    assert_eq!(result.phone, "5511999999999");
    assert_eq!(result.message, "hello");
    assert!(result.message_id.is_some());

    let sent = h.factory.sent(&alice.id.to_string());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, "5511999999999@c.us");

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].name, "Alice");
    assert_eq!(records[0].instance_id, alice.id.to_string());
}

#[tokio::test]
async fn unknown_instance_never_reaches_the_client() {
    let h = harness(SendGate::AuthFlag);
    let live = h.authenticated("live").await;

    let err = h
        .gate
        .send_message(Uuid::new_v4(), "5511999999999", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InstanceNotFound(_)));
    assert!(h.factory.sent(&live.id.to_string()).is_empty());
    assert_eq!(h.factory.session_count(), 1);
    assert!(h.log.is_empty());

    // The live instance still sends normally.
    h.gate.send_message(live.id, "1", "hi").await.unwrap();
    assert_eq!(h.factory.sent(&live.id.to_string()).len(), 1);
}

#[tokio::test]
async fn closed_auth_flag_gate_writes_no_record() {
    let h = harness(SendGate::AuthFlag);
    let cases = vec![
        vec![],
        vec![SessionEvent::Qr { payload: "x".into() }],
        vec![SessionEvent::Ready],
        vec![
            SessionEvent::Authenticated,
            SessionEvent::AuthFailure {
                message: "expired".into(),
            },
        ],
        vec![
            SessionEvent::Authenticated,
            SessionEvent::Ready,
            SessionEvent::Disconnected {
                reason: "LOGOUT".into(),
            },
        ],
    ];
    for events in cases {
        let inst = h.instance_after("tenant", events).await;
        let err = h.gate.send_message(inst.id, "1", "hi").await.unwrap_err();
        assert!(
            matches!(err, DispatchError::NotAuthenticated(_)),
            "state {} should be rejected",
            inst.state
        );
        assert!(h.factory.sent(&inst.id.to_string()).is_empty());
    }
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn ready_gate_requires_ready_state() {
    let h = harness(SendGate::Ready);
    let cases = vec![
        vec![],
        vec![SessionEvent::Qr { payload: "x".into() }],
        vec![SessionEvent::Authenticated],
        vec![SessionEvent::AuthFailure {
            message: "expired".into(),
        }],
        vec![
            SessionEvent::Authenticated,
            SessionEvent::Ready,
            SessionEvent::Disconnected {
                reason: "LOGOUT".into(),
            },
        ],
    ];
    for events in cases {
        let inst = h.instance_after("tenant", events).await;
        assert_ne!(inst.state, InstanceState::Ready);
        let err = h.gate.send_message(inst.id, "1", "hi").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotAuthenticated(_)));
    }
    assert!(h.log.is_empty());

    let ready = h
        .instance_after("ready", vec![SessionEvent::Authenticated, SessionEvent::Ready])
        .await;
    assert!(h.gate.send_message(ready.id, "1", "hi").await.is_ok());
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn unknown_recipient_records_one_failure() {
    let h = harness(SendGate::AuthFlag);
    let inst = h.authenticated("bob").await;
    h.factory.mark_unknown("0000");

    let err = h.gate.send_message(inst.id, "0000", "hi").await.unwrap_err();
    assert!(matches!(err, DispatchError::UnknownRecipient(ref p) if p == "0000"));

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].phone, "0000");
    assert!(h.factory.sent(&inst.id.to_string()).is_empty());
}

#[tokio::test]
async fn send_failure_carries_client_text() {
    let h = harness(SendGate::AuthFlag);
    let inst = h.authenticated("carol").await;
    h.factory.fail_sends("Evaluation failed: socket hang up");

    let err = h.gate.send_message(inst.id, "1", "hi").await.unwrap_err();
    match &err {
        DispatchError::Delivery(text) => assert!(text.contains("socket hang up")),
        other => panic!("expected delivery error, got {other:?}"),
    }
    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
}

#[tokio::test]
async fn lookup_failure_is_a_delivery_error() {
    let h = harness(SendGate::AuthFlag);
    let inst = h.authenticated("dave").await;
    h.factory.fail_lookups("browser closed");

    let err = h.gate.send_message(inst.id, "1", "hi").await.unwrap_err();
    assert!(matches!(err, DispatchError::Delivery(ref t) if t.contains("browser closed")));
    assert_eq!(h.log.len(), 1);
}

struct BrokenLog;

#[async_trait]
impl MessageLog for BrokenLog {
    async fn append(&self, _record: NewMessageRecord) -> LogResult<MessageRecord> {
        Err(LogError::Task("disk full".into()))
    }

    async fn query(&self, _query: HistoryQuery) -> LogResult<Vec<MessageRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn log_failure_does_not_change_the_outcome() {
    let factory = LoopbackFactory::manual();
    let registry = InstanceRegistry::new(Arc::new(factory.clone()), &DispatchConfig::default());
    let gate = DispatchGate::new(registry.clone(), Arc::new(BrokenLog), SendGate::AuthFlag);

    let inst = registry.create("erin").unwrap();
    let mut rx = registry.watch(inst.id).unwrap();
    factory.emit(&inst.id.to_string(), SessionEvent::Authenticated).await;
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|i| i.auth))
        .await
        .unwrap()
        .unwrap();

    let result = gate.send_message(inst.id, "1", "hi").await.unwrap();
    assert!(result.success);
    assert_eq!(factory.sent(&inst.id.to_string()).len(), 1);
}

#[tokio::test]
async fn delete_waits_for_in_flight_send() {
    let h = harness(SendGate::AuthFlag);
    let inst = h.authenticated("frank").await;
    h.factory.delay_sends(Duration::from_millis(300));

    let gate = h.gate.clone();
    let send = tokio::spawn(async move { gate.send_message(inst.id, "1", "hi").await });
    // Let the send take its lease before deleting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.registry.delete(inst.id).await);
    assert_eq!(h.factory.destroy_count(&inst.id.to_string()), 1);

    // The send finished against a live client, not a destroyed one.
    let result = send.await.unwrap();
    assert!(result.is_ok(), "send failed: {result:?}");
    assert_eq!(h.factory.sent(&inst.id.to_string()).len(), 1);
    assert_eq!(h.log.len(), 1);

    let err = h.gate.send_message(inst.id, "1", "hi").await.unwrap_err();
    assert!(matches!(err, DispatchError::InstanceNotFound(_)));
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn events_after_delete_are_dropped() {
    let h = harness(SendGate::AuthFlag);
    let inst = h.authenticated("gina").await;
    assert!(h.registry.delete(inst.id).await);
    assert!(!h.factory.emit(&inst.id.to_string(), SessionEvent::Ready).await);
    assert!(h.registry.get(inst.id).is_err());
}
