//! Drives a `BridgeClient` against an in-process sidecar.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use rg_client::{Address, BridgeFactory, ClientFactory, MessagingClient, SessionSpec};
use rg_domain::config::ClientConfig;
use rg_domain::error::Error;
use rg_domain::SessionEvent;
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct Sidecar {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Sidecar {
    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

async fn start_session(State(s): State<Sidecar>, Json(body): Json<Value>) -> impl IntoResponse {
    let id = body["sessionId"].as_str().unwrap_or_default().to_owned();
    s.record(format!("start:{id}:headless={}", body["headless"]));
    (StatusCode::CREATED, Json(json!({ "sessionId": id })))
}

async fn session_events(
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = vec![
        json!({ "type": "qr", "payload": "2@abc" }),
        json!({ "type": "battery", "level": 80 }),
        json!({ "type": "authenticated" }),
        json!({ "type": "ready" }),
    ];
    let finite = stream::iter(
        events
            .into_iter()
            .map(|e| Ok::<_, Infallible>(Event::default().event("session").data(e.to_string()))),
    );
    // "ends" closes after the scripted events; every other session stays open.
    let tail: BoxStream<'static, Result<Event, Infallible>> = if id == "ends" {
        stream::empty().boxed()
    } else {
        stream::pending().boxed()
    };
    Sse::new(finite.chain(tail))
}

async fn lookup_number(Path((_id, phone)): Path<(String, String)>) -> impl IntoResponse {
    if phone == "000" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not registered" })));
    }
    (StatusCode::OK, Json(json!({ "chatId": format!("{phone}@c.us") })))
}

async fn send_message(
    State(s): State<Sidecar>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if body["body"] == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "page crashed" })));
    }
    s.record(format!(
        "send:{id}:{}:{}",
        body["chatId"].as_str().unwrap_or_default(),
        body["body"].as_str().unwrap_or_default()
    ));
    (StatusCode::OK, Json(json!({ "id": "true_msg_1" })))
}

async fn delete_session(State(s): State<Sidecar>, Path(id): Path<String>) -> StatusCode {
    s.record(format!("delete:{id}"));
    StatusCode::NO_CONTENT
}

async fn spawn_sidecar() -> (SocketAddr, Sidecar) {
    let sidecar = Sidecar::default();
    let app = Router::new()
        .route("/sessions", post(start_session))
        .route("/sessions/:id", axum::routing::delete(delete_session))
        .route("/sessions/:id/events", get(session_events))
        .route("/sessions/:id/numbers/:phone", get(lookup_number))
        .route("/sessions/:id/messages", post(send_message))
        .with_state(sidecar.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, sidecar)
}

fn factory(base_url: String) -> BridgeFactory {
    BridgeFactory::new(&ClientConfig {
        base_url,
        timeout_ms: 5_000,
        ..ClientConfig::default()
    })
    .unwrap()
}

fn spec(id: &str) -> SessionSpec {
    SessionSpec {
        session_id: id.into(),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn initialize_starts_session_and_forwards_events() {
    let (addr, sidecar) = spawn_sidecar().await;
    let client = factory(format!("http://{addr}")).create(&spec("s1")).unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    client.subscribe(tx);
    client.initialize();

    assert_eq!(
        next_event(&mut rx).await,
        SessionEvent::Qr {
            payload: "2@abc".into()
        }
    );
    // The unknown "battery" event is skipped.
    assert_eq!(next_event(&mut rx).await, SessionEvent::Authenticated);
    assert_eq!(next_event(&mut rx).await, SessionEvent::Ready);
    assert_eq!(sidecar.calls(), vec!["start:s1:headless=true".to_string()]);

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn closed_event_stream_reports_disconnected() {
    let (addr, _sidecar) = spawn_sidecar().await;
    let client = factory(format!("http://{addr}")).create(&spec("ends")).unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    client.subscribe(tx);
    client.initialize();

    for _ in 0..3 {
        next_event(&mut rx).await;
    }
    assert!(matches!(
        next_event(&mut rx).await,
        SessionEvent::Disconnected { .. }
    ));
}

#[tokio::test]
async fn unreachable_sidecar_reports_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = factory(format!("http://{addr}")).create(&spec("s1")).unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    client.subscribe(tx);
    client.initialize();

    match next_event(&mut rx).await {
        SessionEvent::Disconnected { reason } => assert!(!reason.is_empty()),
        other => panic!("expected disconnected, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_and_send() {
    let (addr, sidecar) = spawn_sidecar().await;
    let client = factory(format!("http://{addr}/")).create(&spec("s1")).unwrap();

    assert_eq!(client.resolve_address("000").await.unwrap(), None);

    let address = client.resolve_address("5511999999999").await.unwrap().unwrap();
    assert_eq!(address.chat_id, "5511999999999@c.us");

    let receipt = client.send(&address, "hello").await.unwrap();
    assert_eq!(receipt.message_id.as_deref(), Some("true_msg_1"));
    assert!(sidecar
        .calls()
        .contains(&"send:s1:5511999999999@c.us:hello".to_string()));
}

#[tokio::test]
async fn sidecar_error_surfaces_as_client_error() {
    let (addr, _sidecar) = spawn_sidecar().await;
    let client = factory(format!("http://{addr}")).create(&spec("s1")).unwrap();
    let address = Address {
        chat_id: "1@c.us".into(),
    };
    match client.send(&address, "explode").await {
        Err(Error::Client { backend, message }) => {
            assert_eq!(backend, "bridge");
            assert!(message.contains("500"));
        }
        other => panic!("expected client error, got {other:?}"),
    }
}

#[tokio::test]
async fn destroy_is_idempotent_and_blocks_further_calls() {
    let (addr, sidecar) = spawn_sidecar().await;
    let client = factory(format!("http://{addr}")).create(&spec("s1")).unwrap();

    client.destroy().await.unwrap();
    client.destroy().await.unwrap();
    assert_eq!(
        sidecar.calls().iter().filter(|c| c.starts_with("delete:")).count(),
        1
    );

    assert!(matches!(
        client.resolve_address("123").await,
        Err(Error::SessionClosed(_))
    ));
}
