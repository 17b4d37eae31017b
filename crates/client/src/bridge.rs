//! HTTP bridge to a browser-automation sidecar.
//!
//! The sidecar owns the automated browser; this client only speaks its
//! session API:
//!
//! | Call               | Request                                   |
//! |--------------------|-------------------------------------------|
//! | start              | `POST /sessions`                          |
//! | events             | `GET /sessions/{id}/events` (SSE)         |
//! | resolve address    | `GET /sessions/{id}/numbers/{phone}`      |
//! | send               | `POST /sessions/{id}/messages`            |
//! | destroy            | `DELETE /sessions/{id}`                   |
//!
//! A `404` on the number lookup means "not registered on the network".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rg_domain::config::ClientConfig;
use rg_domain::error::{Error, Result};
use rg_domain::trace::TraceEvent;
use rg_domain::SessionEvent;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::sse::{drain_data_lines, parse_event};
use crate::traits::{Address, ClientFactory, DeliveryReceipt, EventSink, MessagingClient, SessionSpec};

const BACKEND: &str = "bridge";

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

fn client_error(message: impl Into<String>) -> Error {
    Error::Client {
        backend: BACKEND.into(),
        message: message.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Creates [`BridgeClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct BridgeFactory {
    /// Pool for request/response calls, bounded by `timeout_ms`.
    http: Client,
    /// Pool for long-lived event streams; only the connect phase is bounded.
    events_http: Client,
    base_url: String,
    headless: bool,
    browser_args: Vec<String>,
}

impl BridgeFactory {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let events_http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            events_http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            headless: cfg.headless,
            browser_args: cfg.browser_args.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ClientFactory for BridgeFactory {
    fn create(&self, spec: &SessionSpec) -> Result<Arc<dyn MessagingClient>> {
        if spec.session_id.is_empty() {
            return Err(client_error("session id must not be empty"));
        }
        Ok(Arc::new(BridgeClient {
            conn: BridgeConnection {
                http: self.http.clone(),
                events_http: self.events_http.clone(),
                base_url: self.base_url.clone(),
                session_id: spec.session_id.clone(),
                headless: self.headless,
                browser_args: self.browser_args.clone(),
            },
            sink: Mutex::new(None),
            cancel: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest<'a> {
    session_id: &'a str,
    headless: bool,
    browser_args: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    body: &'a str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection (cloneable into the event task)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct BridgeConnection {
    http: Client,
    events_http: Client,
    base_url: String,
    session_id: String,
    headless: bool,
    browser_args: Vec<String>,
}

impl BridgeConnection {
    fn session_url(&self, path: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, self.session_id, path)
    }

    /// Send a request and emit a `ClientCall` trace event for it.
    async fn execute(&self, endpoint: &str, rb: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let result = rb.header("X-Client-Type", "relaygate").send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = match &result {
            Ok(resp) => resp.status().as_u16(),
            Err(e) => e.status().map(|s| s.as_u16()).unwrap_or(0),
        };
        TraceEvent::ClientCall {
            backend: BACKEND.into(),
            endpoint: endpoint.to_owned(),
            status,
            duration_ms,
        }
        .emit();

        result.map_err(from_reqwest)
    }

    async fn start(&self) -> Result<()> {
        let endpoint = "POST /sessions";
        let body = StartSessionRequest {
            session_id: &self.session_id,
            headless: self.headless,
            browser_args: &self.browser_args,
        };
        let rb = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(&body);
        ensure_success(endpoint, self.execute(endpoint, rb).await?).await?;
        Ok(())
    }

    /// Forward every event of the session stream into `sink`.
    ///
    /// Returns `Ok` when the consumer has gone away, and an error when the
    /// sidecar closes or breaks the stream.
    async fn follow_events(&self, sink: &EventSink) -> Result<()> {
        let endpoint = "GET /sessions/:id/events";
        let rb = self
            .events_http
            .get(self.session_url("/events"))
            .header(ACCEPT, "text/event-stream");
        let mut resp = ensure_success(endpoint, self.execute(endpoint, rb).await?).await?;

        let mut buffer = String::new();
        while let Some(bytes) = resp.chunk().await.map_err(from_reqwest)? {
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            for data in drain_data_lines(&mut buffer) {
                let Some(event) = parse_event(&self.session_id, &data) else {
                    continue;
                };
                tracing::debug!(session_id = %self.session_id, event = event.kind(), "bridge event");
                if sink.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
        Err(Error::SessionClosed(self.session_id.clone()))
    }

    async fn run(&self, sink: &EventSink) -> Result<()> {
        self.start().await?;
        tracing::info!(session_id = %self.session_id, "bridge session started");
        self.follow_events(sink).await
    }
}

async fn ensure_success(endpoint: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(client_error(format!("{endpoint} returned {status}: {body}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One sidecar session.
pub struct BridgeClient {
    conn: BridgeConnection,
    sink: Mutex<Option<EventSink>>,
    /// Stops the event task on destroy.
    cancel: CancellationToken,
    destroyed: AtomicBool,
}

impl BridgeClient {
    pub fn session_id(&self) -> &str {
        &self.conn.session_id
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed(self.conn.session_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn subscribe(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn initialize(&self) {
        let Some(sink) = self.sink.lock().clone() else {
            tracing::warn!(
                session_id = %self.conn.session_id,
                "initialize called before subscribe, not starting session"
            );
            return;
        };
        let conn = self.conn.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = conn.run(&sink) => outcome,
            };
            if let Err(e) = outcome {
                tracing::warn!(session_id = %conn.session_id, error = %e, "bridge session lost");
                let _ = sink
                    .send(SessionEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
            }
        });
    }

    async fn resolve_address(&self, phone: &str) -> Result<Option<Address>> {
        self.ensure_live()?;
        let endpoint = "GET /sessions/:id/numbers/:phone";
        let rb = self
            .conn
            .http
            .get(self.conn.session_url(&format!("/numbers/{phone}")));
        let resp = self.conn.execute(endpoint, rb).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let resp = ensure_success(endpoint, resp).await?;
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| client_error(format!("failed to parse number lookup: {e}: {body}")))
    }

    async fn send(&self, address: &Address, body: &str) -> Result<DeliveryReceipt> {
        self.ensure_live()?;
        let endpoint = "POST /sessions/:id/messages";
        let rb = self
            .conn
            .http
            .post(self.conn.session_url("/messages"))
            .json(&SendMessageRequest {
                chat_id: &address.chat_id,
                body,
            });
        let resp = ensure_success(endpoint, self.conn.execute(endpoint, rb).await?).await?;

        let text = resp.text().await.map_err(from_reqwest)?;
        if text.trim().is_empty() {
            return Ok(DeliveryReceipt::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| client_error(format!("failed to parse send response: {e}: {text}")))
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.sink.lock().take();

        let endpoint = "DELETE /sessions/:id";
        let resp = self
            .conn
            .execute(endpoint, self.conn.http.delete(self.conn.session_url("")))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(endpoint, resp).await?;
        tracing::info!(session_id = %self.conn.session_id, "bridge session destroyed");
        Ok(())
    }
}
