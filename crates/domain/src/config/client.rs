use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messaging client backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which messaging client backs each instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// HTTP bridge to a browser-automation sidecar.
    #[default]
    Bridge,
    /// In-process client that authenticates immediately and accepts every
    /// send. For local development only.
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub kind: ClientKind,
    /// Sidecar base URL (bridge only).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Per-request timeout for sidecar calls, in milliseconds.  The event
    /// stream is exempt.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// Run the automated browser without a window.
    #[serde(default = "d_true")]
    pub headless: bool,
    /// Extra arguments passed to the automated browser.
    #[serde(default = "d_browser_args")]
    pub browser_args: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kind: ClientKind::default(),
            base_url: d_base_url(),
            timeout_ms: d_timeout_ms(),
            headless: true,
            browser_args: d_browser_args(),
        }
    }
}

fn d_base_url() -> String {
    "http://127.0.0.1:3100".into()
}
fn d_timeout_ms() -> u64 {
    30_000
}
fn d_true() -> bool {
    true
}
fn d_browser_args() -> Vec<String> {
    vec!["--no-sandbox".into(), "--disable-setuid-sandbox".into()]
}
