use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch & message log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Predicate deciding whether an instance may send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendGate {
    /// Latest `auth` flag: set on `authenticated`, cleared on `auth_failure`
    /// and `disconnected`, untouched by `ready`.
    #[default]
    AuthFlag,
    /// Only instances in the `ready` state may send.
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub send_gate: SendGate,
    /// Capacity of each instance's event channel.
    #[serde(default = "d_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_gate: SendGate::default(),
            event_buffer: d_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogConfig {
    /// SQLite database file holding the `messages` table.
    #[serde(default = "d_log_path")]
    pub path: PathBuf,
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self { path: d_log_path() }
    }
}

fn d_event_buffer() -> usize {
    64
}
fn d_log_path() -> PathBuf {
    PathBuf::from("./message_logs.db")
}
