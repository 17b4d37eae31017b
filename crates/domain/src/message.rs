//! Message log records and dispatch results.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::InstanceId;

/// Format of the `date` column: server local time, second precision.
pub const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current server local time in [`LOCAL_TIMESTAMP_FORMAT`].
pub fn local_timestamp() -> String {
    Local::now().format(LOCAL_TIMESTAMP_FORMAT).to_string()
}

/// One send attempt as stored in the message log. Never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub instance_id: String,
    /// Instance name at send time.
    pub name: String,
    pub phone: String,
    pub message: String,
    pub success: bool,
    pub date: String,
}

/// A record about to be appended; the log assigns `id` and `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageRecord {
    pub instance_id: InstanceId,
    pub name: String,
    pub phone: String,
    pub message: String,
    pub success: bool,
}

/// Filter and paging for history queries. Results keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub instance_id: InstanceId,
    pub name: String,
    pub phone: String,
    pub message: String,
    pub success: bool,
    pub date: DateTime<Utc>,
    /// Identifier the client assigned to the sent message, when it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}
