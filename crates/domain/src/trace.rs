use serde::Serialize;

/// Structured trace events emitted across the relaygate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    InstanceCreated {
        instance_id: String,
        name: String,
    },
    InstanceDeleted {
        instance_id: String,
    },
    SessionTransition {
        instance_id: String,
        session_event: String,
        from: String,
        to: String,
        auth: bool,
    },
    MessageDispatched {
        instance_id: String,
        outcome: String,
        duration_ms: u64,
    },
    ClientCall {
        backend: String,
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "rg_event");
    }
}
