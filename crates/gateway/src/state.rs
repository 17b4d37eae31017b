use std::sync::Arc;

use rg_domain::config::Config;
use rg_sessions::{DispatchGate, InstanceRegistry, MessageLog};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Live instances and their client handles.
    pub registry: InstanceRegistry,
    /// Send authorization and orchestration over `registry`.
    pub dispatch: DispatchGate,
    /// Append-only record of send attempts.
    pub message_log: Arc<dyn MessageLog>,
    /// SHA-256 digest of the API bearer token.
    pub api_token_hash: Arc<[u8; 32]>,
}
