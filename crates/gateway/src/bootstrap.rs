//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use rg_client::ClientFactory;
use rg_domain::config::{Config, ConfigSeverity, ServerConfig};
use rg_sessions::{DispatchGate, InstanceRegistry, MessageLog, SqliteMessageLog};

use crate::state::AppState;

/// Validate config, open the message log, build the client factory and
/// return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── API token (read once, hash for constant-time comparison) ────
    let Some((source, token)) = resolve_api_token(&config.server) else {
        anyhow::bail!(
            "no API token configured: set server.api_token in the config file or the {} env var",
            config.server.api_token_env
        );
    };
    tracing::info!(source = %source, "API bearer-token auth enabled");

    // ── Messaging client ─────────────────────────────────────────────
    let factory = rg_client::create_factory(&config.client).context("creating messaging client")?;

    // ── Message log ──────────────────────────────────────────────────
    let log = SqliteMessageLog::open(&config.message_log.path).with_context(|| {
        format!(
            "opening message log at {}",
            config.message_log.path.display()
        )
    })?;

    Ok(assemble(config, factory, Arc::new(log), &token))
}

/// Wire the registry, dispatch gate and auth digest around the given
/// collaborators.  Tests use this directly with the loopback client and an
/// in-memory log.
pub fn assemble(
    config: Arc<Config>,
    factory: Arc<dyn ClientFactory>,
    message_log: Arc<dyn MessageLog>,
    api_token: &str,
) -> AppState {
    let registry = InstanceRegistry::new(factory, &config.dispatch);
    let dispatch = DispatchGate::new(registry.clone(), message_log.clone(), config.dispatch.send_gate);
    tracing::info!(send_gate = ?config.dispatch.send_gate, "dispatch gate ready");

    AppState {
        config,
        registry,
        dispatch,
        message_log,
        api_token_hash: Arc::new(hash_token(api_token)),
    }
}

/// Resolve the API token.  `server.api_token` wins over the env var named by
/// `server.api_token_env`; empty values count as unset.  Returns the source
/// label alongside the token.
pub fn resolve_api_token(server: &ServerConfig) -> Option<(String, String)> {
    let env_var = &server.api_token_env;
    server
        .api_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|t| ("config".to_string(), t.to_string()))
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .filter(|t| !t.is_empty())
                .map(|t| (format!("env:{env_var}"), t))
        })
}

pub fn hash_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
