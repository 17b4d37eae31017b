pub mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rg_domain::config::Config;

/// relaygate: multi-tenant messaging gateway.
#[derive(Debug, Parser)]
#[command(name = "relaygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `RG_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.  A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("RG_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(config_path).with_context(|| format!("reading {config_path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {config_path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let config = load_config_from("/nonexistent/relaygate.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8080\n\n[client]\nkind = \"loopback\"").unwrap();
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.client.kind, rg_domain::config::ClientKind::Loopback);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains(&path));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["relaygate", "config", "validate"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Config(ConfigCommand::Validate))));
        let cli = Cli::try_parse_from(["relaygate"]).unwrap();
        assert!(cli.command.is_none());
    }
}
