pub mod config;
pub mod credentials;

use clap::{Parser, Subcommand};

/// Fieldlink keeps one messaging-channel connection alive and exposes
/// it over an admin API.
#[derive(Debug, Parser)]
#[command(name = "fieldlink", version, about)]
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
    /// Persisted channel credentials.
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the config file, reporting errors and warnings.
    Validate,
    /// Print the resolved config (defaults filled in) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum CredentialsCommand {
    /// Delete the stored pairing so the next connect asks for a new one.
    Clear,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `FL_CONFIG` (or `config.toml`
/// by default).  A missing file means all defaults.  Returns the parsed
/// [`Config`](fl_domain::config::Config) and the path that was used.
pub fn load_config() -> anyhow::Result<(fl_domain::config::Config, String)> {
    let config_path = std::env::var("FL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<fl_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(fl_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
