pub mod config;
pub mod keygen;

use clap::{Parser, Subcommand};

use i3_domain::config::Config;

/// i3-gateway — an Intermud-3 gateway for MUD servers.
#[derive(Debug, Parser)]
#[command(name = "i3-gateway", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, short, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Mint a new API key and print the config stanza for it.
    Keygen {
        /// Mud name the key authenticates as.
        #[arg(long)]
        mud_name: String,
        /// Method tags granted to the key (repeatable).
        #[arg(long, default_value = "*")]
        permission: Vec<String>,
    },
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

/// Load the config file, falling back to built-in defaults when the
/// file does not exist. Environment overrides apply either way.
pub fn load_config(path: &str) -> anyhow::Result<(Config, String)> {
    let config = if std::path::Path::new(path).exists() {
        let raw = std::fs::read_to_string(path)?;
        Config::from_toml_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?
    } else {
        tracing::info!(path, "config file not found, using defaults + environment");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };
    Ok((config, path.to_string()))
}
