//! Configuration system for the Taskboard collaboration server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! The config file also seeds the static credential and team directories:
//! `[[users]]` entries map tokens to users, `[[teams]]` entries declare team
//! rosters.

use std::path::PathBuf;

use crate::broadcast::DEFAULT_OUTBOUND_QUEUE_DEPTH;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BoardConfigFile {
    server: ServerFileConfig,
    users: Vec<UserEntry>,
    teams: Vec<TeamEntry>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    outbound_queue_depth: Option<usize>,
}

/// A `[[users]]` entry: one credential token mapped to a user.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserEntry {
    /// Credential token presented by the client.
    pub token: String,
    /// Stable user id.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Optional avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A `[[teams]]` entry: a team and its roster.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TeamEntry {
    /// Team id.
    pub team_id: String,
    /// User id of the team owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Regular member user ids.
    #[serde(default)]
    pub members: Vec<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the collaboration server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskboard collaboration server")]
pub struct BoardCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "TASKBOARD_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-connection outbound event queue depth.
    #[arg(long)]
    pub outbound_queue_depth: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug)]
pub struct BoardConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Per-connection outbound event queue depth.
    pub outbound_queue_depth: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Credential table from the config file.
    pub users: Vec<UserEntry>,
    /// Team rosters from the config file.
    pub teams: Vec<TeamEntry>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            log_level: "info".to_string(),
            users: Vec::new(),
            teams: Vec::new(),
        }
    }
}

impl BoardConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &BoardCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `BoardConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &BoardCliArgs, file: BoardConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            outbound_queue_depth: cli
                .outbound_queue_depth
                .or(file.server.outbound_queue_depth)
                .unwrap_or(defaults.outbound_queue_depth),
            log_level: cli.log_level.clone(),
            users: file.users,
            teams: file.teams,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BoardConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BoardConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BoardConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
