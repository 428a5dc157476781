//! Configuration for the `Taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::ids::UserId;
use taskboard_proto::task::MAX_TASK_TITLE_LENGTH;

use crate::dnd::OFFSCREEN_SENTINEL;
use crate::identity::Identity;

/// Errors that can occur when loading configuration.
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

    /// The configured user id is not a UUID.
    #[error("invalid user id: {0}")]
    InvalidUserId(#[from] uuid::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    identity: IdentityFileConfig,
    sync: SyncFileConfig,
    drag: DragFileConfig,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    user_id: Option<String>,
    email: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    mutation_timeout_ms: Option<u64>,
    max_task_title_len: Option<usize>,
}

/// `[drag]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DragFileConfig {
    offscreen_sentinel: Option<f64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Engine knobs handed to a board session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// How long a persistence call may stay in flight before it is settled
    /// as failed and rolled back.
    pub mutation_timeout: Duration,
    /// Maximum task title length in characters.
    pub max_task_title_len: usize,
    /// Coordinate the pointer is parked at while nothing is dragged.
    pub offscreen_sentinel: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: Duration::from_secs(15),
            max_task_title_len: MAX_TASK_TITLE_LENGTH,
            offscreen_sentinel: OFFSCREEN_SENTINEL,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Signed-in user id; a fresh one is generated when unset.
    pub user_id: Option<String>,
    /// Signed-in user e-mail.
    pub email: String,
    /// Engine settings.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            email: "demo@taskboard.local".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the default file exists but is malformed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.identity.user_id.clone()),
            email: cli
                .email
                .clone()
                .or_else(|| file.identity.email.clone())
                .unwrap_or(defaults.email),
            sync: SyncConfig {
                mutation_timeout: cli
                    .mutation_timeout_ms
                    .or(file.sync.mutation_timeout_ms)
                    .map_or(defaults.sync.mutation_timeout, Duration::from_millis),
                max_task_title_len: file
                    .sync
                    .max_task_title_len
                    .unwrap_or(defaults.sync.max_task_title_len),
                offscreen_sentinel: file
                    .drag
                    .offscreen_sentinel
                    .unwrap_or(defaults.sync.offscreen_sentinel),
            },
        }
    }

    /// The identity this client acts as.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUserId`] if a configured id is not a
    /// UUID.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let user_id = match &self.user_id {
            Some(raw) => raw.parse::<UserId>()?,
            None => UserId::new(),
        };
        Ok(Identity::new(user_id, self.email.clone()))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Collaborative task board sync engine demo")]
pub struct CliArgs {
    /// User id to act as (UUID).
    #[arg(long, env = "TASKBOARD_USER_ID")]
    pub user_id: Option<String>,

    /// E-mail shown to collaborators.
    #[arg(long, env = "TASKBOARD_EMAIL")]
    pub email: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Persistence call timeout in milliseconds.
    #[arg(long)]
    pub mutation_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskboard").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
