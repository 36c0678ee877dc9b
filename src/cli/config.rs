//! Vestibule configuration file handling.
//!
//! Provides default configuration generation and loading for the bot.
//! Configuration files are TOML format and live in the data directory
//! next to the database. The bot token can also come from the
//! `VESTIBULE_BOT_TOKEN` environment variable so it stays out of files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vestibule::gatekeeper::{EngineConfig, IntroPolicy};

/// Default log level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Vestibule bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VestibuleConfig {
    /// Transport configuration
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Gatekeeping tuning
    #[serde(default)]
    pub gatekeeper: GatekeeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. `VESTIBULE_BOT_TOKEN` takes precedence over this value.
    pub token: Option<String>,

    /// Long-poll timeout in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Gatekeeping tuning, lowered into [`EngineConfig`] at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Join events with more members than this skip the welcome reply.
    #[serde(default = "default_mass_join_threshold")]
    pub mass_join_threshold: usize,

    /// Cooldown between welcome replies per chat, in seconds.
    #[serde(default = "default_welcome_cooldown")]
    pub welcome_cooldown_secs: u64,

    /// Cooldown between gatekeeping reminders per user, in seconds.
    #[serde(default = "default_reminder_cooldown")]
    pub reminder_cooldown_secs: u64,

    /// Lifetime of self-deleting replies, in seconds.
    #[serde(default = "default_ephemeral_delete")]
    pub ephemeral_delete_secs: u64,

    /// Window for counting introduction attempts, in seconds.
    #[serde(default = "default_intro_window")]
    pub intro_window_secs: u64,

    /// Introduction attempts allowed per window before going silent.
    #[serde(default = "default_intro_attempts")]
    pub intro_max_attempts: u32,

    /// Shortest acceptable introduction, in chars.
    #[serde(default = "default_intro_min_length")]
    pub intro_min_length: usize,

    /// Longest acceptable introduction, in chars.
    #[serde(default = "default_intro_max_length")]
    pub intro_max_length: usize,

    /// Length at which the keyword requirement is waived.
    #[serde(default = "default_intro_bypass_length")]
    pub intro_bypass_length: usize,

    /// Keyword list override; empty means the built-in list.
    #[serde(default)]
    pub intro_keywords: Vec<String>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            mass_join_threshold: default_mass_join_threshold(),
            welcome_cooldown_secs: default_welcome_cooldown(),
            reminder_cooldown_secs: default_reminder_cooldown(),
            ephemeral_delete_secs: default_ephemeral_delete(),
            intro_window_secs: default_intro_window(),
            intro_max_attempts: default_intro_attempts(),
            intro_min_length: default_intro_min_length(),
            intro_max_length: default_intro_max_length(),
            intro_bypass_length: default_intro_bypass_length(),
            intro_keywords: Vec::new(),
        }
    }
}

impl GatekeeperConfig {
    /// Lower into the engine's tuning struct.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut intro = IntroPolicy {
            min_length: self.intro_min_length,
            max_length: self.intro_max_length,
            bypass_length: self.intro_bypass_length,
            ..IntroPolicy::default()
        };
        if !self.intro_keywords.is_empty() {
            intro.keywords = self.intro_keywords.clone();
        }
        EngineConfig {
            mass_join_threshold: self.mass_join_threshold,
            welcome_window: Duration::from_secs(self.welcome_cooldown_secs),
            reminder_window: Duration::from_secs(self.reminder_cooldown_secs),
            ephemeral_delete_after: Duration::from_secs(self.ephemeral_delete_secs),
            intro_window: Duration::from_secs(self.intro_window_secs),
            intro_max_attempts: self.intro_max_attempts,
            intro,
            ..EngineConfig::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_mass_join_threshold() -> usize {
    10
}

fn default_welcome_cooldown() -> u64 {
    30
}

fn default_reminder_cooldown() -> u64 {
    60
}

fn default_ephemeral_delete() -> u64 {
    30
}

fn default_intro_window() -> u64 {
    60
}

fn default_intro_attempts() -> u32 {
    5
}

fn default_intro_min_length() -> usize {
    50
}

fn default_intro_max_length() -> usize {
    4000
}

fn default_intro_bypass_length() -> usize {
    400
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl VestibuleConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: VestibuleConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Generate default configuration content as a string with comments.
    pub fn generate_default_toml() -> String {
        format!(
            r#"# Vestibule Bot Configuration
#
# Which chat is gatekept and which chat collects introductions is NOT set
# here: an admin configures those live with /set_main and /set_intro, and
# the assignment is stored in the database.

[telegram]
# Bot token. Prefer the VESTIBULE_BOT_TOKEN environment variable so the
# token stays out of files.
# token = "123456:ABC-DEF..."

# Long-poll timeout in seconds
poll_timeout_secs = 30

[database]
# Path to the SQLite database file
path = "{database}"

[gatekeeper]
# Join events with more members than this skip the welcome reply
mass_join_threshold = 10

# Cooldowns, in seconds
welcome_cooldown_secs = 30
reminder_cooldown_secs = 60
ephemeral_delete_secs = 30

# Introduction attempt limiting
intro_window_secs = 60
intro_max_attempts = 5

# Introduction acceptance policy (lengths in characters)
intro_min_length = 50
intro_max_length = 4000
intro_bypass_length = 400

# Keyword list override; leave empty for the built-in list
intro_keywords = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"
"#,
            database = default_database_path().display()
        )
    }

    /// Create and save a default configuration file.
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Data directory: `~/.local/share/vestibule` (or platform equivalent).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vestibule")
}

/// Default config file path inside the data directory.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Default database path inside the data directory.
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("vestibule.db")
}
