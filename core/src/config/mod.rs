//! Runtime configuration
//!
//! One versioned TOML file supplies identity, initial state, tick bounds,
//! thresholds, model names, and plugin lists. Secrets come from the
//! environment only; env always overrides the file. The lookup function is
//! injected so nothing in core reads process state directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::identity::{AgentIdentity, UserModel};
use crate::agent::state::{AgentState, StateField, TickBounds};
use crate::agent::energy::EnergyConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::pipeline::{AggregationConfig, CognitionConfig, MotorConfig};
use crate::port::llm::LlmConfig;
use crate::plugin::PluginsConfig;
use crate::signal::ack::AckConfig;
use crate::signal::change::ChangeDetectorConfig;
use crate::signal::pattern::PatternDetectorConfig;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error occurred while reading the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// Explicitly requested file does not exist
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    /// Unparseable IANA timezone
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    /// A required value is absent
    #[error("missing required configuration: {0}")]
    Missing(String),
}

fn default_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserSection {
    pub chat_id: Option<String>,
    pub name: Option<String>,
    /// IANA timezone name; empty means UTC
    pub timezone: String,
}

impl UserSection {
    pub fn to_user_model(&self) -> Result<UserModel, ConfigError> {
        let timezone = if self.timezone.is_empty() {
            chrono_tz::UTC
        } else {
            self.timezone
                .parse()
                .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))?
        };
        Ok(UserModel {
            chat_id: self.chat_id.clone(),
            name: self.name.clone(),
            timezone,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InitialStateSection {
    pub energy: f64,
    pub social_debt: f64,
    pub task_pressure: f64,
    pub curiosity: f64,
    pub acquaintance_pressure: f64,
    pub thought_pressure: f64,
}

impl Default for InitialStateSection {
    fn default() -> Self {
        Self {
            energy: 0.8,
            social_debt: 0.0,
            task_pressure: 0.0,
            curiosity: 0.3,
            acquaintance_pressure: 0.0,
            thought_pressure: 0.0,
        }
    }
}

impl InitialStateSection {
    pub fn to_state(&self) -> AgentState {
        let mut state = AgentState::default();
        state.set(StateField::Energy, self.energy);
        state.set(StateField::SocialDebt, self.social_debt);
        state.set(StateField::TaskPressure, self.task_pressure);
        state.set(StateField::Curiosity, self.curiosity);
        state.set(StateField::AcquaintancePressure, self.acquaintance_pressure);
        state.set(StateField::ThoughtPressure, self.thought_pressure);
        state
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub social_debt_rate: f64,
    pub drain_max: usize,
    pub disturbance_gain: f64,
    pub turn_timeout_secs: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            social_debt_rate: 0.004,
            drain_max: 256,
            disturbance_gain: 0.3,
            turn_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    /// Channel name used when an intent names none
    pub default: String,
    /// Loaded from the environment, never from the file
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            default: "console".to_string(),
            token: None,
        }
    }
}

/// The whole config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub data_path: Option<PathBuf>,

    pub identity: AgentIdentity,
    pub user: UserSection,
    pub initial_state: InitialStateSection,
    pub ticks: TickBounds,
    pub energy: EnergyConfig,
    pub heartbeat: HeartbeatSection,
    pub change: ChangeDetectorConfig,
    pub pattern: PatternDetectorConfig,
    pub ack: AckConfig,
    pub aggregation: AggregationConfig,
    pub cognition: CognitionConfig,
    pub motor: MotorConfig,
    pub llm: LlmConfig,
    pub channel: ChannelSection,
    pub plugins: PluginsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            log_level: default_log_level(),
            data_path: None,
            identity: AgentIdentity::default(),
            user: UserSection::default(),
            initial_state: InitialStateSection::default(),
            ticks: TickBounds::default(),
            energy: EnergyConfig::default(),
            heartbeat: HeartbeatSection::default(),
            change: ChangeDetectorConfig::default(),
            pattern: PatternDetectorConfig::default(),
            ack: AckConfig::default(),
            aggregation: AggregationConfig::default(),
            cognition: CognitionConfig::default(),
            motor: MotorConfig::default(),
            llm: LlmConfig::default(),
            channel: ChannelSection::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from an explicit path, or from `<data dir>/config.toml`.
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_data_dir().join("config.toml"), false),
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound(path));
            }
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Self::parse("");
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if config.schema_version > CONFIG_SCHEMA_VERSION {
            tracing::warn!(
                found = config.schema_version,
                supported = CONFIG_SCHEMA_VERSION,
                "config schema is newer than this build; loading anyway"
            );
        }
        Ok(config)
    }

    /// Apply recognized environment variables. `lookup` is injected so
    /// tests and embedders control the environment explicitly.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.channel.token = Some(token);
        }
        if let Some(chat_id) = lookup("PRIMARY_USER_CHAT_ID") {
            self.user.chat_id = Some(chat_id);
        }
        if let Some(model) = lookup("LLM_FAST_MODEL") {
            self.llm.fast_model = model;
        }
        if let Some(model) = lookup("LLM_SMART_MODEL") {
            self.llm.smart_model = model;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = lookup("DATA_PATH") {
            self.data_path = Some(PathBuf::from(path));
        }
    }

    /// Base directory for state, schedules, and storage namespaces
    pub fn data_dir(&self) -> PathBuf {
        self.data_path.clone().unwrap_or_else(default_data_dir)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            tick_bounds: self.ticks.clone(),
            social_debt_rate: self.heartbeat.social_debt_rate,
            drain_max: self.heartbeat.drain_max,
            disturbance_gain: self.heartbeat.disturbance_gain,
            turn_timeout: Duration::from_secs(self.heartbeat.turn_timeout_secs),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses_to_defaults() {
        let config = RuntimeConfig::parse("").unwrap();
        assert_eq!(config.schema_version, CONFIG_SCHEMA_VERSION);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.identity.name, "Vigil");
        assert_eq!(config.channel.default, "console");
    }

    #[test]
    fn sections_override_defaults() {
        let config = RuntimeConfig::parse(
            r#"
            schema_version = 1
            log_level = "debug"

            [identity]
            name = "Iris"
            values = ["honesty"]

            [identity.traits]
            shyness = 0.2

            [user]
            chat_id = "42"
            timezone = "Europe/Berlin"

            [ticks]
            min_secs = 2.0
            max_secs = 30.0
            base_secs = 4.0

            [llm]
            fast_model = "small-model"

            [plugins]
            disabled = ["news"]
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.name, "Iris");
        assert_eq!(config.identity.traits.shyness, 0.2);
        assert_eq!(config.ticks.base_secs, 4.0);
        assert_eq!(config.llm.fast_model, "small-model");
        assert_eq!(config.plugins.disabled, vec!["news".to_string()]);

        let user = config.user.to_user_model().unwrap();
        assert_eq!(user.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(user.chat_id.as_deref(), Some("42"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = RuntimeConfig::parse(
            r#"
            [user]
            chat_id = "from-file"

            [llm]
            fast_model = "file-model"
            "#,
        )
        .unwrap();

        config.apply_env(|key| match key {
            "PRIMARY_USER_CHAT_ID" => Some("from-env".to_string()),
            "LLM_FAST_MODEL" => Some("env-model".to_string()),
            "OPENROUTER_API_KEY" => Some("sk-test".to_string()),
            "LOG_LEVEL" => Some("warn".to_string()),
            _ => None,
        });

        assert_eq!(config.user.chat_id.as_deref(), Some("from-env"));
        assert_eq!(config.llm.fast_model, "env-model");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn newer_schema_loads_with_warning() {
        let config = RuntimeConfig::parse("schema_version = 99").unwrap();
        assert_eq!(config.schema_version, 99);
    }

    #[test]
    fn bad_timezone_is_an_error() {
        let config = RuntimeConfig::parse(
            r#"
            [user]
            timezone = "Mars/Olympus_Mons"
            "#,
        )
        .unwrap();
        assert!(config.user.to_user_model().is_err());
    }

    #[test]
    fn explicit_missing_path_is_fatal() {
        let result = RuntimeConfig::load(Some(Path::new("/nonexistent/vigil.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn initial_state_is_clamped() {
        let config = RuntimeConfig::parse(
            r#"
            [initial_state]
            energy = 1.7
            curiosity = -0.5
            "#,
        )
        .unwrap();
        let state = config.initial_state.to_state();
        assert_eq!(state.energy, 1.0);
        assert_eq!(state.curiosity, 0.0);
    }
}
