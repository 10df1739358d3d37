use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{ChannelId, TimeFrame};

const ENV_TOKEN: &str = "DISCORD_BOT_TOKEN";
const ENV_CONTROL_CHANNEL: &str = "CHANNEL_ID";
const ENV_DATA_FILE: &str = "ALERTS_FILE";

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_file() -> String {
    "alerts.csv".into()
}

fn default_command_prefix() -> String {
    "/".into()
}

fn default_screener() -> String {
    "forex".into()
}

fn default_exchange() -> String {
    "OANDA".into()
}

fn default_timeframe() -> String {
    "15m".into()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_prompt_timeout_secs() -> u64 {
    60
}

fn default_close_token() -> String {
    "1".into()
}

fn default_continue_token() -> String {
    "2".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_file: default_data_file(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub control_channel_id: u64,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            control_channel_id: ChannelId::NONE.0,
            command_prefix: default_command_prefix(),
        }
    }
}

impl DiscordConfig {
    pub fn control_channel(&self) -> ChannelId {
        ChannelId(self.control_channel_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_screener")]
    pub screener: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            screener: default_screener(),
            exchange: default_exchange(),
            timeframe: default_timeframe(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl MarketConfig {
    /// Validated by [`load`]; falls back to 15m for unvalidated configs.
    pub fn timeframe(&self) -> TimeFrame {
        TimeFrame::from_str(&self.timeframe).unwrap_or(TimeFrame::Min15)
    }
}

/// What the session does once the single price check has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterCheck {
    /// Ask the control channel whether to keep running.
    #[default]
    Prompt,
    /// Close the session unconditionally.
    Close,
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub after_check: AfterCheck,
    #[serde(default = "default_prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,
    #[serde(default = "default_close_token")]
    pub close_token: String,
    #[serde(default = "default_continue_token")]
    pub continue_token: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            after_check: AfterCheck::default(),
            prompt_timeout_secs: default_prompt_timeout_secs(),
            close_token: default_close_token(),
            continue_token: default_continue_token(),
        }
    }
}

/// Load an `AppConfig` from an optional TOML file, apply environment
/// overrides and validate the result.
pub fn load(path: Option<&Path>) -> Result<AppConfig, Report<ConfigError>> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .change_context(ConfigError::ReadFile)
                .attach_with(|| format!("path: {}", path.display()))?;
            toml::from_str(&content).change_context(ConfigError::Parse {
                reason: "invalid TOML syntax or schema mismatch".into(),
            })?
        }
        None => AppConfig::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Overlay values from the environment. `lookup` is injected so tests do not
/// touch the process environment.
fn apply_env(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), Report<ConfigError>> {
    if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
        config.discord.token = token;
    }

    if let Some(raw) = lookup(ENV_CONTROL_CHANNEL) {
        let id = raw
            .trim()
            .parse::<u64>()
            .change_context(ConfigError::Validation {
                field: format!("{ENV_CONTROL_CHANNEL}: \"{raw}\" is not a channel id"),
            })?;
        config.discord.control_channel_id = id;
    }

    if let Some(file) = lookup(ENV_DATA_FILE).filter(|f| !f.is_empty()) {
        config.general.data_file = file;
    }

    Ok(())
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_discord(config)?;
    validate_market(config)?;
    validate_session(config)?;
    Ok(())
}

fn invalid(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn validate_discord(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.discord.token.trim().is_empty() {
        return Err(invalid(format!(
            "discord.token is required (or set {ENV_TOKEN})"
        )));
    }
    if config.discord.command_prefix.is_empty() {
        return Err(invalid("discord.command_prefix must not be empty".into()));
    }
    Ok(())
}

fn validate_market(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if TimeFrame::from_str(&config.market.timeframe).is_none() {
        return Err(invalid(format!(
            "market.timeframe: unknown timeframe \"{}\"",
            config.market.timeframe
        )));
    }
    if config.market.requests_per_second == 0 {
        return Err(invalid("market.requests_per_second must be > 0".into()));
    }
    Ok(())
}

fn validate_session(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let session = &config.session;
    if session.prompt_timeout_secs == 0 {
        return Err(invalid("session.prompt_timeout_secs must be > 0".into()));
    }
    for (name, token) in [
        ("close_token", &session.close_token),
        ("continue_token", &session.continue_token),
    ] {
        if token.chars().count() != 1 || token.trim().is_empty() {
            return Err(invalid(format!(
                "session.{name} \"{token}\" must be a single visible character"
            )));
        }
    }
    if session.close_token == session.continue_token {
        return Err(invalid(
            "session.close_token and session.continue_token must differ".into(),
        ));
    }
    Ok(())
}
