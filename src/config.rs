use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::audio::manager::PlayerSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio (porcentajes)
    pub default_volume: u16,
    pub max_volume: u16,
    pub max_queue_size: usize,

    // Manager
    pub idle_timeout_secs: u64, // 0 desactiva la desconexión automática
    pub inbox_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_volume: env_or("MAX_VOLUME", defaults.max_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            idle_timeout_secs: env_or("IDLE_TIMEOUT", defaults.idle_timeout_secs)?,
            inbox_capacity: env_or("INBOX_CAPACITY", defaults.inbox_capacity)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be empty
    /// - `MAX_VOLUME` must be between 1 and 1000
    /// - `DEFAULT_VOLUME` cannot exceed `MAX_VOLUME`
    /// - Queue size and inbox capacity must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if !(1..=1000).contains(&self.max_volume) {
            anyhow::bail!("Max volume must be between 1 and 1000, got: {}", self.max_volume);
        }

        if self.default_volume > self.max_volume {
            anyhow::bail!(
                "Default volume ({}) cannot exceed max volume ({})",
                self.default_volume,
                self.max_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.inbox_capacity == 0 {
            anyhow::bail!("Inbox capacity must be greater than 0");
        }

        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// The subset of the configuration the per-guild players need.
    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            default_volume: self.default_volume,
            max_volume: self.max_volume,
            max_queue_size: self.max_queue_size,
            idle_timeout: self.idle_timeout(),
            inbox_capacity: self.inbox_capacity,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Audio: {}% vol (max {}%), {} queue\n  \
            Manager: idle timeout {}, inbox {}",
            self.command_prefix,
            self.default_volume,
            self.max_volume,
            self.max_queue_size,
            self.idle_timeout()
                .map_or("disabled".to_string(), |d| humantime::format_duration(d).to_string()),
            self.inbox_capacity
        )
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} tiene un valor inválido: {}", key, value)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token must be provided)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            default_volume: 100,
            max_volume: 150,
            max_queue_size: 1000,

            idle_timeout_secs: 300, // 5 minutos
            inbox_capacity: 64,
        }
    }
}
