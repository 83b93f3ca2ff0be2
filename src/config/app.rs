//! Main application configuration
//!
//! This module defines the top-level configuration of the matchmaking service,
//! loaded from a TOML file or from environment variables, and its validation.

use crate::config::matchmaking::MatchmakingConfig;
use crate::config::queue::{default_queues, QueueSettings};
use crate::config::rating::RatingConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueSettings>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// Default time a search may wait before it is timed out
    pub search_timeout_seconds: u64,
    /// Number of recent maps remembered per player
    pub map_history_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            rating: RatingConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            queues: default_queues(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "lobby-matchmaker".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
            search_timeout_seconds: 900, // 15 minutes
            map_history_size: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            self.service.health_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HEALTH_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }
        if let Ok(timeout) = env::var("SEARCH_TIMEOUT_SECONDS") {
            self.service.search_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SEARCH_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Matchmaking settings
        if let Ok(quality) = env::var("MINIMUM_GAME_QUALITY") {
            self.matchmaking.minimum_game_quality = quality
                .parse()
                .map_err(|_| anyhow!("Invalid MINIMUM_GAME_QUALITY value: {}", quality))?;
        }
        if let Ok(games) = env::var("NEWBIE_MIN_GAMES") {
            self.matchmaking.newbie_min_games = games
                .parse()
                .map_err(|_| anyhow!("Invalid NEWBIE_MIN_GAMES value: {}", games))?;
        }
        if let Ok(pop_time) = env::var("QUEUE_POP_TIME_MAX") {
            self.matchmaking.queue_pop_time_max = pop_time
                .parse()
                .map_err(|_| anyhow!("Invalid QUEUE_POP_TIME_MAX value: {}", pop_time))?;
        }
        if let Ok(matches) = env::var("QUEUE_POP_DESIRED_MATCHES") {
            self.matchmaking.queue_pop_desired_matches = matches
                .parse()
                .map_err(|_| anyhow!("Invalid QUEUE_POP_DESIRED_MATCHES value: {}", matches))?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get default search timeout as Duration
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.service.search_timeout_seconds)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.iter().find(|queue| queue.name == name)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.search_timeout_seconds == 0 {
        return Err(anyhow!("Search timeout must be greater than 0"));
    }

    config.rating.validate()?;
    config.matchmaking.validate()?;

    // Validate queues
    if config.queues.is_empty() {
        return Err(anyhow!("At least one queue must be configured"));
    }
    let mut names = HashSet::new();
    for queue in &config.queues {
        queue.validate()?;
        if !names.insert(queue.name.as_str()) {
            return Err(anyhow!("Duplicate queue name: {}", queue.name));
        }
    }

    Ok(())
}
