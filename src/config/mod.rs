//! Configuration management for the lobby-matchmaker service
//!
//! This module handles configuration loading from files and environment
//! variables, validation, and default values. Components receive their
//! configuration at construction; nothing reads it from a global.

pub mod app;
pub mod matchmaking;
pub mod queue;
pub mod rating;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, ServiceSettings};
pub use matchmaking::{MatchmakingConfig, QualityThreshold};
pub use queue::{default_queues, MapPoolSettings, PolicyKind, QueueSettings};
pub use rating::RatingConfig;
