//! Lobby Matchmaker - rating-balanced matchmaking queues
//!
//! This crate provides matchmaking queues that pair solo players and parties
//! into balanced games using TrueSkill quality estimates, adaptive queue pop
//! timers and rating-dependent map pools.

pub mod config;
pub mod error;
pub mod matchmaker;
pub mod metrics;
pub mod rating;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaker::{
    CombinedSearch, GameLauncher, Match, MatchmakerPolicy, MatchmakerQueue, Search, SearchOutcome,
};
pub use service::AppState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
