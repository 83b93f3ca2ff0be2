//! Service layer for the matchmaking service
//!
//! This module contains the main application state, the match launchers
//! feeding produced matches to the game launcher, and health reporting.

pub mod app;
pub mod health;
pub mod match_launcher;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus};
pub use match_launcher::{MapHistory, MatchLauncher};
