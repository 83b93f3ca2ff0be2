//! Rating system integration using the TrueSkill algorithm
//!
//! This module provides the rating model consumed by the matchmaker and the
//! player directory searches are resolved against.

pub mod model;
pub mod storage;
pub mod trueskill;

// Re-export commonly used types
pub use model::RatingModel;
pub use storage::{InMemoryPlayerDirectory, PlayerDirectory};
pub use trueskill::TrueSkillModel;
