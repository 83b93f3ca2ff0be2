//! Rating model configuration

use crate::error::{MatchmakingError, Result};
use crate::types::PlayerRating;
use serde::{Deserialize, Serialize};
use skillratings::trueskill::TrueSkillConfig;

/// Parameters of the TrueSkill rating model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Skill difference giving roughly 76% win probability
    pub beta: f64,
    /// Additive dynamics factor applied before each update
    pub dynamics: f64,
    pub draw_probability: f64,
    pub initial_mean: f64,
    pub initial_deviation: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            beta: 240.0,
            dynamics: 10.0,
            draw_probability: 0.10,
            initial_mean: 1500.0,
            initial_deviation: 500.0,
        }
    }
}

impl RatingConfig {
    pub fn initial_rating(&self) -> PlayerRating {
        PlayerRating::new(self.initial_mean, self.initial_deviation)
    }

    pub fn to_trueskill(&self) -> TrueSkillConfig {
        TrueSkillConfig {
            draw_probability: self.draw_probability,
            beta: self.beta,
            default_dynamics: self.dynamics,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.beta <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "beta must be positive".to_string(),
            }
            .into());
        }
        if self.dynamics < 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "dynamics must be non-negative".to_string(),
            }
            .into());
        }
        if !(0.0..1.0).contains(&self.draw_probability) {
            return Err(MatchmakingError::ConfigurationError {
                message: "draw_probability must be within [0, 1)".to_string(),
            }
            .into());
        }
        if !self.initial_rating().is_valid() {
            return Err(MatchmakingError::ConfigurationError {
                message: "initial rating must be finite with a positive deviation".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
