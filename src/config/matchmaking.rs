//! Matchmaking tuning configuration
//!
//! Every threshold and weight the matching policies, the search quality model
//! and the pop timer read lives here. A queue captures one value of this struct
//! at a time; changing it goes through `MatchmakerQueue::update_config`.

use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One step of the deviation → required quality table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    /// Applies when the highest deviation in a search is at least this value
    pub min_deviation: f64,
    /// Minimum quality required before search expansion is subtracted
    pub quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Games below this quality are never produced by the team matchmaker
    pub minimum_game_quality: f64,
    /// Team average rating difference at which fairness drops to zero
    pub maximum_rating_imbalance: f64,
    /// Rating spread at which uniformity drops to zero
    pub maximum_rating_deviation: f64,
    /// Players with fewer games are newbies
    pub newbie_min_games: u32,
    /// Mean a player with zero games is treated as having
    pub newbie_base_mean: f64,
    /// Displayed rating from which newbies are never force-matched against
    pub high_rated_player_min_rating: f64,
    /// Displayed rating from which the newbie bonus is withheld
    pub top_player_min_rating: f64,
    /// Bonus per player and failed round
    pub time_bonus: f64,
    /// Cap of the time bonus for one team
    pub maximum_time_bonus: f64,
    /// Bonus scaled by the fraction of newbies in a game
    pub newbie_bonus: f64,
    /// Required quality by rating deviation, highest deviation first
    pub quality_thresholds: Vec<QualityThreshold>,
    /// Largest reduction of the match threshold from waiting
    pub search_expansion_max: f64,
    /// Waiting time after which the full expansion applies
    pub search_expansion_saturation_seconds: u64,
    /// Expansion granted per failed matching round
    pub search_expansion_step: f64,
    /// Pools larger than this only connect nearby searches in the graph
    pub full_graph_pool_size: usize,
    /// Partition weight per player, dominating the rating part
    pub partition_player_weight: f64,
    /// Rating radius of a solo player bucket
    pub bucket_radius: f64,
    /// Chain random newbie matching after stable marriage in 1v1 queues
    pub match_newbies_randomly: bool,
    /// Upper bound of the pop delay
    pub queue_pop_time_max: u64,
    /// Lower bound of the pop delay
    pub queue_pop_time_min: u64,
    /// Matches a pop should ideally produce
    pub queue_pop_desired_matches: f64,
    /// Number of past pops averaged by the pop timer
    pub moving_average_window_size: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            minimum_game_quality: 0.4,
            maximum_rating_imbalance: 250.0,
            maximum_rating_deviation: 250.0,
            newbie_min_games: 10,
            newbie_base_mean: 500.0,
            high_rated_player_min_rating: 1400.0,
            top_player_min_rating: 1600.0,
            time_bonus: 0.01,
            maximum_time_bonus: 0.2,
            newbie_bonus: 0.1,
            quality_thresholds: vec![
                QualityThreshold {
                    min_deviation: 250.0,
                    quality: 0.4,
                },
                QualityThreshold {
                    min_deviation: 150.0,
                    quality: 0.6,
                },
                QualityThreshold {
                    min_deviation: 100.0,
                    quality: 0.7,
                },
                QualityThreshold {
                    min_deviation: 0.0,
                    quality: 0.8,
                },
            ],
            search_expansion_max: 0.25,
            search_expansion_saturation_seconds: 300, // 5 minutes
            search_expansion_step: 0.05,
            full_graph_pool_size: 30,
            partition_player_weight: 5000.0,
            bucket_radius: 100.0,
            match_newbies_randomly: true,
            queue_pop_time_max: 90,
            queue_pop_time_min: 10,
            queue_pop_desired_matches: 2.5,
            moving_average_window_size: 5,
        }
    }
}

impl MatchmakingConfig {
    /// Required quality for a search whose largest deviation is `deviation`
    pub fn quality_threshold(&self, deviation: f64) -> f64 {
        self.quality_thresholds
            .iter()
            .find(|step| deviation >= step.min_deviation)
            .or_else(|| self.quality_thresholds.last())
            .map(|step| step.quality)
            .unwrap_or(0.0)
    }

    pub fn search_expansion_saturation(&self) -> Duration {
        Duration::from_secs(self.search_expansion_saturation_seconds)
    }

    pub fn pop_time_max(&self) -> Duration {
        Duration::from_secs(self.queue_pop_time_max)
    }

    pub fn pop_time_min(&self) -> Duration {
        Duration::from_secs(self.queue_pop_time_min)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        fn invalid(message: &str) -> anyhow::Error {
            MatchmakingError::ConfigurationError {
                message: message.to_string(),
            }
            .into()
        }

        if !(0.0..=1.0).contains(&self.minimum_game_quality) {
            return Err(invalid("minimum_game_quality must be within [0, 1]"));
        }
        if self.maximum_rating_imbalance <= 0.0 {
            return Err(invalid("maximum_rating_imbalance must be positive"));
        }
        if self.maximum_rating_deviation <= 0.0 {
            return Err(invalid("maximum_rating_deviation must be positive"));
        }
        if self.time_bonus < 0.0 || self.maximum_time_bonus < 0.0 || self.newbie_bonus < 0.0 {
            return Err(invalid("bonuses must be non-negative"));
        }
        if self.quality_thresholds.is_empty() {
            return Err(invalid("quality_thresholds cannot be empty"));
        }
        if self
            .quality_thresholds
            .windows(2)
            .any(|pair| pair[0].min_deviation <= pair[1].min_deviation)
        {
            return Err(invalid(
                "quality_thresholds must be ordered by strictly decreasing min_deviation",
            ));
        }
        if self
            .quality_thresholds
            .iter()
            .any(|step| !(0.0..=1.0).contains(&step.quality))
        {
            return Err(invalid("quality threshold values must be within [0, 1]"));
        }
        if self.search_expansion_max < 0.0 || self.search_expansion_step < 0.0 {
            return Err(invalid("search expansion values must be non-negative"));
        }
        if self.search_expansion_saturation_seconds == 0 {
            return Err(invalid(
                "search_expansion_saturation_seconds must be greater than 0",
            ));
        }
        if self.full_graph_pool_size < 2 {
            return Err(invalid("full_graph_pool_size must be at least 2"));
        }
        if self.partition_player_weight <= 0.0 {
            return Err(invalid("partition_player_weight must be positive"));
        }
        if self.bucket_radius <= 0.0 {
            return Err(invalid("bucket_radius must be positive"));
        }
        if self.queue_pop_time_min == 0 {
            return Err(invalid("queue_pop_time_min must be greater than 0"));
        }
        if self.queue_pop_time_min > self.queue_pop_time_max {
            return Err(invalid(
                "queue_pop_time_min must not exceed queue_pop_time_max",
            ));
        }
        if self.queue_pop_desired_matches <= 0.0 {
            return Err(invalid("queue_pop_desired_matches must be positive"));
        }
        if self.moving_average_window_size == 0 {
            return Err(invalid("moving_average_window_size must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MatchmakingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_quality_threshold_steps() {
        let config = MatchmakingConfig::default();
        assert_eq!(config.quality_threshold(500.0), 0.4);
        assert_eq!(config.quality_threshold(250.0), 0.4);
        assert_eq!(config.quality_threshold(175.0), 0.6);
        assert_eq!(config.quality_threshold(125.0), 0.7);
        assert_eq!(config.quality_threshold(64.0), 0.8);
    }

    #[test]
    fn test_invalid_pop_bounds() {
        let config = MatchmakingConfig {
            queue_pop_time_min: 120,
            queue_pop_time_max: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = MatchmakingConfig::default();
        config.quality_thresholds.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        let config = MatchmakingConfig {
            minimum_game_quality: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
