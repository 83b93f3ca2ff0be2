//! TrueSkill rating model
//!
//! Concrete `RatingModel` backed by the TrueSkill implementation of the
//! skillratings crate.

use crate::config::RatingConfig;
use crate::error::MatchmakingError;
use crate::rating::model::RatingModel;
use crate::types::{GameOutcome, PlayerRating};
use skillratings::trueskill::{
    match_quality, match_quality_two_teams, trueskill_two_teams, TrueSkillConfig, TrueSkillRating,
};
use skillratings::Outcomes;

#[derive(Debug, Clone)]
pub struct TrueSkillModel {
    config: TrueSkillConfig,
    initial_rating: PlayerRating,
}

impl TrueSkillModel {
    /// Create a new TrueSkill model from validated configuration
    pub fn new(config: &RatingConfig) -> crate::error::Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.to_trueskill(),
            initial_rating: config.initial_rating(),
        })
    }

    pub fn beta(&self) -> f64 {
        self.config.beta
    }

    fn convert(ratings: &[PlayerRating]) -> Vec<TrueSkillRating> {
        ratings.iter().map(|&rating| rating.into()).collect()
    }
}

impl Default for TrueSkillModel {
    fn default() -> Self {
        let config = RatingConfig::default();
        Self {
            config: config.to_trueskill(),
            initial_rating: config.initial_rating(),
        }
    }
}

impl RatingModel for TrueSkillModel {
    fn quality(&self, team_a: &[PlayerRating], team_b: &[PlayerRating]) -> f64 {
        if team_a.is_empty() || team_b.is_empty() {
            return 0.0;
        }

        let quality = if team_a.len() == 1 && team_b.len() == 1 {
            match_quality(&team_a[0].into(), &team_b[0].into(), &self.config)
        } else {
            match_quality_two_teams(
                &Self::convert(team_a),
                &Self::convert(team_b),
                &self.config,
            )
        };

        if quality.is_finite() {
            quality.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn update(
        &self,
        team_a: &[PlayerRating],
        team_b: &[PlayerRating],
        outcome: GameOutcome,
    ) -> crate::error::Result<(Vec<PlayerRating>, Vec<PlayerRating>)> {
        if team_a.is_empty() || team_b.is_empty() {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: "Both teams need at least one player".to_string(),
            }
            .into());
        }
        if team_a.iter().chain(team_b).any(|rating| !rating.is_valid()) {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: "Ratings must be finite with a positive deviation".to_string(),
            }
            .into());
        }

        let outcome = match outcome {
            GameOutcome::Win => Outcomes::WIN,
            GameOutcome::Loss => Outcomes::LOSS,
            GameOutcome::Draw => Outcomes::DRAW,
        };

        let (new_a, new_b) = trueskill_two_teams(
            &Self::convert(team_a),
            &Self::convert(team_b),
            &outcome,
            &self.config,
        );

        Ok((
            new_a.into_iter().map(PlayerRating::from).collect(),
            new_b.into_iter().map(PlayerRating::from).collect(),
        ))
    }

    fn initial_rating(&self) -> PlayerRating {
        self.initial_rating
    }
}
