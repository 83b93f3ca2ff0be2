//! Rating model trait
//!
//! The matchmaker consumes the skill model as an opaque capability: a
//! symmetric match quality in `[0, 1]` for two groups of ratings, and an
//! update of both groups after a game.

use crate::types::{GameOutcome, PlayerRating};

/// Trait for scoring and updating player ratings
pub trait RatingModel: Send + Sync {
    /// Estimated quality of a game between two teams
    ///
    /// Must be symmetric in its arguments and return a value in `[0, 1]`.
    fn quality(&self, team_a: &[PlayerRating], team_b: &[PlayerRating]) -> f64;

    /// New ratings of both teams after a game, `outcome` from `team_a`'s view
    fn update(
        &self,
        team_a: &[PlayerRating],
        team_b: &[PlayerRating],
        outcome: GameOutcome,
    ) -> crate::error::Result<(Vec<PlayerRating>, Vec<PlayerRating>)>;

    /// Rating assigned to players without history
    fn initial_rating(&self) -> PlayerRating;
}
