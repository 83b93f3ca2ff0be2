//! Player directory interface and implementations
//!
//! The matchmaker resolves player ids into `Player` values (rating and games
//! played) through this interface when a search is started.

use crate::error::MatchmakingError;
use crate::types::{Player, PlayerId, PlayerRating};
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for player lookups and rating persistence
pub trait PlayerDirectory: Send + Sync {
    /// Get a single player
    fn get_player(&self, player_id: &PlayerId) -> crate::error::Result<Option<Player>>;

    /// Resolve every id, failing on the first unknown player
    fn get_players(&self, player_ids: &[PlayerId]) -> crate::error::Result<Vec<Player>> {
        player_ids
            .iter()
            .map(|player_id| {
                self.get_player(player_id)?.ok_or_else(|| {
                    MatchmakingError::PlayerNotFound {
                        player_id: player_id.clone(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// Store or replace a player
    fn store_player(&self, player: Player) -> crate::error::Result<()>;

    /// Get total number of known players
    fn player_count(&self) -> crate::error::Result<usize>;
}

/// In-memory player directory
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
    players: RwLock<HashMap<PlayerId, Player>>,
}

impl InMemoryPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with players
    pub fn with_players(players: impl IntoIterator<Item = Player>) -> Self {
        let players = players
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect();
        Self {
            players: RwLock::new(players),
        }
    }

    /// Record a finished game for a player: new rating, one more game played
    pub fn record_game(
        &self,
        player_id: &PlayerId,
        new_rating: PlayerRating,
    ) -> crate::error::Result<()> {
        let mut players = self
            .players
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire players write lock".to_string(),
            })?;

        let player = players
            .get_mut(player_id)
            .ok_or_else(|| MatchmakingError::PlayerNotFound {
                player_id: player_id.clone(),
            })?;
        player.rating = new_rating;
        player.games_played += 1;

        Ok(())
    }
}

impl PlayerDirectory for InMemoryPlayerDirectory {
    fn get_player(&self, player_id: &PlayerId) -> crate::error::Result<Option<Player>> {
        let players = self
            .players
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire players read lock".to_string(),
            })?;

        Ok(players.get(player_id).cloned())
    }

    fn store_player(&self, player: Player) -> crate::error::Result<()> {
        let mut players = self
            .players
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire players write lock".to_string(),
            })?;

        players.insert(player.id.clone(), player);
        Ok(())
    }

    fn player_count(&self) -> crate::error::Result<usize> {
        let players = self
            .players
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire players read lock".to_string(),
            })?;

        Ok(players.len())
    }
}
