//! Player connection registry
//!
//! Searches and matches only carry player ids. Whoever needs to reach a
//! player looks the id up here at notification time.

use crate::error::{MatchmakingError, Result};
use crate::types::{LobbyNotification, PlayerId};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<PlayerId, mpsc::UnboundedSender<LobbyNotification>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player, replacing any previous connection
    pub fn register(
        &self,
        player_id: impl Into<PlayerId>,
    ) -> Result<mpsc::UnboundedReceiver<LobbyNotification>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let player_id = player_id.into();

        let mut connections =
            self.connections
                .write()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire connection registry write lock".to_string(),
                })?;
        if connections.insert(player_id.clone(), sender).is_some() {
            debug!("Player {} reconnected, dropping the old connection", player_id);
        }

        Ok(receiver)
    }

    pub fn unregister(&self, player_id: &PlayerId) -> Result<bool> {
        let mut connections =
            self.connections
                .write()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire connection registry write lock".to_string(),
                })?;

        Ok(connections.remove(player_id).is_some())
    }

    /// Whether the player has a connection that is still open
    pub fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.connections
            .read()
            .map(|connections| {
                connections
                    .get(player_id)
                    .is_some_and(|sender| !sender.is_closed())
            })
            .unwrap_or(false)
    }

    pub fn connected_players(&self) -> usize {
        self.connections
            .read()
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    /// Deliver a notification; fails when the player is not reachable
    pub fn notify(&self, player_id: &PlayerId, notification: LobbyNotification) -> Result<()> {
        let delivered = {
            let connections =
                self.connections
                    .read()
                    .map_err(|_| MatchmakingError::InternalError {
                        message: "Failed to acquire connection registry read lock".to_string(),
                    })?;
            match connections.get(player_id) {
                Some(sender) => sender.send(notification).is_ok(),
                None => false,
            }
        };

        if !delivered {
            // Closed connections are forgotten on first use
            self.unregister(player_id)?;
            return Err(MatchmakingError::PlayerNotFound {
                player_id: player_id.clone(),
            }
            .into());
        }
        Ok(())
    }
}
