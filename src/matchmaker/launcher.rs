//! Game launching boundary

use crate::error::{MatchmakingError, Result};
use crate::matchmaker::registry::ConnectionRegistry;
use crate::types::{GameLaunch, LobbyNotification, PlayerId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Starts the games produced by the matchmaker
#[async_trait]
pub trait GameLauncher: Send + Sync {
    async fn launch_game(&self, launch: GameLaunch) -> Result<()>;
}

/// Launcher that hands the game to its players through their connections
///
/// Every player of both rosters must be connected, otherwise nobody is
/// notified and the launch fails.
pub struct NotifyingGameLauncher {
    registry: Arc<ConnectionRegistry>,
}

impl NotifyingGameLauncher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    fn notify_team(
        &self,
        launch: &GameLaunch,
        team: u8,
        roster: &[PlayerId],
        opponents: &[PlayerId],
    ) -> Result<()> {
        for player_id in roster {
            self.registry.notify(
                player_id,
                LobbyNotification::MatchFound {
                    queue_name: launch.queue_name.clone(),
                    game_id: launch.game_id,
                },
            )?;
            self.registry.notify(
                player_id,
                LobbyNotification::GameLaunch {
                    game_id: launch.game_id,
                    map: launch.map.clone(),
                    team,
                    teammates: roster.iter().filter(|id| *id != player_id).cloned().collect(),
                    opponents: opponents.to_vec(),
                },
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl GameLauncher for NotifyingGameLauncher {
    async fn launch_game(&self, launch: GameLaunch) -> Result<()> {
        if let Some(missing) = launch.players().find(|id| !self.registry.is_connected(id)) {
            return Err(MatchmakingError::PlayerNotFound {
                player_id: missing.clone(),
            }
            .into());
        }

        self.notify_team(&launch, 1, &launch.team_a, &launch.team_b)?;
        self.notify_team(&launch, 2, &launch.team_b, &launch.team_a)?;

        info!(
            "Launched game {} in {} on {}: {:?} vs {:?}",
            launch.game_id, launch.queue_name, launch.map.name, launch.team_a, launch.team_b
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Map;
    use crate::utils::{current_timestamp, generate_game_id};

    fn launch() -> GameLaunch {
        GameLaunch {
            game_id: generate_game_id(),
            queue_name: "tmm2v2".to_string(),
            team_a: vec!["a1".to_string(), "a2".to_string()],
            team_b: vec!["b1".to_string(), "b2".to_string()],
            map: Map {
                id: 201,
                name: "canis".to_string(),
                path: "maps/canis.zip".to_string(),
            },
            quality: 0.8,
            timestamp: current_timestamp(),
        }
    }

    #[tokio::test]
    async fn test_players_receive_their_roster() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a1 = registry.register("a1").unwrap();
        let _a2 = registry.register("a2").unwrap();
        let mut b1 = registry.register("b1").unwrap();
        let _b2 = registry.register("b2").unwrap();

        let launcher = NotifyingGameLauncher::new(registry);
        launcher.launch_game(launch()).await.unwrap();

        assert!(matches!(
            a1.recv().await,
            Some(LobbyNotification::MatchFound { .. })
        ));
        match a1.recv().await {
            Some(LobbyNotification::GameLaunch {
                team,
                teammates,
                opponents,
                ..
            }) => {
                assert_eq!(team, 1);
                assert_eq!(teammates, vec!["a2".to_string()]);
                assert_eq!(opponents, vec!["b1".to_string(), "b2".to_string()]);
            }
            other => panic!("unexpected notification {:?}", other),
        }

        b1.recv().await.unwrap();
        match b1.recv().await {
            Some(LobbyNotification::GameLaunch { team, .. }) => assert_eq!(team, 2),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_player_aborts_launch() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a1 = registry.register("a1").unwrap();
        let _a2 = registry.register("a2").unwrap();
        let _b1 = registry.register("b1").unwrap();

        let launcher = NotifyingGameLauncher::new(registry);
        let err = launcher.launch_game(launch()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::PlayerNotFound { player_id }) if player_id == "b2"
        ));
        assert!(a1.try_recv().is_err());
    }
}
