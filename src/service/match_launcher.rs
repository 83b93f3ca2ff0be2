//! Turns published matches into launched games

use crate::error::{MatchmakingError, Result};
use crate::matchmaker::{GameLauncher, Match, MatchmakerQueue};
use crate::metrics::MetricsCollector;
use crate::types::{GameLaunch, MapId, PlayerId};
use crate::utils::{current_timestamp, generate_game_id};
use futures::{Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Maps each player played most recently, newest last
#[derive(Debug)]
pub struct MapHistory {
    size: usize,
    played: Mutex<HashMap<PlayerId, VecDeque<MapId>>>,
}

impl MapHistory {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            played: Mutex::new(HashMap::new()),
        }
    }

    pub fn record<'a>(&self, players: impl IntoIterator<Item = &'a PlayerId>, map_id: MapId) {
        if self.size == 0 {
            return;
        }
        let Ok(mut played) = self.played.lock() else {
            error!("Map history lock poisoned, dropping entry for map {}", map_id);
            return;
        };

        for player_id in players {
            let history = played.entry(player_id.clone()).or_default();
            if history.len() == self.size {
                history.pop_front();
            }
            history.push_back(map_id);
        }
    }

    /// Every recent map of every given player, duplicates included
    pub fn recent<'a>(&self, players: impl IntoIterator<Item = &'a PlayerId>) -> Vec<MapId> {
        let Ok(played) = self.played.lock() else {
            return Vec::new();
        };

        players
            .into_iter()
            .filter_map(|player_id| played.get(player_id))
            .flat_map(|history| history.iter().copied())
            .collect()
    }
}

/// Consumes one queue's matches and launches them
pub struct MatchLauncher {
    queue: Arc<MatchmakerQueue>,
    launcher: Arc<dyn GameLauncher>,
    map_history: Arc<MapHistory>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchLauncher {
    pub fn new(
        queue: Arc<MatchmakerQueue>,
        launcher: Arc<dyn GameLauncher>,
        map_history: Arc<MapHistory>,
    ) -> Self {
        Self {
            queue,
            launcher,
            map_history,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Launch every match of `matches` until the stream ends
    pub async fn run<S>(self, mut matches: S)
    where
        S: Stream<Item = Match> + Unpin,
    {
        info!("Match launcher of queue {} started", self.queue.name());
        while let Some(game) = matches.next().await {
            if let Err(e) = self.handle_match(game).await {
                error!(
                    "Failed to launch a match of queue {}: {}",
                    self.queue.name(),
                    e
                );
            }
        }
        info!("Match launcher of queue {} stopped", self.queue.name());
    }

    pub async fn handle_match(&self, game: Match) -> Result<GameLaunch> {
        let team_a: Vec<PlayerId> = game.team_a.player_ids().cloned().collect();
        let team_b: Vec<PlayerId> = game.team_b.player_ids().cloned().collect();

        let rating = game.average_rating();
        let pool = self.queue.map_pool_for_rating(rating).ok_or_else(|| {
            MatchmakingError::EmptyMapPool {
                pool: format!("{} at rating {:.0}", self.queue.name(), rating),
            }
        })?;
        let played = self.map_history.recent(team_a.iter().chain(&team_b));
        let map = pool.choose_map(&played)?;
        debug!(
            "Chose map {} from pool {} for a game rated {:.0}",
            map.name,
            pool.name(),
            rating
        );

        let launch = GameLaunch {
            game_id: generate_game_id(),
            queue_name: self.queue.name().to_string(),
            team_a,
            team_b,
            map,
            quality: game.quality,
            timestamp: current_timestamp(),
        };

        let result = self.launcher.launch_game(launch.clone()).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_game_launch(self.queue.name(), result.is_ok());
        }
        result?;

        self.map_history.record(launch.players(), launch.map.id);
        Ok(launch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_queues, MatchmakingConfig, QueueSettings};
    use crate::matchmaker::Team;
    use crate::rating::TrueSkillModel;
    use crate::types::{Player, PlayerRating};
    use async_trait::async_trait;

    struct RecordingLauncher {
        launched: Mutex<Vec<GameLaunch>>,
        fail: bool,
    }

    #[async_trait]
    impl GameLauncher for RecordingLauncher {
        async fn launch_game(&self, launch: GameLaunch) -> Result<()> {
            if self.fail {
                anyhow::bail!("game server unavailable");
            }
            self.launched.lock().unwrap().push(launch);
            Ok(())
        }
    }

    fn queue(settings: &QueueSettings) -> Arc<MatchmakerQueue> {
        Arc::new(
            MatchmakerQueue::new(
                settings,
                MatchmakingConfig::default(),
                Arc::new(TrueSkillModel::default()),
            )
            .unwrap(),
        )
    }

    fn ladder_match(queue: &MatchmakerQueue) -> Match {
        let a = queue
            .create_search(vec![Player::new("a", PlayerRating::new(1500.0, 80.0), 100)])
            .unwrap();
        let b = queue
            .create_search(vec![Player::new("b", PlayerRating::new(1500.0, 80.0), 100)])
            .unwrap();
        Match::new(Team::Single(a), Team::Single(b), 0.9)
    }

    #[test]
    fn test_map_history_is_bounded() {
        let history = MapHistory::new(2);
        let alice = "alice".to_string();
        history.record([&alice], 1);
        history.record([&alice], 2);
        history.record([&alice], 3);
        assert_eq!(history.recent([&alice]), vec![2, 3]);
        assert!(history.recent([&"bob".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn test_launch_records_map_history() {
        let queues = default_queues();
        let ladder = queue(&queues[0]);
        let launcher = Arc::new(RecordingLauncher {
            launched: Mutex::new(Vec::new()),
            fail: false,
        });
        let history = Arc::new(MapHistory::new(5));
        let match_launcher = MatchLauncher::new(ladder.clone(), launcher.clone(), history.clone());

        let launch = match_launcher.handle_match(ladder_match(&ladder)).await.unwrap();
        assert_eq!(launch.team_a, vec!["a".to_string()]);
        assert_eq!(launch.team_b, vec!["b".to_string()]);
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
        assert_eq!(history.recent([&"a".to_string()]), vec![launch.map.id]);

        // The next game of the same players avoids the map just played
        let next = match_launcher.handle_match(ladder_match(&ladder)).await.unwrap();
        assert_ne!(next.map.id, launch.map.id);
    }

    #[tokio::test]
    async fn test_failed_launch_is_reported() {
        let queues = default_queues();
        let ladder = queue(&queues[0]);
        let launcher = Arc::new(RecordingLauncher {
            launched: Mutex::new(Vec::new()),
            fail: true,
        });
        let history = Arc::new(MapHistory::new(5));
        let match_launcher = MatchLauncher::new(ladder.clone(), launcher, history.clone());

        assert!(match_launcher.handle_match(ladder_match(&ladder)).await.is_err());
        assert!(history.recent([&"a".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn test_missing_map_pool_fails() {
        let ladder = queue(&QueueSettings::new("no_maps", 1));
        let launcher = Arc::new(RecordingLauncher {
            launched: Mutex::new(Vec::new()),
            fail: false,
        });
        let match_launcher =
            MatchLauncher::new(ladder.clone(), launcher, Arc::new(MapHistory::new(5)));

        let err = match_launcher
            .handle_match(ladder_match(&ladder))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::EmptyMapPool { .. })
        ));
    }
}
