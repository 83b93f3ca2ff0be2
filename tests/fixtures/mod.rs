//! Test fixtures and mock implementations for integration testing
#![allow(dead_code)]

use async_trait::async_trait;
use lobby_matchmaker::config::{AppConfig, MatchmakingConfig};
use lobby_matchmaker::error::Result;
use lobby_matchmaker::matchmaker::{GameLauncher, Search, SearchContext};
use lobby_matchmaker::rating::{PlayerDirectory, TrueSkillModel};
use lobby_matchmaker::types::{GameLaunch, Player, PlayerId, PlayerRating};
use std::sync::{Arc, Mutex};

mockall::mock! {
    pub Directory {}

    impl PlayerDirectory for Directory {
        fn get_player(&self, player_id: &PlayerId) -> Result<Option<Player>>;
        fn store_player(&self, player: Player) -> Result<()>;
        fn player_count(&self) -> Result<usize>;
    }
}

/// Game launcher that captures every launch for later inspection
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<GameLaunch>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> Vec<GameLaunch> {
        self.launches
            .lock()
            .map(|launches| launches.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GameLauncher for RecordingLauncher {
    async fn launch_game(&self, launch: GameLaunch) -> Result<()> {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(launch);
        }
        Ok(())
    }
}

/// Experienced player well past the newbie threshold
pub fn player(id: &str, mean: f64, deviation: f64) -> Player {
    Player::new(id, PlayerRating::new(mean, deviation), 100)
}

/// Player with no games played
pub fn newbie(id: &str) -> Player {
    Player::new(id, PlayerRating::new(1500.0, 500.0), 0)
}

pub fn context(config: MatchmakingConfig) -> Arc<SearchContext> {
    SearchContext::new(config, Arc::new(TrueSkillModel::default()))
}

pub fn search(ctx: &Arc<SearchContext>, players: Vec<Player>) -> Arc<Search> {
    Arc::new(Search::new(players, ctx.clone()).expect("valid search"))
}

pub fn solo(ctx: &Arc<SearchContext>, id: &str, mean: f64, deviation: f64) -> Arc<Search> {
    search(ctx, vec![player(id, mean, deviation)])
}

/// Port that was free a moment ago
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

/// Service configuration with a one second pop timer and its own health port
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.service.health_port = free_port();
    config.service.shutdown_timeout_seconds = 5;
    config.matchmaking.queue_pop_time_max = 1;
    config.matchmaking.queue_pop_time_min = 1;
    config
}
