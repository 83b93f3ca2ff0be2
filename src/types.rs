//! Common types used throughout the matchmaking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::trueskill::TrueSkillRating;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Identifier of a search, assigned in creation order
pub type SearchId = u64;

/// Unique identifier for launched games
pub type GameId = Uuid;

/// Identifier of a map inside a map pool
pub type MapId = u32;

/// Skill estimate of a player as a (mean, deviation) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub mean: f64,
    pub deviation: f64,
}

impl Default for PlayerRating {
    fn default() -> Self {
        Self {
            mean: 1500.0,
            deviation: 500.0,
        }
    }
}

impl PlayerRating {
    pub fn new(mean: f64, deviation: f64) -> Self {
        Self { mean, deviation }
    }

    /// Conservative rating shown to players: `mean - 3 * deviation`
    pub fn displayed(&self) -> f64 {
        self.mean - 3.0 * self.deviation
    }

    /// A rating is usable when both components are finite and the deviation
    /// is strictly positive.
    pub fn is_valid(&self) -> bool {
        self.mean.is_finite() && self.deviation.is_finite() && self.deviation > 0.0
    }
}

impl From<TrueSkillRating> for PlayerRating {
    fn from(rating: TrueSkillRating) -> Self {
        Self {
            mean: rating.rating,
            deviation: rating.uncertainty,
        }
    }
}

impl From<PlayerRating> for TrueSkillRating {
    fn from(rating: PlayerRating) -> Self {
        Self {
            rating: rating.mean,
            uncertainty: rating.deviation,
        }
    }
}

/// Player information as provided by the player directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub login: String,
    pub rating: PlayerRating,
    pub games_played: u32,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, rating: PlayerRating, games_played: u32) -> Self {
        let id = id.into();
        Self {
            login: id.clone(),
            id,
            rating,
            games_played,
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = login.into();
        self
    }

    /// Whether the player is still below the given games-played threshold
    pub fn is_newbie(&self, newbie_min_games: u32) -> bool {
        self.games_played < newbie_min_games
    }
}

/// A concrete map a game can be played on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Map {
    pub id: MapId,
    pub name: String,
    pub path: String,
}

/// Outcome of a finished two-team game, from the first team's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
}

/// Everything the game launcher needs to start a produced match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameLaunch {
    pub game_id: GameId,
    pub queue_name: String,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    pub map: Map,
    pub quality: f64,
    pub timestamp: DateTime<Utc>,
}

impl GameLaunch {
    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        self.team_a.iter().chain(self.team_b.iter())
    }
}

/// Notifications delivered to connected players through the connection registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyNotification {
    SearchInfo {
        queue_name: String,
        searching: bool,
    },
    MatchFound {
        queue_name: String,
        game_id: GameId,
    },
    GameLaunch {
        game_id: GameId,
        map: Map,
        team: u8,
        teammates: Vec<PlayerId>,
        opponents: Vec<PlayerId>,
    },
}
