//! Per-queue configuration

use crate::error::{MatchmakingError, Result};
use crate::matchmaker::map_pool::MapEntry;
use crate::types::{Map, MapId};
use serde::{Deserialize, Serialize};

/// Matching policy a queue runs each pop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    StableMarriage,
    BucketTeams,
    TeamMatch,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::StableMarriage => write!(f, "stable_marriage"),
            PolicyKind::BucketTeams => write!(f, "bucket_teams"),
            PolicyKind::TeamMatch => write!(f, "team_match"),
        }
    }
}

/// A map pool and the rating range of games it serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPoolSettings {
    pub id: u32,
    pub name: String,
    /// Inclusive lower bound on the game's average displayed rating
    #[serde(default)]
    pub min_rating: Option<f64>,
    /// Exclusive upper bound on the game's average displayed rating
    #[serde(default)]
    pub max_rating: Option<f64>,
    pub maps: Vec<MapEntry>,
}

impl MapPoolSettings {
    pub fn covers(&self, rating: f64) -> bool {
        self.min_rating.map_or(true, |min| rating >= min)
            && self.max_rating.map_or(true, |max| rating < max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub team_size: usize,
    /// Defaults to stable marriage for 1v1 and the team matchmaker otherwise
    #[serde(default)]
    pub policy: Option<PolicyKind>,
    #[serde(default)]
    pub map_pools: Vec<MapPoolSettings>,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>, team_size: usize) -> Self {
        Self {
            name: name.into(),
            team_size,
            policy: None,
            map_pools: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_map_pool(mut self, pool: MapPoolSettings) -> Self {
        self.map_pools.push(pool);
        self
    }

    pub fn effective_policy(&self) -> PolicyKind {
        match self.policy {
            Some(policy) => policy,
            None if self.team_size == 1 => PolicyKind::StableMarriage,
            None => PolicyKind::TeamMatch,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "queue name cannot be empty".to_string(),
            }
            .into());
        }
        if self.team_size == 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("queue {} must have a team size of at least 1", self.name),
            }
            .into());
        }
        if self.team_size > 1 && self.effective_policy() == PolicyKind::StableMarriage {
            return Err(MatchmakingError::ConfigurationError {
                message: format!(
                    "queue {} uses stable marriage, which only forms 1v1 games",
                    self.name
                ),
            }
            .into());
        }
        for pool in &self.map_pools {
            if let (Some(min), Some(max)) = (pool.min_rating, pool.max_rating) {
                if min >= max {
                    return Err(MatchmakingError::ConfigurationError {
                        message: format!("map pool {} has an empty rating range", pool.name),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn fixed(id: MapId, name: &str, weight: u32) -> MapEntry {
    MapEntry::Fixed {
        map: Map {
            id,
            name: name.to_string(),
            path: format!("maps/{}.zip", name),
        },
        weight,
    }
}

/// Queues served when no configuration file provides any
pub fn default_queues() -> Vec<QueueSettings> {
    let ladder_pool = MapPoolSettings {
        id: 1,
        name: "ladder".to_string(),
        min_rating: None,
        max_rating: None,
        maps: vec![
            fixed(101, "crossfire_canal", 1),
            fixed(102, "open_palms", 1),
            fixed(103, "twin_rivers", 1),
            fixed(104, "the_ditch", 1),
        ],
    };
    let team_pool = MapPoolSettings {
        id: 2,
        name: "teams".to_string(),
        min_rating: None,
        max_rating: None,
        maps: vec![
            fixed(201, "seton_clutch", 2),
            fixed(202, "dual_gap", 1),
            MapEntry::Generated {
                id: 299,
                weight: 1,
                spawns: 4,
                size: 512,
            },
        ],
    };

    vec![
        QueueSettings::new("ladder1v1", 1).with_map_pool(ladder_pool),
        QueueSettings::new("tmm2v2", 2).with_map_pool(team_pool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_policy_defaults() {
        assert_eq!(
            QueueSettings::new("a", 1).effective_policy(),
            PolicyKind::StableMarriage
        );
        assert_eq!(
            QueueSettings::new("b", 4).effective_policy(),
            PolicyKind::TeamMatch
        );
        assert_eq!(
            QueueSettings::new("c", 2)
                .with_policy(PolicyKind::BucketTeams)
                .effective_policy(),
            PolicyKind::BucketTeams
        );
    }

    #[test]
    fn test_stable_marriage_requires_solo_teams() {
        let settings = QueueSettings::new("bad", 2).with_policy(PolicyKind::StableMarriage);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_map_pool_rating_range() {
        let pool = MapPoolSettings {
            id: 1,
            name: "mid".to_string(),
            min_rating: Some(300.0),
            max_rating: Some(800.0),
            maps: Vec::new(),
        };
        assert!(pool.covers(300.0));
        assert!(pool.covers(799.0));
        assert!(!pool.covers(800.0));
        assert!(!pool.covers(-100.0));
    }

    #[test]
    fn test_default_queues_are_valid() {
        for queue in default_queues() {
            assert!(queue.validate().is_ok(), "{}", queue.name);
        }
    }
}
