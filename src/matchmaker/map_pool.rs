//! Map pools and map selection

use crate::config::MapPoolSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{Map, MapId};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A weighted entry of a map pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapEntry {
    Fixed {
        map: Map,
        weight: u32,
    },
    /// Procedurally generated on every pick
    Generated {
        id: MapId,
        weight: u32,
        spawns: u32,
        size: u32,
    },
}

impl MapEntry {
    pub fn id(&self) -> MapId {
        match self {
            MapEntry::Fixed { map, .. } => map.id,
            MapEntry::Generated { id, .. } => *id,
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            MapEntry::Fixed { weight, .. } | MapEntry::Generated { weight, .. } => *weight,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, MapEntry::Generated { .. })
    }

    /// Concrete map for one game; generated entries get a fresh seed
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Map {
        match self {
            MapEntry::Fixed { map, .. } => map.clone(),
            MapEntry::Generated {
                id, spawns, size, ..
            } => {
                let seed: u64 = rng.gen();
                let name = format!("generated_{}p_{}_{:016x}", spawns, size, seed);
                Map {
                    id: *id,
                    path: format!("maps/{}.zip", name),
                    name,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapPool {
    id: u32,
    name: String,
    maps: HashMap<MapId, MapEntry>,
}

impl MapPool {
    pub fn new(id: u32, name: impl Into<String>, maps: Vec<MapEntry>) -> Self {
        let mut pool = Self {
            id,
            name: name.into(),
            maps: HashMap::new(),
        };
        pool.set_maps(maps);
        pool
    }

    pub fn from_settings(settings: &MapPoolSettings) -> Self {
        Self::new(settings.id, settings.name.clone(), settings.maps.clone())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Replace the pool's maps
    pub fn set_maps(&mut self, maps: Vec<MapEntry>) {
        self.maps = maps.into_iter().map(|entry| (entry.id(), entry)).collect();
    }

    pub fn choose_map(&self, played_map_ids: &[MapId]) -> Result<Map> {
        self.choose_map_with_rng(played_map_ids, &mut rand::thread_rng())
    }

    /// Pick a map, preferring the ones played least in `played_map_ids`
    ///
    /// Every pool map starts at a count of one on top of its plays, so maps
    /// missing from the history are always eligible. Only fixed maps set the
    /// minimum count, unless the pool has none.
    pub fn choose_map_with_rng<R: Rng + ?Sized>(
        &self,
        played_map_ids: &[MapId],
        rng: &mut R,
    ) -> Result<Map> {
        if self.maps.is_empty() {
            return Err(MatchmakingError::EmptyMapPool {
                pool: self.name.clone(),
            }
            .into());
        }

        let mut counts: HashMap<MapId, usize> = self.maps.keys().map(|&id| (id, 1)).collect();
        for id in played_map_ids {
            if let Some(count) = counts.get_mut(id) {
                *count += 1;
            }
        }

        let fixed_minimum = self
            .maps
            .values()
            .filter(|entry| !entry.is_generated())
            .map(|entry| counts[&entry.id()])
            .min();
        let least_played = match fixed_minimum {
            Some(count) => count,
            None => counts.values().copied().min().unwrap_or(1),
        };

        let mut candidates: Vec<&MapEntry> = self
            .maps
            .values()
            .filter(|entry| counts[&entry.id()] <= least_played)
            .collect();
        candidates.sort_by_key(|entry| entry.id());

        let weights: Vec<u32> = candidates.iter().map(|entry| entry.weight()).collect();
        let distribution =
            WeightedIndex::new(&weights).map_err(|e| MatchmakingError::InvalidMapWeights {
                pool: self.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(candidates[distribution.sample(rng)].resolve(rng))
    }
}
