//! General two-team matchmaking
//!
//! For every search a neighbourhood of similarly rated searches worth two
//! teams is collected and split into balanced teams. Each split becomes a
//! scored game candidate; the best non-overlapping candidates are accepted.

use super::stable_marriage::StableMarriageMatchmaker;
use super::{sort_by_rating_desc, Match, Matchmaker, MatchmakerResult};
use crate::config::MatchmakingConfig;
use crate::error::TeamFormationError;
use crate::matchmaker::search::{Search, Team};
use crate::utils::population_std_dev;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

type Split = (Vec<Arc<Search>>, Vec<Arc<Search>>);

#[derive(Debug, Clone)]
pub struct TeamMatchMaker {
    config: MatchmakingConfig,
    stable_marriage: StableMarriageMatchmaker,
}

impl TeamMatchMaker {
    pub fn new(config: &MatchmakingConfig) -> Self {
        Self {
            config: config.clone(),
            stable_marriage: StableMarriageMatchmaker::new(config),
        }
    }

    /// Collect searches around `index` until two teams worth of players are found
    ///
    /// `searches` must be sorted by rating. Probes alternate between the next
    /// lower and next higher rated search, skipping any that would overflow
    /// the budget, until both directions run out of bounds.
    pub fn pick_neighboring_players(
        &self,
        searches: &[Arc<Search>],
        index: usize,
        team_size: usize,
    ) -> Result<Vec<Arc<Search>>, TeamFormationError> {
        let budget = 2 * team_size;
        let mut selected = vec![searches[index].clone()];
        let mut players = searches[index].len();

        let mut offset = 1;
        let mut below = true;
        let mut out_of_bounds = 0;
        while players < budget && out_of_bounds < 2 {
            let probe = if below {
                index.checked_add(offset).filter(|&i| i < searches.len())
            } else {
                index.checked_sub(offset)
            };

            match probe {
                Some(i) => {
                    out_of_bounds = 0;
                    let candidate = &searches[i];
                    if players + candidate.len() <= budget {
                        players += candidate.len();
                        selected.push(candidate.clone());
                    }
                }
                None => out_of_bounds += 1,
            }

            if !below {
                offset += 1;
            }
            below = !below;
        }

        if players < budget {
            return Err(TeamFormationError::NotEnoughPlayers {
                needed: budget,
                found: players,
            });
        }
        Ok(selected)
    }

    /// Split a neighbourhood into two teams of exactly `team_size` players
    pub fn make_teams(
        &self,
        searches: Vec<Arc<Search>>,
        team_size: usize,
    ) -> Result<Split, TeamFormationError> {
        let split = if let Some(split) = split_full_party(&searches, team_size) {
            split
        } else if let Some(split) = split_party_with_filler(&searches, team_size) {
            split
        } else {
            self.karmarkar_karp(searches)
        };

        let (a, b) = &split;
        let left: usize = a.iter().map(|search| search.len()).sum();
        let right: usize = b.iter().map(|search| search.len()).sum();
        if left != team_size || right != team_size {
            return Err(TeamFormationError::UnevenTeams { left, right });
        }
        Ok(split)
    }

    /// Largest differencing partition on `player_weight * players + rating`
    pub fn karmarkar_karp(&self, searches: Vec<Arc<Search>>) -> Split {
        let mut items: Vec<PartitionNode> = searches
            .into_iter()
            .map(|search| {
                let weight = self.config.partition_player_weight * search.len() as f64
                    + search.cumulated_rating();
                PartitionNode::Leaf { weight, search }
            })
            .collect();

        while items.len() > 1 {
            items.sort_by(|a, b| a.weight().total_cmp(&b.weight()));
            let (Some(heavy), Some(light)) = (items.pop(), items.pop()) else {
                break;
            };
            items.push(PartitionNode::Container {
                weight: heavy.weight() - light.weight(),
                heavy: Box::new(heavy),
                light: Box::new(light),
            });
        }

        let mut team_a = Vec::new();
        let mut team_b = Vec::new();
        if let Some(root) = items.pop() {
            root.unwind(&mut team_a, &mut team_b);
        }
        (team_a, team_b)
    }

    /// Score a split: fairness times uniformity plus waiting and newbie bonuses
    pub fn game_quality(&self, team_a: &Team, team_b: &Team) -> f64 {
        let config = &self.config;

        let imbalance = (team_a.average_rating() - team_b.average_rating()).abs();
        let fairness =
            ((config.maximum_rating_imbalance - imbalance) / config.maximum_rating_imbalance)
                .max(0.0);

        let ratings: Vec<f64> = team_a
            .displayed_ratings()
            .into_iter()
            .chain(team_b.displayed_ratings())
            .collect();
        let deviation = population_std_dev(&ratings);
        let uniformity =
            ((config.maximum_rating_deviation - deviation) / config.maximum_rating_deviation)
                .max(0.0);

        let time_bonus: f64 = [team_a, team_b]
            .iter()
            .map(|team| {
                (f64::from(team.player_failed_attempts()) * config.time_bonus)
                    .min(config.maximum_time_bonus)
            })
            .sum();

        let newbie_bonus = if team_a.has_top_player() || team_b.has_top_player() {
            0.0
        } else {
            let newbies = team_a.num_newbies() + team_b.num_newbies();
            config.newbie_bonus * newbies as f64 / ratings.len() as f64
        };

        fairness * uniformity + time_bonus + newbie_bonus
    }

    /// Accept the best candidates that share no search with a better one
    pub fn pick_best_games(&self, mut candidates: Vec<Match>) -> Vec<Match> {
        candidates.retain(|game| game.quality >= self.config.minimum_game_quality);
        candidates.sort_by(|a, b| b.quality.total_cmp(&a.quality));

        let mut used = HashSet::new();
        let mut games = Vec::new();
        for game in candidates {
            let ids = game.search_ids();
            if ids.iter().any(|id| used.contains(id)) {
                continue;
            }
            used.extend(ids);
            games.push(game);
        }
        games
    }

    fn build_candidate(&self, split: Split) -> Option<Match> {
        let (a, b) = split;
        let teams = Team::from_searches(a).and_then(|a| Ok((a, Team::from_searches(b)?)));
        match teams {
            Ok((team_a, team_b)) => {
                let quality = self.game_quality(&team_a, &team_b);
                Some(Match::new(team_a, team_b, quality))
            }
            Err(e) => {
                warn!("Discarding game candidate: {}", e);
                None
            }
        }
    }
}

impl Matchmaker for TeamMatchMaker {
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult {
        if team_size == 1 {
            return self.stable_marriage.find(searches, team_size);
        }

        let mut sorted: Vec<Arc<Search>> = searches
            .iter()
            .filter(|search| search.is_pending() && search.len() <= team_size)
            .cloned()
            .collect();
        sort_by_rating_desc(&mut sorted);

        let mut candidates = Vec::new();
        for index in 0..sorted.len() {
            let neighborhood = match self.pick_neighboring_players(&sorted, index, team_size) {
                Ok(neighborhood) => neighborhood,
                Err(e) => {
                    debug!("No neighborhood around {}: {}", sorted[index], e);
                    continue;
                }
            };
            match self.make_teams(neighborhood, team_size) {
                Ok(split) => candidates.extend(self.build_candidate(split)),
                Err(e) => warn!("Skipping candidate around {}: {}", sorted[index], e),
            }
        }

        debug!("Scored {} game candidates", candidates.len());
        let games = self.pick_best_games(candidates);
        MatchmakerResult::from_matches(searches, games)
    }

    fn name(&self) -> &'static str {
        "team_match"
    }
}

/// A search that fills a team alone plays against everyone else
fn split_full_party(searches: &[Arc<Search>], team_size: usize) -> Option<Split> {
    let position = searches
        .iter()
        .position(|search| search.len() == team_size)?;
    let mut rest = searches.to_vec();
    let full = rest.remove(position);
    Some((vec![full], rest))
}

/// A party one player short, completed by the single player that best
/// balances the two teams
fn split_party_with_filler(searches: &[Arc<Search>], team_size: usize) -> Option<Split> {
    if team_size < 3 {
        return None;
    }
    let position = searches
        .iter()
        .position(|search| search.len() == team_size - 1)?;
    let party = &searches[position];
    let mut singles: Vec<Arc<Search>> = searches
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != position)
        .map(|(_, search)| search.clone())
        .collect();
    if singles.iter().any(|search| search.len() != 1) {
        return None;
    }
    super::sort_by_rating_asc(&mut singles);

    let total: f64 = searches.iter().map(|search| search.cumulated_rating()).sum();
    let players: usize = searches.iter().map(|search| search.len()).sum();
    let average = total / players as f64;
    let ideal = average * team_size as f64 - party.cumulated_rating();

    let distance = |search: &Arc<Search>| (search.cumulated_rating() - ideal).abs();
    let first = singles.first()?;
    let last = singles.last()?;
    let order: Box<dyn Iterator<Item = usize>> = if distance(first) <= distance(last) {
        Box::new(0..singles.len())
    } else {
        Box::new((0..singles.len()).rev())
    };

    let mut best: Option<(usize, f64)> = None;
    for i in order {
        let d = distance(&singles[i]);
        match best {
            Some((_, best_distance)) if d >= best_distance => break,
            _ => best = Some((i, d)),
        }
    }

    let (filler, _) = best?;
    let filler = singles.remove(filler);
    Some((vec![party.clone(), filler], singles))
}

enum PartitionNode {
    Leaf {
        weight: f64,
        search: Arc<Search>,
    },
    Container {
        weight: f64,
        heavy: Box<PartitionNode>,
        light: Box<PartitionNode>,
    },
}

impl PartitionNode {
    fn weight(&self) -> f64 {
        match self {
            PartitionNode::Leaf { weight, .. } | PartitionNode::Container { weight, .. } => *weight,
        }
    }

    /// The heavy side goes to `same`, the light side to `other`
    fn unwind(self, same: &mut Vec<Arc<Search>>, other: &mut Vec<Arc<Search>>) {
        match self {
            PartitionNode::Leaf { search, .. } => same.push(search),
            PartitionNode::Container { heavy, light, .. } => {
                heavy.unwind(same, other);
                light.unwind(other, same);
            }
        }
    }
}
