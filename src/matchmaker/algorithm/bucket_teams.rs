//! Team formation from heterogeneous party sizes
//!
//! Searches that do not fill a team on their own are grouped into teams,
//! either through rating buckets when everyone queued alone or by greedily
//! combining parties of mixed size. The resulting teams are then paired with
//! stable marriage.

use super::stable_marriage::StableMarriageMatchmaker;
use super::{sort_by_rating_asc, Matchmaker, MatchmakerResult};
use crate::config::MatchmakingConfig;
use crate::matchmaker::search::{Search, Team};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Split a rating-sorted list into `len / team_size` balanced teams
///
/// The second half is rotated right by a quarter of the list before the
/// items are dealt round-robin, so for `[1, 2, 3, 4]` and teams of two the
/// result is `[1, 4]` and `[2, 3]`.
pub fn distribute<T>(items: Vec<T>, team_size: usize) -> Vec<Vec<T>> {
    if team_size == 0 {
        return Vec::new();
    }
    let num_teams = items.len() / team_size;
    if num_teams == 0 {
        return Vec::new();
    }

    let mut items = items;
    items.truncate(num_teams * team_size);
    let half = items.len() / 2;
    let mut second = items.split_off(half);
    second.rotate_right(half / 2);
    items.append(&mut second);

    let mut teams: Vec<Vec<T>> = (0..num_teams)
        .map(|_| Vec::with_capacity(team_size))
        .collect();
    for (index, item) in items.into_iter().enumerate() {
        teams[index % num_teams].push(item);
    }
    teams
}

#[derive(Debug, Clone)]
pub struct BucketTeamMatchmaker {
    bucket_radius: f64,
    stable_marriage: StableMarriageMatchmaker,
}

impl BucketTeamMatchmaker {
    pub fn new(config: &MatchmakingConfig) -> Self {
        Self {
            bucket_radius: config.bucket_radius,
            stable_marriage: StableMarriageMatchmaker::without_fallback(config),
        }
    }

    /// `find` with an explicit random source
    pub fn find_with_rng<R: Rng + ?Sized>(
        &self,
        searches: &[Arc<Search>],
        team_size: usize,
        rng: &mut R,
    ) -> MatchmakerResult {
        let (full, needing_team): (Vec<Arc<Search>>, Vec<Arc<Search>>) = searches
            .iter()
            .filter(|search| search.is_pending() && search.len() <= team_size)
            .cloned()
            .partition(|search| search.len() == team_size);

        let mut teams = if needing_team.iter().all(|search| search.len() == 1) {
            self.make_buckets(needing_team, team_size, rng)
        } else {
            make_teams_by_size(needing_team, team_size)
        };
        teams.extend(full.into_iter().map(Team::Single));

        debug!("Formed {} teams of {} players", teams.len(), team_size);
        let (matches, _) = self.stable_marriage.match_teams(teams);
        MatchmakerResult::from_matches(searches, matches)
    }

    /// Teams from solo searches, grouped by rating proximity first
    pub fn make_buckets<R: Rng + ?Sized>(
        &self,
        solos: Vec<Arc<Search>>,
        team_size: usize,
        rng: &mut R,
    ) -> Vec<Team> {
        let mut remaining = solos;
        let mut buckets = Vec::new();
        while !remaining.is_empty() {
            let pivot_rating = remaining[rng.gen_range(0..remaining.len())].average_rating();
            let (bucket, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|search| {
                (search.average_rating() - pivot_rating).abs() <= self.bucket_radius
            });
            buckets.push(bucket);
            remaining = rest;
        }

        let mut teams = Vec::new();
        let mut leftovers = Vec::new();
        for mut bucket in buckets {
            let num_teams = bucket.len() / (2 * team_size) * 2;
            let (selected, rest) = bucket.partial_shuffle(rng, num_teams * team_size);
            let mut selected = selected.to_vec();
            leftovers.extend(rest.iter().cloned());

            sort_by_rating_asc(&mut selected);
            teams.extend(combine_all(distribute(selected, team_size)));
        }

        sort_by_rating_asc(&mut leftovers);
        let game_size = 2 * team_size;
        let paired = leftovers.len() / game_size * game_size;
        let mut rest = leftovers.split_off(paired);
        for chunk in leftovers.chunks(game_size) {
            teams.extend(combine_all(distribute(chunk.to_vec(), team_size)));
        }
        if rest.len() >= team_size {
            rest.truncate(team_size);
            teams.extend(combine_all(vec![rest]));
        }

        teams
    }
}

impl Matchmaker for BucketTeamMatchmaker {
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult {
        self.find_with_rng(searches, team_size, &mut rand::thread_rng())
    }

    fn name(&self) -> &'static str {
        "bucket_teams"
    }
}

fn combine_all(groups: Vec<Vec<Arc<Search>>>) -> Vec<Team> {
    groups
        .into_iter()
        .filter_map(|group| match Team::from_searches(group) {
            Ok(team) => Some(team),
            Err(e) => {
                warn!("Discarding team: {}", e);
                None
            }
        })
        .collect()
}

/// Greedily combine parties into full teams, largest fitting party first
///
/// A search whose team cannot be completed is left for the next round and
/// the parties tried with it are returned to the pool.
pub fn make_teams_by_size(searches: Vec<Arc<Search>>, team_size: usize) -> Vec<Team> {
    let mut by_size: BTreeMap<usize, VecDeque<Arc<Search>>> = BTreeMap::new();
    for search in &searches {
        by_size
            .entry(search.len())
            .or_default()
            .push_back(search.clone());
    }

    let mut teams = Vec::new();
    for search in &searches {
        let Some(bucket) = by_size.get_mut(&search.len()) else {
            continue;
        };
        let Some(position) = bucket.iter().position(|queued| queued.id() == search.id()) else {
            // Already used in an earlier team
            continue;
        };
        bucket.remove(position);

        let mut selected = vec![search.clone()];
        let mut players = search.len();
        while players < team_size {
            let free = team_size - players;
            let next = by_size
                .range_mut(..=free)
                .rev()
                .find_map(|(_, bucket)| bucket.pop_front());
            match next {
                Some(party) => {
                    players += party.len();
                    selected.push(party);
                }
                None => break,
            }
        }

        if players == team_size {
            teams.extend(combine_all(vec![selected]));
        } else {
            debug!("Could not complete a team around {}", search);
            for party in selected.into_iter().skip(1) {
                by_size.entry(party.len()).or_default().push_front(party);
            }
        }
    }

    teams
}
