//! Searches and the quality model
//!
//! A `Search` is one unit of matchmaking demand: a solo player or a party.
//! It carries the players' effective ratings, a wait-dependent match
//! threshold and a completion slot resolved exactly once. A `CombinedSearch`
//! groups several searches into one provisional team; `Team` is the side of a
//! match policies operate on.

use crate::config::MatchmakingConfig;
use crate::error::{MatchmakingError, Result};
use crate::rating::RatingModel;
use crate::types::{Player, PlayerId, PlayerRating, SearchId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;

static NEXT_SEARCH_ID: AtomicU64 = AtomicU64::new(1);

/// Settings and rating model a search is evaluated with
pub struct SearchContext {
    pub config: MatchmakingConfig,
    pub rating_model: Arc<dyn RatingModel>,
}

impl SearchContext {
    pub fn new(config: MatchmakingConfig, rating_model: Arc<dyn RatingModel>) -> Arc<Self> {
        Arc::new(Self {
            config,
            rating_model,
        })
    }

    /// Rating used for matching: newbies are pulled toward the newbie base mean
    pub fn effective_rating(&self, player: &Player) -> PlayerRating {
        let threshold = self.config.newbie_min_games;
        if player.games_played >= threshold {
            return player.rating;
        }

        let played = f64::from(player.games_played);
        let remaining = f64::from(threshold) - played;
        let mean = (remaining * self.config.newbie_base_mean + played * player.rating.mean)
            / f64::from(threshold);

        PlayerRating::new(mean, player.rating.deviation)
    }
}

impl fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolution state of a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Pending,
    /// Matched against the searches making up the opposing team
    Matched { opponents: Vec<SearchId> },
    Cancelled,
}

impl SearchStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SearchStatus::Pending)
    }
}

pub struct Search {
    id: SearchId,
    players: Vec<Player>,
    ratings: Vec<PlayerRating>,
    context: Arc<SearchContext>,
    start_time: Instant,
    failed_matching_attempts: AtomicU32,
    status: Mutex<SearchStatus>,
    notifier: watch::Sender<SearchStatus>,
}

impl Search {
    pub fn new(players: Vec<Player>, context: Arc<SearchContext>) -> Result<Self> {
        Self::with_start_time(players, context, Instant::now())
    }

    /// Create a search that started waiting at `start_time`
    pub fn with_start_time(
        players: Vec<Player>,
        context: Arc<SearchContext>,
        start_time: Instant,
    ) -> Result<Self> {
        if players.is_empty() {
            return Err(MatchmakingError::InvalidSearch {
                reason: "a search needs at least one player".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for player in &players {
            if !seen.insert(player.id.as_str()) {
                return Err(MatchmakingError::InvalidSearch {
                    reason: format!("player {} appears twice", player.id),
                }
                .into());
            }
            if !player.rating.is_valid() {
                return Err(MatchmakingError::InvalidSearch {
                    reason: format!("player {} has an unusable rating", player.id),
                }
                .into());
            }
        }

        let ratings = players
            .iter()
            .map(|player| context.effective_rating(player))
            .collect();
        let (notifier, _) = watch::channel(SearchStatus::Pending);

        Ok(Self {
            id: NEXT_SEARCH_ID.fetch_add(1, Ordering::Relaxed),
            players,
            ratings,
            context,
            start_time,
            failed_matching_attempts: AtomicU32::new(0),
            status: Mutex::new(SearchStatus::Pending),
            notifier,
        })
    }

    pub fn id(&self) -> SearchId {
        self.id
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.iter().map(|player| &player.id)
    }

    /// Number of players in the search
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn context(&self) -> &Arc<SearchContext> {
        &self.context
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.context.config
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Effective ratings, newbie adjustment applied
    pub fn ratings(&self) -> &[PlayerRating] {
        &self.ratings
    }

    /// Ratings exactly as stored for the players
    pub fn raw_ratings(&self) -> Vec<PlayerRating> {
        self.players.iter().map(|player| player.rating).collect()
    }

    /// Conservative effective ratings, the scale team balancing works on
    pub fn displayed_ratings(&self) -> Vec<f64> {
        self.ratings.iter().map(PlayerRating::displayed).collect()
    }

    pub fn cumulated_rating(&self) -> f64 {
        self.displayed_ratings().iter().sum()
    }

    pub fn average_rating(&self) -> f64 {
        self.cumulated_rating() / self.len() as f64
    }

    pub fn failed_matching_attempts(&self) -> u32 {
        self.failed_matching_attempts.load(Ordering::Relaxed)
    }

    pub fn register_failed_matching_attempt(&self) {
        self.failed_matching_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_newbies(&self) -> usize {
        let threshold = self.config().newbie_min_games;
        self.players
            .iter()
            .filter(|player| player.is_newbie(threshold))
            .count()
    }

    pub fn has_newbie(&self) -> bool {
        self.num_newbies() > 0
    }

    pub fn has_high_rated_player(&self) -> bool {
        let min_rating = self.config().high_rated_player_min_rating;
        self.players
            .iter()
            .any(|player| player.rating.displayed() >= min_rating)
    }

    pub fn has_top_player(&self) -> bool {
        let min_rating = self.config().top_player_min_rating;
        self.players
            .iter()
            .any(|player| player.rating.displayed() >= min_rating)
    }

    /// Threshold reduction earned by waiting, growing with time and failed rounds
    pub fn search_expansion(&self) -> f64 {
        let config = self.config();
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let saturation = config.search_expansion_saturation().as_secs_f64();

        let by_time = config.search_expansion_max * (elapsed / saturation);
        let by_attempts =
            f64::from(self.failed_matching_attempts()) * config.search_expansion_step;

        by_time.max(by_attempts).min(config.search_expansion_max)
    }

    pub fn match_threshold(&self) -> f64 {
        let deviation = self
            .ratings
            .iter()
            .map(|rating| rating.deviation)
            .fold(0.0, f64::max);

        (self.config().quality_threshold(deviation) - self.search_expansion()).max(0.0)
    }

    /// Opponent rating range reaching roughly 80% quality with the first player
    pub fn boundary_80(&self) -> (f64, f64) {
        let mean = self.ratings[0].mean;
        (mean - 200.0, mean + 200.0)
    }

    /// Opponent rating range reaching roughly 75% quality with the first player
    pub fn boundary_75(&self) -> (f64, f64) {
        let mean = self.ratings[0].mean;
        (mean - 100.0, mean + 100.0)
    }

    pub fn quality_with(&self, other: &Search) -> f64 {
        self.context.rating_model.quality(&self.ratings, &other.ratings)
    }

    /// Both sides' thresholds are met by the game quality
    pub fn matches_with(&self, other: &Search) -> bool {
        let quality = self.quality_with(other);
        quality >= self.match_threshold() && quality >= other.match_threshold()
    }

    /// Resolve this search and `other` as opponents
    pub fn match_with(&self, other: &Search) -> Result<()> {
        resolve_match(&[self], &[other])
    }

    /// Cancel the search; returns whether this call resolved it
    pub fn cancel(&self) -> bool {
        let cancelled = match self.status.lock() {
            Ok(mut status) if status.is_pending() => {
                *status = SearchStatus::Cancelled;
                true
            }
            _ => false,
        };
        if cancelled {
            self.notifier.send_replace(SearchStatus::Cancelled);
        }
        cancelled
    }

    pub fn status(&self) -> SearchStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status().is_pending()
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.status(), SearchStatus::Matched { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status(), SearchStatus::Cancelled)
    }

    /// Wait until the search is matched, returning the opposing search ids
    ///
    /// Fails with `MatchmakingError::SearchCancelled` if it is cancelled instead.
    pub async fn await_match(&self) -> Result<Vec<SearchId>> {
        let mut receiver = self.notifier.subscribe();
        let status = receiver
            .wait_for(|status| !status.is_pending())
            .await
            .map_err(|_| MatchmakingError::InternalError {
                message: format!("search {} lost its status channel", self.id),
            })?
            .clone();

        match status {
            SearchStatus::Matched { opponents } => Ok(opponents),
            _ => Err(MatchmakingError::SearchCancelled { search_id: self.id }.into()),
        }
    }

    fn lock_status(&self) -> Result<MutexGuard<'_, SearchStatus>> {
        self.status.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: format!("Failed to acquire status lock of search {}", self.id),
            }
            .into()
        })
    }
}

impl fmt::Debug for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search")
            .field("id", &self.id)
            .field("players", &self.player_ids().collect::<Vec<_>>())
            .field("failed_matching_attempts", &self.failed_matching_attempts())
            .finish()
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.player_ids().map(String::as_str).collect();
        write!(f, "Search({}, [{}])", self.id, ids.join(", "))
    }
}

/// Atomically resolve every search of both sides as matched against the other side
///
/// Either all constituents are pending and all become matched, or nothing
/// changes and `SearchAlreadyResolved` names the first resolved one.
pub fn resolve_match(side_a: &[&Search], side_b: &[&Search]) -> Result<()> {
    let mut all: Vec<&Search> = side_a.iter().chain(side_b).copied().collect();
    all.sort_by_key(|search| search.id);
    if all.windows(2).any(|pair| pair[0].id == pair[1].id) {
        return Err(MatchmakingError::InvalidSearch {
            reason: "a search cannot be on both sides of a match".to_string(),
        }
        .into());
    }

    // Locks are taken in id order so concurrent resolutions cannot deadlock
    let mut guards = Vec::with_capacity(all.len());
    for search in &all {
        let guard = search.lock_status()?;
        if !guard.is_pending() {
            return Err(MatchmakingError::SearchAlreadyResolved {
                search_id: search.id,
            }
            .into());
        }
        guards.push((search.id, guard));
    }

    let ids_a: Vec<SearchId> = side_a.iter().map(|search| search.id).collect();
    let ids_b: Vec<SearchId> = side_b.iter().map(|search| search.id).collect();
    let mut resolved = Vec::with_capacity(guards.len());
    for (id, guard) in guards.iter_mut() {
        let opponents = if ids_a.contains(id) {
            ids_b.clone()
        } else {
            ids_a.clone()
        };
        let status = SearchStatus::Matched { opponents };
        **guard = status.clone();
        resolved.push((*id, status));
    }
    drop(guards);

    for (id, status) in resolved {
        if let Some(search) = all.iter().find(|search| search.id == id) {
            search.notifier.send_replace(status);
        }
    }

    Ok(())
}

/// Several searches acting as one provisional team
#[derive(Debug, Clone)]
pub struct CombinedSearch {
    searches: Vec<Arc<Search>>,
}

impl CombinedSearch {
    pub fn new(searches: Vec<Arc<Search>>) -> Result<Self> {
        if searches.len() < 2 {
            return Err(MatchmakingError::InvalidSearch {
                reason: "a combined search needs at least two searches".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for player_id in searches.iter().flat_map(|search| search.player_ids()) {
            if !seen.insert(player_id.as_str()) {
                return Err(MatchmakingError::InvalidSearch {
                    reason: format!("player {} is in two combined searches", player_id),
                }
                .into());
            }
        }

        Ok(Self { searches })
    }

    pub fn searches(&self) -> &[Arc<Search>] {
        &self.searches
    }
}

/// One side of a match
#[derive(Debug, Clone)]
pub enum Team {
    Single(Arc<Search>),
    Combined(CombinedSearch),
}

impl From<Arc<Search>> for Team {
    fn from(search: Arc<Search>) -> Self {
        Team::Single(search)
    }
}

impl Team {
    /// Build a team from one or more searches with disjoint players
    pub fn from_searches(mut searches: Vec<Arc<Search>>) -> Result<Self> {
        match searches.len() {
            0 => Err(MatchmakingError::InvalidSearch {
                reason: "a team needs at least one search".to_string(),
            }
            .into()),
            1 => Ok(Team::Single(searches.remove(0))),
            _ => Ok(Team::Combined(CombinedSearch::new(searches)?)),
        }
    }

    pub fn searches(&self) -> &[Arc<Search>] {
        match self {
            Team::Single(search) => std::slice::from_ref(search),
            Team::Combined(combined) => combined.searches(),
        }
    }

    pub fn search_ids(&self) -> Vec<SearchId> {
        self.searches().iter().map(|search| search.id()).collect()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.searches().iter().flat_map(|search| search.players())
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players().map(|player| &player.id)
    }

    /// Number of players on the team
    pub fn len(&self) -> usize {
        self.searches().iter().map(|search| search.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ratings(&self) -> Vec<PlayerRating> {
        self.searches()
            .iter()
            .flat_map(|search| search.ratings().iter().copied())
            .collect()
    }

    pub fn displayed_ratings(&self) -> Vec<f64> {
        self.searches()
            .iter()
            .flat_map(|search| search.displayed_ratings())
            .collect()
    }

    pub fn cumulated_rating(&self) -> f64 {
        self.searches()
            .iter()
            .map(|search| search.cumulated_rating())
            .sum()
    }

    pub fn average_rating(&self) -> f64 {
        self.cumulated_rating() / self.len() as f64
    }

    /// Failed rounds summed over every player
    pub fn player_failed_attempts(&self) -> u32 {
        self.searches()
            .iter()
            .map(|search| search.failed_matching_attempts() * search.len() as u32)
            .sum()
    }

    pub fn num_newbies(&self) -> usize {
        self.searches().iter().map(|search| search.num_newbies()).sum()
    }

    pub fn has_top_player(&self) -> bool {
        self.searches().iter().any(|search| search.has_top_player())
    }

    /// The most lenient constituent threshold
    pub fn match_threshold(&self) -> f64 {
        self.searches()
            .iter()
            .map(|search| search.match_threshold())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn quality_with(&self, other: &Team) -> f64 {
        self.searches()[0]
            .context()
            .rating_model
            .quality(&self.ratings(), &other.ratings())
    }

    pub fn matches_with(&self, other: &Team) -> bool {
        let quality = self.quality_with(other);
        quality >= self.match_threshold() && quality >= other.match_threshold()
    }

    pub fn is_pending(&self) -> bool {
        self.searches().iter().all(|search| search.is_pending())
    }

    /// Resolve both teams against each other in one step
    pub fn match_with(&self, other: &Team) -> Result<()> {
        let side_a: Vec<&Search> = self.searches().iter().map(Arc::as_ref).collect();
        let side_b: Vec<&Search> = other.searches().iter().map(Arc::as_ref).collect();
        resolve_match(&side_a, &side_b)
    }

    pub fn shares_players_with(&self, other: &Team) -> bool {
        let mine: HashSet<&PlayerId> = self.player_ids().collect();
        other.player_ids().any(|player_id| mine.contains(player_id))
    }
}
