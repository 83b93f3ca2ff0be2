//! The matchmaker queue
//!
//! A queue owns the pending searches of one game mode and pops them on the
//! schedule of its [`PopTimer`]. Every pop runs the configured policy on a
//! snapshot of the pending searches, applies the proposed matches that are
//! still valid and publishes them on the match stream.

use crate::config::{MapPoolSettings, MatchmakingConfig, PolicyKind, QueueSettings};
use crate::error::{MatchmakingError, Result};
use crate::matchmaker::algorithm::{Match, Matchmaker, MatchmakerPolicy};
use crate::matchmaker::group::QueueGroup;
use crate::matchmaker::map_pool::MapPool;
use crate::matchmaker::pop_timer::PopTimer;
use crate::matchmaker::search::{Search, SearchContext, SearchStatus};
use crate::metrics::{MetricsCollector, MetricsTimer};
use crate::rating::RatingModel;
use crate::types::{Player, PlayerId, SearchId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How a search left the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Matched { opponents: Vec<SearchId> },
    Cancelled,
    TimedOut,
}

impl SearchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SearchOutcome::Matched { .. } => "matched",
            SearchOutcome::Cancelled => "cancelled",
            SearchOutcome::TimedOut => "timed_out",
        }
    }
}

/// Point in time view of a queue, as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue_name: String,
    /// Wall clock time of the next pop, RFC 3339
    pub queue_pop_time: String,
    /// Seconds until the next pop, rounded to two decimals
    pub queue_pop_time_delta: f64,
    pub num_players: usize,
    pub team_size: usize,
    pub boundary_80s: Vec<(f64, f64)>,
    pub boundary_75s: Vec<(f64, f64)>,
}

/// Settings that may be swapped by a reload
struct QueueState {
    context: Arc<SearchContext>,
    policy: Arc<MatchmakerPolicy>,
}

pub struct MatchmakerQueue {
    name: String,
    team_size: usize,
    policy_kind: PolicyKind,
    rating_model: Arc<dyn RatingModel>,
    state: RwLock<QueueState>,
    map_pools: Vec<(MapPoolSettings, MapPool)>,
    /// Pending searches in insertion order
    queue: Mutex<BTreeMap<SearchId, Arc<Search>>>,
    round_lock: tokio::sync::Mutex<()>,
    timer: Mutex<PopTimer>,
    match_tx: Mutex<Option<mpsc::UnboundedSender<Match>>>,
    match_rx: Mutex<Option<mpsc::UnboundedReceiver<Match>>>,
    shutdown_tx: watch::Sender<bool>,
    matches_found: AtomicU64,
    metrics: Option<Arc<MetricsCollector>>,
    group: Option<Arc<QueueGroup>>,
}

/// Removes a search from its queue when the waiting caller goes away
struct QueuedSearch<'a> {
    queue: &'a MatchmakerQueue,
    search: Arc<Search>,
}

impl Drop for QueuedSearch<'_> {
    fn drop(&mut self) {
        self.queue.remove_search(self.search.id());
        if self.search.cancel() {
            debug!(
                "{} left queue {} without a match",
                self.search, self.queue.name
            );
        }
    }
}

impl MatchmakerQueue {
    pub fn new(
        settings: &QueueSettings,
        config: MatchmakingConfig,
        rating_model: Arc<dyn RatingModel>,
    ) -> Result<Self> {
        settings.validate()?;
        config.validate()?;

        let policy_kind = settings.effective_policy();
        let policy = Arc::new(MatchmakerPolicy::build(policy_kind, &config));
        let timer = PopTimer::new(settings.team_size, &config);
        let context = SearchContext::new(config, rating_model.clone());
        let map_pools = settings
            .map_pools
            .iter()
            .map(|pool| (pool.clone(), MapPool::from_settings(pool)))
            .collect();
        let (match_tx, match_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            "Created queue {} (team size {}, policy {})",
            settings.name, settings.team_size, policy_kind
        );

        Ok(Self {
            name: settings.name.clone(),
            team_size: settings.team_size,
            policy_kind,
            rating_model,
            state: RwLock::new(QueueState { context, policy }),
            map_pools,
            queue: Mutex::new(BTreeMap::new()),
            round_lock: tokio::sync::Mutex::new(()),
            timer: Mutex::new(timer),
            match_tx: Mutex::new(Some(match_tx)),
            match_rx: Mutex::new(Some(match_rx)),
            shutdown_tx,
            matches_found: AtomicU64::new(0),
            metrics: None,
            group: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share players with the other queues of `group`; call
    /// [`QueueGroup::join`] once the queue is in an `Arc`
    pub fn with_group(mut self, group: Arc<QueueGroup>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team_size(&self) -> usize {
        self.team_size
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.policy_kind
    }

    /// Matching settings currently applied to new searches and rounds
    pub fn config(&self) -> Result<MatchmakingConfig> {
        Ok(self.read_state()?.context.config.clone())
    }

    pub fn matches_found(&self) -> u64 {
        self.matches_found.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn num_searches(&self) -> usize {
        self.lock_queue().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Players in pending searches
    pub fn num_players(&self) -> usize {
        self.lock_queue()
            .map(|queue| {
                queue
                    .values()
                    .filter(|search| search.is_pending())
                    .map(|search| search.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// The queued search `player_id` belongs to, if any
    pub fn search_of_player(&self, player_id: &PlayerId) -> Option<Arc<Search>> {
        let queue = self.lock_queue().ok()?;
        queue
            .values()
            .find(|search| search.player_ids().any(|id| id == player_id))
            .cloned()
    }

    /// Build a search under the queue's current matching settings
    pub fn create_search(&self, players: Vec<Player>) -> Result<Arc<Search>> {
        let context = self.read_state()?.context.clone();
        Ok(Arc::new(Search::new(players, context)?))
    }

    /// Add a search to the queue without waiting for it
    pub fn push(&self, search: Arc<Search>) -> Result<()> {
        if self.is_shut_down() {
            return Err(MatchmakingError::QueueShutDown {
                queue_name: self.name.clone(),
            }
            .into());
        }
        if search.len() > self.team_size {
            return Err(MatchmakingError::InvalidSearch {
                reason: format!(
                    "a party of {} does not fit teams of {} in queue {}",
                    search.len(),
                    self.team_size,
                    self.name
                ),
            }
            .into());
        }
        if !search.is_pending() {
            return Err(MatchmakingError::SearchAlreadyResolved {
                search_id: search.id(),
            }
            .into());
        }

        let num_players = {
            let mut queue = self.lock_queue()?;
            let queued: HashSet<&PlayerId> = queue
                .values()
                .flat_map(|queued| queued.player_ids())
                .collect();
            if let Some(player_id) = search.player_ids().find(|id| queued.contains(id)) {
                return Err(MatchmakingError::PlayerAlreadyQueued {
                    player_id: player_id.clone(),
                    queue_name: self.name.clone(),
                }
                .into());
            }

            queue.insert(search.id(), search.clone());
            queue.values().map(|search| search.len()).sum()
        };

        info!("{} joined queue {}", search, self.name);
        if let Some(metrics) = &self.metrics {
            metrics.set_players_waiting(&self.name, num_players);
        }
        Ok(())
    }

    /// Queue `search` and wait until it is matched, cancelled or times out
    ///
    /// The search leaves the queue in every case, also when the returned
    /// future is dropped before completing.
    pub async fn search(&self, search: Arc<Search>, timeout: Duration) -> Result<SearchOutcome> {
        self.push(search.clone())?;
        let guard = QueuedSearch {
            queue: self,
            search: search.clone(),
        };

        let outcome = match tokio::time::timeout(timeout, search.await_match()).await {
            Ok(Ok(opponents)) => SearchOutcome::Matched { opponents },
            Ok(Err(e)) => match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::SearchCancelled { .. }) => SearchOutcome::Cancelled,
                _ => return Err(e),
            },
            Err(_) => {
                if search.cancel() {
                    info!("{} timed out in queue {}", search, self.name);
                    SearchOutcome::TimedOut
                } else {
                    // Resolved concurrently with the timeout
                    match search.status() {
                        SearchStatus::Matched { opponents } => SearchOutcome::Matched { opponents },
                        _ => SearchOutcome::Cancelled,
                    }
                }
            }
        };
        drop(guard);

        if let Some(metrics) = &self.metrics {
            metrics.record_search_outcome(&self.name, &outcome);
            if matches!(outcome, SearchOutcome::Matched { .. }) {
                metrics.record_search_wait(&self.name, search.start_time().elapsed());
            }
        }
        Ok(outcome)
    }

    /// Cancel a queued search; returns whether a pending search was cancelled
    pub fn cancel(&self, search_id: SearchId) -> bool {
        match self.remove_search(search_id) {
            Some(search) => {
                let cancelled = search.cancel();
                if cancelled {
                    info!("{} cancelled in queue {}", search, self.name);
                }
                cancelled
            }
            None => false,
        }
    }

    /// Run one pop round and return the matches it published
    pub async fn find_matches(&self) -> Result<Vec<Match>> {
        let _round = self.round_lock.lock().await;
        let round_timer = MetricsTimer::start();

        let searches: Vec<Arc<Search>> = self
            .lock_queue()?
            .values()
            .filter(|search| search.is_pending())
            .cloned()
            .collect();
        let num_players: usize = searches.iter().map(|search| search.len()).sum();

        info!(
            "Searching for matches in {} ({} players in {} searches)",
            self.name,
            num_players,
            searches.len()
        );

        if num_players < 2 * self.team_size {
            for search in &searches {
                search.register_failed_matching_attempt();
            }
            debug!("Not enough players in {} for a match", self.name);
            self.record_round(searches.len(), round_timer.elapsed());
            return Ok(Vec::new());
        }

        let policy = self.read_state()?.policy.clone();
        let team_size = self.team_size;
        let policy_name = policy.name();
        let input = searches.clone();
        let policy_timer = MetricsTimer::start();
        let result = tokio::task::spawn_blocking(move || policy.find(&input, team_size))
            .await
            .map_err(|e| MatchmakingError::InternalError {
                message: format!("matching policy of queue {} failed: {}", self.name, e),
            })?;
        if let Some(metrics) = &self.metrics {
            metrics.record_policy_run(policy_name, policy_timer.stop());
        }

        let (applied, num_players) = self.apply_matches(result.matches, team_size)?;

        let matched: HashSet<SearchId> = applied.iter().flat_map(Match::search_ids).collect();
        let mut unmatched = 0;
        for search in &searches {
            if !matched.contains(&search.id()) && search.is_pending() {
                search.register_failed_matching_attempt();
                unmatched += 1;
            }
        }

        info!(
            "Found {} matches in {}, {} searches left unmatched",
            applied.len(),
            self.name,
            unmatched
        );
        self.publish(&applied);

        if let Some(metrics) = &self.metrics {
            metrics.set_players_waiting(&self.name, num_players);
        }
        self.record_round(unmatched, round_timer.stop());
        Ok(applied)
    }

    /// Pop the queue on the timer's schedule until [`shutdown`](Self::shutdown)
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        info!("Pop loop of queue {} started", self.name);

        loop {
            let next_pop = match self.lock_timer() {
                Ok(timer) => timer.next_pop_at(),
                Err(e) => {
                    error!("Pop loop of queue {} stopped: {}", self.name, e);
                    break;
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.set_next_pop(
                    &self.name,
                    next_pop.saturating_duration_since(tokio::time::Instant::now()),
                );
            }

            tokio::select! {
                _ = tokio::time::sleep_until(next_pop) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }

            let num_players = self.num_players();
            match self.lock_timer() {
                Ok(mut timer) => {
                    let delay = timer.record_pop(num_players);
                    debug!("Next pop of {} in {:.1}s", self.name, delay.as_secs_f64());
                }
                Err(e) => {
                    error!("Pop loop of queue {} stopped: {}", self.name, e);
                    break;
                }
            }

            if let Err(e) = self.find_matches().await {
                error!("Pop round of queue {} failed: {}", self.name, e);
            }
        }

        info!("Pop loop of queue {} stopped", self.name);
    }

    /// Stream of published matches; can be taken once and ends on shutdown
    pub fn iter_matches(&self) -> Result<UnboundedReceiverStream<Match>> {
        let receiver = self
            .match_rx
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire match stream lock".to_string(),
            })?
            .take()
            .ok_or_else(|| MatchmakingError::MatchStreamTaken {
                queue_name: self.name.clone(),
            })?;

        Ok(UnboundedReceiverStream::new(receiver))
    }

    /// Stop the pop loop, cancel every queued search and end the match stream
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        let searches: Vec<Arc<Search>> = match self.lock_queue() {
            Ok(mut queue) => std::mem::take(&mut *queue).into_values().collect(),
            Err(e) => {
                error!("Failed to drain queue {}: {}", self.name, e);
                Vec::new()
            }
        };
        for search in &searches {
            search.cancel();
        }

        if let Ok(mut sender) = self.match_tx.lock() {
            sender.take();
        }
        info!(
            "Queue {} shut down, cancelled {} searches",
            self.name,
            searches.len()
        );
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        let delta = self.lock_timer()?.time_until_next_pop();
        let pop_time = chrono::Utc::now()
            + chrono::Duration::from_std(delta).unwrap_or_else(|_| chrono::Duration::zero());

        let searches: Vec<Arc<Search>> = self.lock_queue()?.values().cloned().collect();
        let num_players = searches.iter().map(|search| search.len()).sum();

        Ok(QueueSnapshot {
            queue_name: self.name.clone(),
            queue_pop_time: pop_time.to_rfc3339(),
            queue_pop_time_delta: (delta.as_secs_f64() * 100.0).round() / 100.0,
            num_players,
            team_size: self.team_size,
            boundary_80s: searches.iter().map(|search| search.boundary_80()).collect(),
            boundary_75s: searches.iter().map(|search| search.boundary_75()).collect(),
        })
    }

    /// Swap the matching settings
    ///
    /// Searches already queued keep the settings they were created with; new
    /// searches and the following rounds use `config`.
    pub fn update_config(&self, config: MatchmakingConfig) -> Result<()> {
        config.validate()?;

        let policy = Arc::new(MatchmakerPolicy::build(self.policy_kind, &config));
        self.lock_timer()?.update_config(&config);
        let context = SearchContext::new(config, self.rating_model.clone());

        let mut state = self
            .state
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire queue state write lock".to_string(),
            })?;
        *state = QueueState { context, policy };

        info!("Reloaded matchmaking configuration of queue {}", self.name);
        Ok(())
    }

    /// First map pool whose rating range covers `rating`
    pub fn map_pool_for_rating(&self, rating: f64) -> Option<&MapPool> {
        self.map_pools
            .iter()
            .find(|(settings, _)| settings.covers(rating))
            .map(|(_, pool)| pool)
    }

    fn publish(&self, matches: &[Match]) {
        let sender = match self.match_tx.lock() {
            Ok(sender) => sender.clone(),
            Err(_) => {
                error!("Failed to acquire match sender of queue {}", self.name);
                return;
            }
        };

        for game in matches {
            self.matches_found.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Match in {}: {:?} vs {:?} (quality {:.3})",
                self.name,
                game.team_a.player_ids().collect::<Vec<_>>(),
                game.team_b.player_ids().collect::<Vec<_>>(),
                game.quality
            );
            if let Some(metrics) = &self.metrics {
                let policy = self
                    .read_state()
                    .map(|state| state.policy.name())
                    .unwrap_or("unknown");
                metrics.record_match(&self.name, policy, game.quality, game.rating_imbalance());
            }
            match &sender {
                Some(sender) => {
                    if sender.send(game.clone()).is_err() {
                        debug!("Nobody is listening for matches of {}", self.name);
                    }
                }
                None => warn!("Queue {} is shut down, dropping a match", self.name),
            }
        }
    }

    /// Resolve the matches that are still valid and take their searches off
    /// the queue, and their players off every other queue of the group
    fn apply_matches(&self, matches: Vec<Match>, team_size: usize) -> Result<(Vec<Match>, usize)> {
        let _applying = match &self.group {
            Some(group) => Some(group.lock_apply()?),
            None => None,
        };

        let mut applied = Vec::with_capacity(matches.len());
        for game in matches {
            if !game.is_valid(team_size) {
                warn!(
                    "Discarding malformed match in {}: {} vs {} players",
                    self.name,
                    game.team_a.len(),
                    game.team_b.len()
                );
                continue;
            }
            match game.team_a.match_with(&game.team_b) {
                Ok(()) => applied.push(game),
                Err(e) => debug!("Discarding stale match in {}: {}", self.name, e),
            }
        }

        let num_players = {
            let mut queue = self.lock_queue()?;
            for game in &applied {
                for search_id in game.search_ids() {
                    queue.remove(&search_id);
                }
            }
            queue.values().map(|search| search.len()).sum::<usize>()
        };

        if let Some(group) = &self.group {
            group.withdraw(
                &self.name,
                applied
                    .iter()
                    .flat_map(|game| game.team_a.player_ids().chain(game.team_b.player_ids())),
            );
        }
        Ok((applied, num_players))
    }

    fn record_round(&self, unmatched: usize, duration: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_round(&self.name, unmatched, duration);
        }
    }

    fn remove_search(&self, search_id: SearchId) -> Option<Arc<Search>> {
        let mut queue = self.lock_queue().ok()?;
        let removed = queue.remove(&search_id);
        if removed.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.set_players_waiting(
                    &self.name,
                    queue.values().map(|search| search.len()).sum(),
                );
            }
        }
        removed
    }

    fn lock_queue(&self) -> Result<MutexGuard<'_, BTreeMap<SearchId, Arc<Search>>>> {
        self.queue.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: format!("Failed to acquire lock of queue {}", self.name),
            }
            .into()
        })
    }

    fn lock_timer(&self) -> Result<MutexGuard<'_, PopTimer>> {
        self.timer.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: format!("Failed to acquire pop timer of queue {}", self.name),
            }
            .into()
        })
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, QueueState>> {
        self.state.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire queue state read lock".to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for MatchmakerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakerQueue")
            .field("name", &self.name)
            .field("team_size", &self.team_size)
            .field("policy", &self.policy_kind)
            .field("searches", &self.num_searches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaker::map_pool::MapEntry;
    use crate::rating::TrueSkillModel;
    use crate::types::{Map, PlayerRating};
    use futures::StreamExt;

    fn ladder() -> MatchmakerQueue {
        ladder_named("ladder1v1")
    }

    fn ladder_named(name: &str) -> MatchmakerQueue {
        MatchmakerQueue::new(
            &QueueSettings::new(name, 1),
            MatchmakingConfig::default(),
            Arc::new(TrueSkillModel::default()),
        )
        .unwrap()
    }

    fn player(id: &str, mean: f64, deviation: f64) -> Player {
        Player::new(id, PlayerRating::new(mean, deviation), 100)
    }

    fn solo(queue: &MatchmakerQueue, id: &str, mean: f64, deviation: f64) -> Arc<Search> {
        queue.create_search(vec![player(id, mean, deviation)]).unwrap()
    }

    fn kind(err: &anyhow::Error) -> &MatchmakingError {
        err.downcast_ref::<MatchmakingError>().unwrap()
    }

    #[tokio::test]
    async fn test_push_rejects_invalid_searches() {
        let queue = ladder();

        let party = queue
            .create_search(vec![player("a", 1500.0, 100.0), player("b", 1500.0, 100.0)])
            .unwrap();
        let err = queue.push(party).unwrap_err();
        assert!(matches!(kind(&err), MatchmakingError::InvalidSearch { .. }));

        queue.push(solo(&queue, "a", 1500.0, 100.0)).unwrap();
        let err = queue.push(solo(&queue, "a", 1500.0, 100.0)).unwrap_err();
        assert!(matches!(
            kind(&err),
            MatchmakingError::PlayerAlreadyQueued { .. }
        ));

        let cancelled = solo(&queue, "c", 1500.0, 100.0);
        cancelled.cancel();
        let err = queue.push(cancelled).unwrap_err();
        assert!(matches!(
            kind(&err),
            MatchmakingError::SearchAlreadyResolved { .. }
        ));

        queue.shutdown();
        let err = queue.push(solo(&queue, "d", 1500.0, 100.0)).unwrap_err();
        assert!(matches!(kind(&err), MatchmakingError::QueueShutDown { .. }));
    }

    #[tokio::test]
    async fn test_round_publishes_matches() {
        let queue = ladder();
        let mut matches = queue.iter_matches().unwrap();

        let a = solo(&queue, "a", 1500.0, 80.0);
        let b = solo(&queue, "b", 1510.0, 80.0);
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();

        let found = queue.find_matches().await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(a.is_matched() && b.is_matched());
        assert_eq!(queue.num_searches(), 0);
        assert_eq!(queue.matches_found(), 1);

        let published = matches.next().await.unwrap();
        let mut ids = published.search_ids();
        ids.sort();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[tokio::test]
    async fn test_too_few_players_registers_failures() {
        let queue = ladder();
        let a = solo(&queue, "a", 1500.0, 80.0);
        queue.push(a.clone()).unwrap();

        assert!(queue.find_matches().await.unwrap().is_empty());
        assert_eq!(a.failed_matching_attempts(), 1);
        assert!(a.is_pending());
        assert_eq!(queue.num_searches(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_searches_register_failures() {
        let queue = ladder();
        let a = solo(&queue, "a", 2500.0, 60.0);
        let b = solo(&queue, "b", 600.0, 60.0);
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();

        assert!(queue.find_matches().await.unwrap().is_empty());
        assert_eq!(a.failed_matching_attempts(), 1);
        assert_eq!(b.failed_matching_attempts(), 1);
    }

    #[tokio::test]
    async fn test_search_waits_for_match() {
        let queue = Arc::new(ladder());
        let a = solo(&queue, "a", 1500.0, 80.0);
        let b = solo(&queue, "b", 1500.0, 80.0);

        let waiting = {
            let queue = queue.clone();
            let a = a.clone();
            tokio::spawn(async move { queue.search(a, Duration::from_secs(60)).await })
        };
        while queue.num_searches() == 0 {
            tokio::task::yield_now().await;
        }
        queue.push(b.clone()).unwrap();
        queue.find_matches().await.unwrap();

        let outcome = waiting.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Matched {
                opponents: vec![b.id()]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_times_out() {
        let queue = ladder();
        let a = solo(&queue, "a", 1500.0, 80.0);

        let outcome = queue.search(a.clone(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, SearchOutcome::TimedOut);
        assert!(a.is_cancelled());
        assert_eq!(queue.num_searches(), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_search() {
        let queue = Arc::new(ladder());
        let a = solo(&queue, "a", 1500.0, 80.0);

        let waiting = {
            let queue = queue.clone();
            let a = a.clone();
            tokio::spawn(async move { queue.search(a, Duration::from_secs(60)).await })
        };
        while queue.num_searches() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(queue.cancel(a.id()));
        assert!(!queue.cancel(a.id()));
        assert_eq!(waiting.await.unwrap().unwrap(), SearchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_search_leaves_queue() {
        let queue = ladder();
        let a = solo(&queue, "a", 1500.0, 80.0);

        {
            let pending = queue.search(a.clone(), Duration::from_secs(60));
            tokio::pin!(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
            assert_eq!(queue.num_searches(), 1);
        }

        assert_eq!(queue.num_searches(), 0);
        assert!(a.is_cancelled());
    }

    #[tokio::test]
    async fn test_match_stream_taken_once_and_ends() {
        let queue = ladder();
        let mut matches = queue.iter_matches().unwrap();
        let err = queue.iter_matches().unwrap_err();
        assert!(matches!(kind(&err), MatchmakingError::MatchStreamTaken { .. }));

        queue.shutdown();
        assert!(matches.next().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_searches() {
        let queue = ladder();
        let a = solo(&queue, "a", 1500.0, 80.0);
        queue.push(a.clone()).unwrap();

        queue.shutdown();
        assert!(a.is_cancelled());
        assert!(queue.is_shut_down());
        assert_eq!(queue.num_searches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_pops_until_shutdown() {
        let queue = Arc::new(ladder());
        let a = solo(&queue, "a", 1500.0, 80.0);
        let b = solo(&queue, "b", 1500.0, 80.0);
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();

        let runner = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run().await })
        };

        // First pop after half the maximum pop time
        tokio::time::sleep(Duration::from_secs(46)).await;
        tokio::time::timeout(Duration::from_secs(10), a.await_match())
            .await
            .unwrap()
            .unwrap();
        assert!(b.is_matched());

        queue.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot() {
        let queue = ladder();
        queue.push(solo(&queue, "a", 1500.0, 100.0)).unwrap();

        let snapshot = queue.snapshot().unwrap();
        assert_eq!(snapshot.queue_name, "ladder1v1");
        assert_eq!(snapshot.num_players, 1);
        assert_eq!(snapshot.team_size, 1);
        assert_eq!(snapshot.queue_pop_time_delta, 45.0);
        assert_eq!(snapshot.boundary_80s, vec![(1300.0, 1700.0)]);
        assert_eq!(snapshot.boundary_75s, vec![(1400.0, 1600.0)]);
        assert!(chrono::DateTime::parse_from_rfc3339(&snapshot.queue_pop_time).is_ok());
    }

    #[tokio::test]
    async fn test_update_config_applies_to_new_searches() {
        let queue = ladder();
        let before = solo(&queue, "a", 1500.0, 80.0);

        let config = MatchmakingConfig {
            newbie_min_games: 500,
            ..MatchmakingConfig::default()
        };
        queue.update_config(config).unwrap();
        let after = solo(&queue, "b", 1500.0, 80.0);

        assert!(!before.has_newbie());
        assert!(after.has_newbie());
        assert_eq!(queue.config().unwrap().newbie_min_games, 500);

        let invalid = MatchmakingConfig {
            minimum_game_quality: 2.0,
            ..MatchmakingConfig::default()
        };
        assert!(queue.update_config(invalid).is_err());
    }

    fn grouped(group: &Arc<QueueGroup>, name: &str) -> Arc<MatchmakerQueue> {
        let queue = Arc::new(
            MatchmakerQueue::new(
                &QueueSettings::new(name, 1),
                MatchmakingConfig::default(),
                Arc::new(TrueSkillModel::default()),
            )
            .unwrap()
            .with_group(group.clone()),
        );
        group.join(&queue);
        queue
    }

    #[tokio::test]
    async fn test_match_withdraws_player_from_grouped_queues() {
        let group = QueueGroup::new();
        let ladder = grouped(&group, "ladder1v1");
        let casual = grouped(&group, "casual1v1");
        assert_eq!(group.len(), 2);

        let waiting = solo(&casual, "a", 1500.0, 80.0);
        casual.push(waiting.clone()).unwrap();
        ladder.push(solo(&ladder, "a", 1500.0, 80.0)).unwrap();
        ladder.push(solo(&ladder, "b", 1500.0, 80.0)).unwrap();

        assert_eq!(ladder.find_matches().await.unwrap().len(), 1);
        assert!(waiting.is_cancelled());
        assert_eq!(casual.num_searches(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_player_matched_in_one_grouped_queue_only() {
        let group = QueueGroup::new();
        let ladder = grouped(&group, "ladder1v1");
        let casual = grouped(&group, "casual1v1");

        // Both rounds compute a match for "a"; only the first one applied stands
        ladder.push(solo(&ladder, "a", 1500.0, 80.0)).unwrap();
        ladder.push(solo(&ladder, "b", 1500.0, 80.0)).unwrap();
        casual.push(solo(&casual, "a", 1500.0, 80.0)).unwrap();
        casual.push(solo(&casual, "c", 1500.0, 80.0)).unwrap();

        let (first, second) = tokio::join!(ladder.find_matches(), casual.find_matches());
        let games: Vec<Match> = first.unwrap().into_iter().chain(second.unwrap()).collect();

        let with_a = games
            .iter()
            .filter(|game| {
                game.team_a
                    .player_ids()
                    .chain(game.team_b.player_ids())
                    .any(|id| id == "a")
            })
            .count();
        assert_eq!(with_a, 1);
        assert_eq!(games.len(), 1);
    }

    #[tokio::test]
    async fn test_ungrouped_queues_keep_other_searches() {
        let ladder = ladder();
        let other = ladder_named("casual1v1");
        let waiting = solo(&other, "a", 1500.0, 80.0);
        other.push(waiting.clone()).unwrap();
        ladder.push(solo(&ladder, "a", 1500.0, 80.0)).unwrap();
        ladder.push(solo(&ladder, "b", 1500.0, 80.0)).unwrap();

        assert_eq!(ladder.find_matches().await.unwrap().len(), 1);
        assert!(waiting.is_pending());
        assert_eq!(other.num_searches(), 1);
    }

    #[test]
    fn test_map_pool_for_rating() {
        let map = |id| MapEntry::Fixed {
            map: Map {
                id,
                name: format!("map_{}", id),
                path: format!("maps/map_{}.zip", id),
            },
            weight: 1,
        };
        let settings = QueueSettings::new("ladder1v1", 1)
            .with_map_pool(MapPoolSettings {
                id: 1,
                name: "low".to_string(),
                min_rating: None,
                max_rating: Some(800.0),
                maps: vec![map(1)],
            })
            .with_map_pool(MapPoolSettings {
                id: 2,
                name: "high".to_string(),
                min_rating: Some(800.0),
                max_rating: None,
                maps: vec![map(2)],
            });
        let queue = MatchmakerQueue::new(
            &settings,
            MatchmakingConfig::default(),
            Arc::new(TrueSkillModel::default()),
        )
        .unwrap();

        assert_eq!(queue.map_pool_for_rating(300.0).unwrap().name(), "low");
        assert_eq!(queue.map_pool_for_rating(800.0).unwrap().name(), "high");
        assert_eq!(queue.map_pool_for_rating(2000.0).unwrap().name(), "high");
    }
}
