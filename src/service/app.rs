//! Main application state and service coordination
//!
//! `AppState` owns one matchmaker queue per configured queue, the pop loops
//! and match launchers driving them, and the health server.

use crate::config::{AppConfig, MatchmakingConfig};
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::matchmaker::{
    ConnectionRegistry, GameLauncher, MatchmakerQueue, NotifyingGameLauncher, QueueGroup,
    QueueSnapshot, SearchOutcome,
};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::rating::{InMemoryPlayerDirectory, PlayerDirectory, RatingModel, TrueSkillModel};
use crate::service::match_launcher::{MapHistory, MatchLauncher};
use crate::types::{LobbyNotification, PlayerId};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Configuration the service was started with
    config: AppConfig,

    /// One queue per configured queue name
    queues: BTreeMap<String, Arc<MatchmakerQueue>>,

    /// Player lookup for incoming searches
    players: Arc<dyn PlayerDirectory>,

    /// Open player connections
    registry: Arc<ConnectionRegistry>,

    /// Starts the games produced by the queues
    launcher: Arc<dyn GameLauncher>,

    map_history: Arc<MapHistory>,

    metrics: Arc<MetricsCollector>,

    /// Set while the service runs; dropped on shutdown
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Pop loops, match launchers and the health server; joined on shutdown
    service_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Periodic maintenance tasks; aborted on shutdown
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with in-memory players and notifying launches
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let registry = Arc::new(ConnectionRegistry::new());
        let launcher = Arc::new(NotifyingGameLauncher::new(registry.clone()));
        Self::with_components(
            config,
            Arc::new(InMemoryPlayerDirectory::new()),
            registry,
            launcher,
        )
    }

    /// Initialize the application around the given collaborators
    pub fn with_components(
        config: AppConfig,
        players: Arc<dyn PlayerDirectory>,
        registry: Arc<ConnectionRegistry>,
        launcher: Arc<dyn GameLauncher>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing {} matchmaking service", config.service.name);

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let rating_model: Arc<dyn RatingModel> = Arc::new(
            TrueSkillModel::new(&config.rating).map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize rating model: {}", e),
            })?,
        );

        // A player may search several queues; a match in one withdraws the others
        let group = QueueGroup::new();
        let mut queues = BTreeMap::new();
        for settings in &config.queues {
            let queue = MatchmakerQueue::new(
                settings,
                config.matchmaking.clone(),
                rating_model.clone(),
            )
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create queue {}: {}", settings.name, e),
            })?
            .with_metrics(metrics.clone())
            .with_group(group.clone());
            let queue = Arc::new(queue);
            group.join(&queue);
            queues.insert(settings.name.clone(), queue);
        }

        let map_history = Arc::new(MapHistory::new(config.service.map_history_size));

        Ok(Self {
            config,
            queues,
            players,
            registry,
            launcher,
            map_history,
            metrics,
            health_server: Mutex::new(None),
            service_tasks: Mutex::new(Vec::new()),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the pop loops, match launchers and health server
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} matchmaking service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_queues().await?;
        self.start_health_server().await;
        self.start_background_tasks().await;

        info!("✅ Matchmaking service started with {} queues", self.queues.len());
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        // Ends the pop loops and the match streams the launchers consume
        for queue in self.queues.values() {
            queue.shutdown();
        }

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        info!(
            "Final statistics: {} matches produced",
            self.total_matches()
        );
        info!("✅ Matchmaking service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn queue(&self, name: &str) -> Option<Arc<MatchmakerQueue>> {
        self.queues.get(name).cloned()
    }

    pub fn queues(&self) -> impl Iterator<Item = &Arc<MatchmakerQueue>> {
        self.queues.values()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn players(&self) -> Arc<dyn PlayerDirectory> {
        self.players.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn total_matches(&self) -> u64 {
        self.queues.values().map(|queue| queue.matches_found()).sum()
    }

    /// Players currently waiting over every queue
    pub fn players_searching(&self) -> usize {
        self.queues.values().map(|queue| queue.num_players()).sum()
    }

    /// Search in `queue_name` for a party of `player_ids` until matched,
    /// cancelled or timed out
    pub async fn start_search(
        &self,
        queue_name: &str,
        player_ids: &[PlayerId],
        timeout: Option<Duration>,
    ) -> MatchmakingResult<SearchOutcome> {
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| MatchmakingError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })?;

        let players = self.players.get_players(player_ids)?;
        let search = queue.create_search(players)?;
        let timeout = timeout.unwrap_or_else(|| self.config.search_timeout());

        self.notify_search_info(queue_name, player_ids, true);
        let outcome = queue.search(search, timeout).await;
        match &outcome {
            Ok(SearchOutcome::Matched { .. }) => {}
            _ => self.notify_search_info(queue_name, player_ids, false),
        }

        outcome
    }

    /// Cancel the search `player_id` is part of in `queue_name`
    pub fn cancel_search(&self, queue_name: &str, player_id: &PlayerId) -> MatchmakingResult<bool> {
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| MatchmakingError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })?;

        Ok(queue
            .search_of_player(player_id)
            .map(|search| queue.cancel(search.id()))
            .unwrap_or(false))
    }

    pub fn queue_snapshots(&self) -> MatchmakingResult<Vec<QueueSnapshot>> {
        self.queues.values().map(|queue| queue.snapshot()).collect()
    }

    /// Apply new matchmaking settings to every queue
    pub fn reload_matchmaking(&self, config: MatchmakingConfig) -> MatchmakingResult<()> {
        config.validate()?;
        for queue in self.queues.values() {
            queue.update_config(config.clone())?;
        }
        info!(
            "Reloaded matchmaking configuration of {} queues",
            self.queues.len()
        );
        Ok(())
    }

    fn notify_search_info(&self, queue_name: &str, player_ids: &[PlayerId], searching: bool) {
        for player_id in player_ids {
            let notification = LobbyNotification::SearchInfo {
                queue_name: queue_name.to_string(),
                searching,
            };
            if let Err(e) = self.registry.notify(player_id, notification) {
                debug!("Could not tell {} about its search: {}", player_id, e);
            }
        }
    }

    async fn start_queues(&self) -> Result<(), ServiceError> {
        let queues: Vec<Arc<MatchmakerQueue>> = self.queues.values().cloned().collect();
        let mut tasks = self.service_tasks.lock().await;

        for queue in &queues {
            let matches = queue
                .iter_matches()
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to start queue {}: {}", queue.name(), e),
                })?;

            let pop_loop = {
                let queue = queue.clone();
                tokio::spawn(async move { queue.run().await })
            };

            let match_launcher =
                MatchLauncher::new(queue.clone(), self.launcher.clone(), self.map_history.clone())
                    .with_metrics(self.metrics.clone());
            let launcher_task = tokio::spawn(match_launcher.run(matches));

            tasks.push(pop_loop);
            tasks.push(launcher_task);
            info!("Queue {} is running", queue.name());
        }

        Ok(())
    }

    async fn start_health_server(self: &Arc<Self>) {
        let health_config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );

        let handle = {
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Health server failed: {}", e);
                }
            })
        };

        *self.health_server.lock().await = Some(server);
        self.service_tasks.lock().await.push(handle);
        info!(
            "✅ Health server started on port {}",
            self.config.service.health_port
        );
    }

    async fn start_background_tasks(&self) {
        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let metrics = self.metrics.clone();
            let queues: Vec<Arc<MatchmakerQueue>> = self.queues.values().cloned().collect();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics.service().uptime_seconds.set(uptime_seconds);
                    metrics.update_health_status(2);
                    for queue in &queues {
                        metrics.update_component_health(
                            &format!("queue:{}", queue.name()),
                            !queue.is_shut_down(),
                        );
                    }
                    debug!("Updated service health metrics - uptime: {}s", uptime_seconds);
                }
            })
        };

        self.background_tasks.lock().await.push(health_metrics_task);
    }

    /// Abort maintenance tasks and wait for the service tasks to wind down
    async fn stop_background_tasks(&self) {
        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }

        let tasks: Vec<JoinHandle<()>> = self.service_tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            info!("No service tasks to stop");
            return;
        }

        let task_count = tasks.len();
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        info!("Waiting for {} service tasks...", task_count);

        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("Service task failed: {}", e),
                Err(_) => {
                    warn!("Service task exceeded the shutdown timeout, aborting");
                    abort.abort();
                }
            }
        }

        info!("✅ All {} service tasks stopped", task_count);
    }
}
