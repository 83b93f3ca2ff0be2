//! Metrics collection using Prometheus
//!
//! Every queue reports into the same collector; metrics carry the queue name
//! as a label.

use crate::matchmaker::queue::SearchOutcome;
use anyhow::Result;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Search and queue metrics
    queue_metrics: QueueMetrics,

    /// Produced matches and launched games
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Search and queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Searches that left a queue, by outcome
    pub searches_total: IntCounterVec,

    /// Players currently waiting in a queue
    pub players_waiting: IntGaugeVec,

    /// Seconds until the next pop
    pub next_pop_seconds: IntGaugeVec,

    /// Searches left unmatched by a pop round
    pub unmatched_searches: HistogramVec,

    /// Time a search spent queued before it was matched
    pub search_wait_seconds: HistogramVec,
}

/// Produced matches and launched games
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches produced, by queue and policy
    pub matches_total: IntCounterVec,

    /// Quality of produced matches
    pub match_quality: HistogramVec,

    /// Difference of team average ratings in produced matches
    pub rating_imbalance: HistogramVec,

    /// Game launches, by queue and status
    pub games_launched_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of a whole pop round
    pub round_duration: HistogramVec,

    /// Time a matching policy spent computing one round
    pub policy_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Every registered metric in the text exposition format, with its content type
    pub fn encode_text(&self) -> Result<(String, String)> {
        let encoder = TextEncoder::new();
        let body = encoder
            .encode_to_string(&self.registry.gather())
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
        Ok((encoder.format_type().to_string(), body))
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record how a search left the queue
    pub fn record_search_outcome(&self, queue_name: &str, outcome: &SearchOutcome) {
        self.queue_metrics
            .searches_total
            .with_label_values(&[queue_name, outcome.label()])
            .inc();
    }

    pub fn record_search_wait(&self, queue_name: &str, waited: Duration) {
        self.queue_metrics
            .search_wait_seconds
            .with_label_values(&[queue_name])
            .observe(waited.as_secs_f64());
    }

    pub fn set_players_waiting(&self, queue_name: &str, players: usize) {
        self.queue_metrics
            .players_waiting
            .with_label_values(&[queue_name])
            .set(players as i64);
    }

    pub fn set_next_pop(&self, queue_name: &str, delay: Duration) {
        self.queue_metrics
            .next_pop_seconds
            .with_label_values(&[queue_name])
            .set(delay.as_secs() as i64);
    }

    /// Record the outcome of one pop round
    pub fn record_round(&self, queue_name: &str, unmatched: usize, duration: Duration) {
        self.queue_metrics
            .unmatched_searches
            .with_label_values(&[queue_name])
            .observe(unmatched as f64);

        self.performance_metrics
            .round_duration
            .with_label_values(&[queue_name])
            .observe(duration.as_secs_f64());
    }

    /// Record a match published by a queue
    pub fn record_match(&self, queue_name: &str, policy: &str, quality: f64, imbalance: f64) {
        self.match_metrics
            .matches_total
            .with_label_values(&[queue_name, policy])
            .inc();

        self.match_metrics
            .match_quality
            .with_label_values(&[queue_name])
            .observe(quality);

        self.match_metrics
            .rating_imbalance
            .with_label_values(&[queue_name])
            .observe(imbalance);
    }

    pub fn record_game_launch(&self, queue_name: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.match_metrics
            .games_launched_total
            .with_label_values(&[queue_name, status])
            .inc();
    }

    /// Record the computation time of one policy run
    pub fn record_policy_run(&self, policy: &str, duration: Duration) {
        self.performance_metrics
            .policy_duration
            .with_label_values(&[policy])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Total matches produced across every queue and policy
    pub fn total_matches(&self) -> u64 {
        self.match_metrics
            .matches_total
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("lobby_matchmaker_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "lobby_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("lobby_matchmaker_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let searches_total = IntCounterVec::new(
            Opts::new(
                "lobby_matchmaker_searches_total",
                "Searches that left a queue",
            ),
            &["queue", "outcome"],
        )?;
        registry.register(Box::new(searches_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "lobby_matchmaker_players_waiting",
                "Players currently waiting in queue",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let next_pop_seconds = IntGaugeVec::new(
            Opts::new(
                "lobby_matchmaker_next_pop_seconds",
                "Seconds until the next queue pop",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(next_pop_seconds.clone()))?;

        let unmatched_searches = HistogramVec::new(
            HistogramOpts::new(
                "lobby_matchmaker_unmatched_searches",
                "Searches left unmatched by a pop round",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]),
            &["queue"],
        )?;
        registry.register(Box::new(unmatched_searches.clone()))?;

        let search_wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lobby_matchmaker_search_wait_seconds",
                "Time a search waited before being matched",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
            &["queue"],
        )?;
        registry.register(Box::new(search_wait_seconds.clone()))?;

        Ok(Self {
            searches_total,
            players_waiting,
            next_pop_seconds,
            unmatched_searches,
            search_wait_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_total = IntCounterVec::new(
            Opts::new("lobby_matchmaker_matches_total", "Matches produced"),
            &["queue", "policy"],
        )?;
        registry.register(Box::new(matches_total.clone()))?;

        let match_quality = HistogramVec::new(
            HistogramOpts::new("lobby_matchmaker_match_quality", "Quality of produced matches")
                .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
            &["queue"],
        )?;
        registry.register(Box::new(match_quality.clone()))?;

        let rating_imbalance = HistogramVec::new(
            HistogramOpts::new(
                "lobby_matchmaker_rating_imbalance",
                "Difference of team average ratings",
            )
            .buckets(vec![10.0, 25.0, 50.0, 100.0, 150.0, 250.0, 500.0]),
            &["queue"],
        )?;
        registry.register(Box::new(rating_imbalance.clone()))?;

        let games_launched_total = IntCounterVec::new(
            Opts::new("lobby_matchmaker_games_launched_total", "Game launches"),
            &["queue", "status"],
        )?;
        registry.register(Box::new(games_launched_total.clone()))?;

        Ok(Self {
            matches_total,
            match_quality,
            rating_imbalance,
            games_launched_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let round_duration = HistogramVec::new(
            HistogramOpts::new(
                "lobby_matchmaker_round_duration_seconds",
                "Duration of a pop round",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["queue"],
        )?;
        registry.register(Box::new(round_duration.clone()))?;

        let policy_duration = HistogramVec::new(
            HistogramOpts::new(
                "lobby_matchmaker_policy_duration_seconds",
                "Time a matching policy spent computing one round",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["policy"],
        )?;
        registry.register(Box::new(policy_duration.clone()))?;

        Ok(Self {
            round_duration,
            policy_duration,
        })
    }
}
