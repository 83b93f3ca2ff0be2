//! Metrics and monitoring for the matchmaking service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health probes, metrics and queue snapshots.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics,
    ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
