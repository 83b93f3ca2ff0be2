//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the matchmaking
//! service, including readiness and liveness probes.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version (could be from environment)
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Number of configured queues
    pub queues: usize,
    /// Players currently searching over every queue
    pub players_searching: usize,
    /// Matches produced since service start
    pub matches_found: u64,
    /// Players with an open connection
    pub connected_players: usize,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(&app_state).await;
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        for queue_check in Self::check_queues(&app_state) {
            if queue_check.status == HealthStatus::Unhealthy {
                overall_status = HealthStatus::Unhealthy;
            } else if queue_check.status == HealthStatus::Degraded
                && overall_status == HealthStatus::Healthy
            {
                overall_status = HealthStatus::Degraded;
            }
            checks.push(queue_check);
        }

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(&app_state),
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - every queue must accept searches
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let queue_checks = Self::check_queues(&app_state);
        if queue_checks
            .iter()
            .all(|check| check.status == HealthStatus::Healthy)
        {
            Ok(HealthStatus::Healthy)
        } else if queue_checks
            .iter()
            .any(|check| check.status == HealthStatus::Healthy)
        {
            Ok(HealthStatus::Degraded)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A queue is healthy while it accepts searches and its state is readable
    fn check_queues(app_state: &AppState) -> Vec<ComponentCheck> {
        app_state
            .queues()
            .map(|queue| {
                let start = std::time::Instant::now();
                let (status, message) = if queue.is_shut_down() {
                    (
                        HealthStatus::Unhealthy,
                        Some("Queue is shut down".to_string()),
                    )
                } else {
                    match queue.snapshot() {
                        Ok(_) => (HealthStatus::Healthy, None),
                        Err(e) => (
                            HealthStatus::Degraded,
                            Some(format!("Snapshot failed: {}", e)),
                        ),
                    }
                };

                ComponentCheck {
                    name: format!("queue:{}", queue.name()),
                    status,
                    message,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            })
            .collect()
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        ServiceStats {
            queues: app_state.queues().count(),
            players_searching: app_state.players_searching(),
            matches_found: app_state.total_matches(),
            connected_players: app_state.registry().connected_players(),
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let app = Arc::new(AppState::new(AppConfig::default()).await.unwrap());

        let health = HealthCheck::check(app.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.stats.queues, 2);
        assert_eq!(health.stats.matches_found, 0);
        assert!(health
            .checks
            .iter()
            .any(|check| check.name == "queue:ladder1v1" && check.status == HealthStatus::Healthy));

        assert_eq!(
            HealthCheck::liveness_check(app.clone()).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(app).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_health_check_serializes() {
        let app = Arc::new(AppState::new(AppConfig::default()).await.unwrap());
        let json = HealthCheck::check(app).await.unwrap().to_json().unwrap();
        assert!(json.contains("\"players_searching\": 0"));
    }
}
