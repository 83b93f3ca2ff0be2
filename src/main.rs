//! Lobby matchmaker service binary
//!
//! Loads the configuration, runs every configured queue until SIGINT or
//! SIGTERM and reloads the matchmaking settings on SIGHUP.

use anyhow::{bail, Result};
use clap::Parser;
use lobby_matchmaker::config::{validate_config, AppConfig};
use lobby_matchmaker::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "lobby-matchmaker",
    version,
    about = "Matchmaking queues pairing players and parties into rating-balanced games",
    long_about = "Runs one queue per game mode. Each queue pops on an adaptive timer, forms \
                  matches scored by TrueSkill quality, picks a map from the pool covering the \
                  game's rating and launches the game."
)]
struct Args {
    /// TOML configuration file; the environment is used when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run only the named queues (repeatable)
    #[arg(short, long = "queue", value_name = "NAME")]
    queues: Vec<String>,

    /// Override the longest delay between two pops of a queue
    #[arg(long, value_name = "SECONDS")]
    pop_time_max: Option<u64>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override the health and metrics HTTP port
    #[arg(long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,

    /// Print the queue health report and exit with its status
    #[arg(long)]
    health_check: bool,

    /// Validate the configuration, print the queues and exit
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = read_config(self.config.as_ref())?;

        if !self.queues.is_empty() {
            if let Some(unknown) = self.queues.iter().find(|name| config.queue(name).is_none()) {
                bail!("Unknown queue {}", unknown);
            }
            config.queues.retain(|queue| self.queues.contains(&queue.name));
        }
        if let Some(pop_time_max) = self.pop_time_max {
            config.matchmaking.queue_pop_time_max = pop_time_max;
            config.matchmaking.queue_pop_time_min =
                config.matchmaking.queue_pop_time_min.min(pop_time_max);
        }
        if let Some(log_level) = &self.log_level {
            config.service.log_level = log_level.clone();
        }
        if self.debug {
            config.service.log_level = "debug".to_string();
        }
        if let Some(http_port) = self.http_port {
            config.service.health_port = http_port;
        }

        validate_config(&config)?;
        Ok(config)
    }
}

fn read_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::from_env(),
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn log_queues(config: &AppConfig) {
    info!(
        "🚀 {} v{} on port {}",
        config.service.name,
        lobby_matchmaker::VERSION,
        config.service.health_port
    );
    for queue in &config.queues {
        info!(
            "   {}: {}v{} by {}, {} map pools",
            queue.name,
            queue.team_size,
            queue.team_size,
            queue.effective_policy(),
            queue.map_pools.len()
        );
    }
    info!(
        "   pops every {}-{}s aiming at {} matches",
        config.matchmaking.queue_pop_time_min,
        config.matchmaking.queue_pop_time_max,
        config.matchmaking.queue_pop_desired_matches
    );
}

/// Print the health report of a freshly built service; exits non-zero unless healthy
async fn health_check(config: AppConfig) -> Result<()> {
    let app_state = Arc::new(AppState::new(config).await?);
    let health = HealthCheck::check(app_state).await?;

    println!("{}: {}", health.service, health.status);
    for check in &health.checks {
        match &check.message {
            Some(message) => println!("  {} {} ({})", check.name, check.status, message),
            None => println!("  {} {}", check.name, check.status),
        }
    }

    let code = if health.status == HealthStatus::Healthy { 0 } else { 1 };
    std::process::exit(code);
}

/// Log how full every queue is until the service stops
async fn report_queues(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;
        match app_state.queue_snapshots() {
            Ok(snapshots) => {
                for snapshot in snapshots {
                    info!(
                        "Queue {}: {} players, next pop in {:.0}s",
                        snapshot.queue_name, snapshot.num_players, snapshot.queue_pop_time_delta
                    );
                }
            }
            Err(e) => warn!("Failed to snapshot queues: {}", e),
        }
    }
}

fn reload(app_state: &AppState, config_path: Option<&PathBuf>) {
    info!("🔄 Reloading matchmaking settings");
    let result =
        read_config(config_path).and_then(|config| app_state.reload_matchmaking(config.matchmaking));
    if let Err(e) = result {
        error!("Keeping the current matchmaking settings: {}", e);
    }
}

/// Serve until SIGINT or SIGTERM, reloading on every SIGHUP
#[cfg(unix)]
async fn serve(app_state: &AppState, config_path: Option<&PathBuf>) -> Result<()> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = unix_signal(SignalKind::terminate())?;
    let mut hangup = unix_signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                return Ok(());
            }
            Some(()) = hangup.recv() => reload(app_state, config_path),
        }
    }
}

#[cfg(not(unix))]
async fn serve(_app_state: &AppState, _config_path: Option<&PathBuf>) -> Result<()> {
    signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = args.load_config().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return health_check(config).await;
    }

    log_queues(&config);
    if args.dry_run {
        info!("Configuration is valid");
        return Ok(());
    }

    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize the service: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = app_state.start().await {
        error!("Failed to start the service: {}", e);
        std::process::exit(1);
    }
    let reporter = tokio::spawn(report_queues(app_state.clone()));

    info!("✅ Accepting searches, Ctrl+C stops the service");
    if let Err(e) = serve(&app_state, args.config.as_ref()).await {
        error!("Signal handling failed, shutting down: {}", e);
    }

    info!("🛑 Shutting down");
    reporter.abort();
    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Shutdown complete"),
        Ok(Err(e)) => error!("Error during shutdown: {}", e),
        Err(_) => warn!("⚠️  Shutdown timed out after {:?}", config.shutdown_timeout()),
    }
    Ok(())
}
