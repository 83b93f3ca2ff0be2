//! Queue Simulator CLI Tool
//!
//! Feeds synthetic players into a single matchmaker queue running on a fast
//! pop timer and prints every game it launches.
//!
//! Usage:
//!   cargo run --bin queue-sim -- --help
//!   cargo run --bin queue-sim -- --queue ladder1v1 --players 40 --duration 30
//!   cargo run --bin queue-sim -- --queue tmm2v2 --players 64 --party-size 2 --seed 7

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use lobby_matchmaker::config::{default_queues, MatchmakingConfig};
use lobby_matchmaker::matchmaker::{GameLauncher, MatchmakerQueue, SearchOutcome};
use lobby_matchmaker::rating::TrueSkillModel;
use lobby_matchmaker::service::{MapHistory, MatchLauncher};
use lobby_matchmaker::types::{GameLaunch, Player, PlayerRating};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "queue-sim")]
#[command(about = "Simulate a matchmaker queue with synthetic players")]
struct Cli {
    /// Queue to simulate (one of the built-in queues)
    #[arg(short, long, default_value = "ladder1v1")]
    queue: String,

    /// Number of synthetic players
    #[arg(short, long, default_value = "20")]
    players: usize,

    /// Players per search; parties are formed from consecutive players
    #[arg(long, default_value = "1")]
    party_size: usize,

    /// Mean rating of the generated population
    #[arg(long, default_value = "1500.0")]
    mean: f64,

    /// Spread of generated means around the population mean
    #[arg(long, default_value = "300.0")]
    spread: f64,

    /// Share of players that are still newbies
    #[arg(long, default_value = "0.2")]
    newbie_share: f64,

    /// Longest pop interval in seconds
    #[arg(long, default_value = "4")]
    pop_time: u64,

    /// How long to run before shutting the queue down, in seconds
    #[arg(short, long, default_value = "20")]
    duration: u64,

    /// Seed for the generated population
    #[arg(long)]
    seed: Option<u64>,
}

/// Prints launched games instead of contacting any game host
struct PrintingLauncher;

#[async_trait]
impl GameLauncher for PrintingLauncher {
    async fn launch_game(&self, launch: GameLaunch) -> Result<()> {
        println!(
            "🎮 {} on {} (quality {:.3}): {} vs {}",
            launch.game_id,
            launch.map.name,
            launch.quality,
            launch.team_a.join(", "),
            launch.team_b.join(", ")
        );
        Ok(())
    }
}

fn generate_players(cli: &Cli, config: &MatchmakingConfig) -> Vec<Player> {
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    (0..cli.players)
        .map(|i| {
            let newbie = rng.gen_bool(cli.newbie_share.clamp(0.0, 1.0));
            let mean = cli.mean + rng.gen_range(-cli.spread..=cli.spread);
            let (deviation, games) = if newbie {
                (rng.gen_range(250.0..500.0), rng.gen_range(0..config.newbie_min_games))
            } else {
                (rng.gen_range(50.0..150.0), rng.gen_range(config.newbie_min_games..500))
            };
            Player::new(format!("sim{:03}", i), PlayerRating::new(mean, deviation), games)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.party_size == 0 {
        return Err(anyhow!("party size must be at least 1"));
    }

    let settings = default_queues()
        .into_iter()
        .find(|queue| queue.name == cli.queue)
        .ok_or_else(|| anyhow!("Unknown queue {}. Use ladder1v1 or tmm2v2", cli.queue))?;
    if cli.party_size > settings.team_size {
        return Err(anyhow!(
            "party size {} does not fit team size {}",
            cli.party_size,
            settings.team_size
        ));
    }

    let config = MatchmakingConfig {
        queue_pop_time_max: cli.pop_time.max(1),
        queue_pop_time_min: 1,
        ..MatchmakingConfig::default()
    };
    let rating_model = Arc::new(TrueSkillModel::default());
    let queue = Arc::new(MatchmakerQueue::new(&settings, config.clone(), rating_model)?);

    println!(
        "🚀 Simulating {} with {} players in parties of {}",
        queue.name(),
        cli.players,
        cli.party_size
    );

    let launcher = MatchLauncher::new(
        queue.clone(),
        Arc::new(PrintingLauncher),
        Arc::new(MapHistory::new(5)),
    );
    let launcher_task = tokio::spawn(launcher.run(queue.iter_matches()?));
    let pop_task = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.run().await })
    };

    let timeout = Duration::from_secs(cli.duration);
    let mut searches = JoinSet::new();
    let players = generate_players(&cli, &config);
    for party in players.chunks(cli.party_size) {
        let search = queue.create_search(party.to_vec())?;
        let queue = queue.clone();
        searches.spawn(async move { queue.search(search, timeout).await });
    }

    let (mut matched, mut timed_out, mut cancelled, mut failed) = (0, 0, 0, 0);
    let shutdown = tokio::time::sleep(timeout);
    tokio::pin!(shutdown);
    let mut shut_down = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !shut_down => {
                println!("⏱️  Simulation time elapsed, shutting down queue");
                queue.shutdown();
                shut_down = true;
            }
            result = searches.join_next() => match result {
                Some(Ok(Ok(SearchOutcome::Matched { .. }))) => matched += 1,
                Some(Ok(Ok(SearchOutcome::TimedOut))) => timed_out += 1,
                Some(Ok(Ok(SearchOutcome::Cancelled))) => cancelled += 1,
                Some(Ok(Err(e))) => {
                    eprintln!("❌ Search failed: {}", e);
                    failed += 1;
                }
                Some(Err(e)) => {
                    eprintln!("❌ Search task panicked: {}", e);
                    failed += 1;
                }
                None => break,
            }
        }
    }

    queue.shutdown();
    let _ = pop_task.await;
    let _ = launcher_task.await;

    println!("📊 Results for {}:", queue.name());
    println!("   Matches found: {}", queue.matches_found());
    println!("   Searches matched: {}", matched);
    println!("   Searches timed out: {}", timed_out);
    println!("   Searches cancelled: {}", cancelled);
    println!("   Searches failed: {}", failed);

    Ok(())
}
