//! High concurrency tests for queue rounds
//!
//! These tests run many searches, cancellations and pop rounds at once and
//! check that every search ends up in at most one game.

mod fixtures;

use futures::StreamExt;
use lobby_matchmaker::config::{default_queues, MatchmakingConfig};
use lobby_matchmaker::matchmaker::{MatchmakerQueue, SearchOutcome};
use lobby_matchmaker::rating::TrueSkillModel;
use lobby_matchmaker::types::SearchId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixtures::player;

fn create_ladder_queue() -> Arc<MatchmakerQueue> {
    let settings = default_queues()
        .into_iter()
        .find(|queue| queue.name == "ladder1v1")
        .unwrap();
    Arc::new(
        MatchmakerQueue::new(
            &settings,
            MatchmakingConfig::default(),
            Arc::new(TrueSkillModel::default()),
        )
        .unwrap(),
    )
}

async fn wait_until_queued(queue: &MatchmakerQueue, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.num_searches() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("searches queued in time");
}

/// Spawn one waiting search per player; returns the search ids in spawn order
fn spawn_searches(
    queue: &Arc<MatchmakerQueue>,
    count: usize,
) -> (
    Vec<SearchId>,
    Vec<tokio::task::JoinHandle<lobby_matchmaker::Result<SearchOutcome>>>,
) {
    let mut ids = Vec::with_capacity(count);
    let mut tasks = Vec::with_capacity(count);
    for i in 0..count {
        let mean = 1400.0 + (i % 400) as f64;
        let deviation = 70.0 + (i % 50) as f64;
        let search = queue
            .create_search(vec![player(&format!("load_test_player_{}", i), mean, deviation)])
            .unwrap();
        ids.push(search.id());

        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue.search(search, Duration::from_secs(60)).await
        }));
    }
    (ids, tasks)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_100_concurrent_searches() {
    let queue = create_ladder_queue();
    let matches = queue.iter_matches().unwrap();
    let concurrent_searches = 100;

    let start_time = Instant::now();
    let (ids, tasks) = spawn_searches(&queue, concurrent_searches);
    wait_until_queued(&queue, concurrent_searches).await;

    for _ in 0..5 {
        queue.find_matches().await.unwrap();
    }
    queue.shutdown();

    let mut outcomes = HashMap::new();
    for (id, task) in ids.into_iter().zip(tasks) {
        outcomes.insert(id, task.await.unwrap().unwrap());
    }
    let produced: Vec<_> = matches.collect().await;

    println!(
        "{} searches produced {} games in {:?}",
        concurrent_searches,
        produced.len(),
        start_time.elapsed()
    );

    assert!(!produced.is_empty());
    assert_eq!(produced.len() as u64, queue.matches_found());

    let mut in_games = HashSet::new();
    for game in &produced {
        assert!(game.is_valid(1));
        for id in game.search_ids() {
            assert!(in_games.insert(id), "search {} in two games", id);
        }
    }

    for (id, outcome) in &outcomes {
        match outcome {
            SearchOutcome::Matched { opponents } => {
                assert!(in_games.contains(id));
                assert_eq!(opponents.len(), 1);
                assert!(in_games.contains(&opponents[0]));
            }
            SearchOutcome::Cancelled => assert!(!in_games.contains(id)),
            SearchOutcome::TimedOut => panic!("search {} timed out", id),
        }
    }
    assert_eq!(queue.num_searches(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellations_during_rounds() {
    let queue = create_ladder_queue();
    let matches = queue.iter_matches().unwrap();
    let (ids, tasks) = spawn_searches(&queue, 60);
    wait_until_queued(&queue, 60).await;

    let cancelling = {
        let queue = queue.clone();
        let ids = ids.clone();
        tokio::spawn(async move {
            let mut cancelled = HashSet::new();
            for id in ids.into_iter().step_by(2) {
                if queue.cancel(id) {
                    cancelled.insert(id);
                }
                tokio::task::yield_now().await;
            }
            cancelled
        })
    };

    let rounds = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                queue.find_matches().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let cancelled = cancelling.await.unwrap();
    rounds.await.unwrap();
    queue.shutdown();

    let produced: Vec<_> = matches.collect().await;
    let in_games: HashSet<SearchId> = produced.iter().flat_map(|game| game.search_ids()).collect();

    for id in &cancelled {
        assert!(!in_games.contains(id), "cancelled search {} was matched", id);
    }
    for (id, task) in ids.into_iter().zip(tasks) {
        match task.await.unwrap().unwrap() {
            SearchOutcome::Matched { .. } => assert!(in_games.contains(&id)),
            SearchOutcome::Cancelled => assert!(!in_games.contains(&id)),
            SearchOutcome::TimedOut => panic!("search {} timed out", id),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rounds_never_overlap() {
    let queue = create_ladder_queue();
    let matches = queue.iter_matches().unwrap();
    let (_ids, tasks) = spawn_searches(&queue, 40);
    wait_until_queued(&queue, 40).await;

    // Concurrent rounds are serialized by the queue
    let rounds: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.find_matches().await.unwrap() })
        })
        .collect();
    for round in rounds {
        round.await.unwrap();
    }
    queue.shutdown();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let produced: Vec<_> = matches.collect().await;
    let mut players = HashSet::new();
    for game in &produced {
        for id in game.team_a.player_ids().chain(game.team_b.player_ids()) {
            assert!(players.insert(id.clone()), "player {} in two games", id);
        }
    }
}
