//! Matching policies and map selection exercised through the public API
//!
//! Reference scenarios with known results, plus property tests over random
//! player pools.

mod fixtures;

use lobby_matchmaker::config::MatchmakingConfig;
use lobby_matchmaker::matchmaker::algorithm::bucket_teams::distribute;
use lobby_matchmaker::matchmaker::algorithm::{
    BucketTeamMatchmaker, RandomlyMatchNewbies, StableMarriageMatchmaker, TeamMatchMaker,
};
use lobby_matchmaker::matchmaker::{Match, MapEntry, MapPool, Matchmaker, Search, SearchStatus};
use lobby_matchmaker::types::{Map, Player, PlayerRating};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use fixtures::{context, newbie, search, solo};

fn pairs(matches: &[Match]) -> HashSet<(String, String)> {
    matches
        .iter()
        .map(|game| {
            let a = game.team_a.player_ids().next().cloned().unwrap_or_default();
            let b = game.team_b.player_ids().next().cloned().unwrap_or_default();
            if a < b {
                (a, b)
            } else {
                (b, a)
            }
        })
        .collect()
}

fn pair(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

fn fixed_map(id: u32) -> MapEntry {
    MapEntry::Fixed {
        map: Map {
            id,
            name: format!("map_{}", id),
            path: format!("maps/map_{}.zip", id),
        },
        weight: 1,
    }
}

#[test]
fn test_stable_marriage_pairs_nearest_opponents() {
    let ctx = context(MatchmakingConfig::default());
    let searches = vec![
        solo(&ctx, "p1", 2300.0, 64.0),
        solo(&ctx, "p2", 1200.0, 72.0),
        solo(&ctx, "p3", 1300.0, 175.0),
        solo(&ctx, "p4", 2350.0, 125.0),
        solo(&ctx, "p5", 1200.0, 175.0),
        solo(&ctx, "p6", 1250.0, 175.0),
    ];

    let result = StableMarriageMatchmaker::new(&MatchmakingConfig::default()).find(&searches, 1);

    let expected: HashSet<_> = [pair("p1", "p4"), pair("p2", "p5"), pair("p3", "p6")]
        .into_iter()
        .collect();
    assert_eq!(pairs(&result.matches), expected);
    assert!(result.unmatched.is_empty());
}

#[test]
fn test_sorted_players_split_best_and_worst_together() {
    assert_eq!(distribute(vec![1, 2, 3, 4], 2), vec![vec![1, 4], vec![2, 3]]);

    let ctx = context(MatchmakingConfig::default());
    let sorted: Vec<Arc<Search>> = [1800.0, 1600.0, 1400.0, 1200.0]
        .iter()
        .enumerate()
        .map(|(i, &mean)| solo(&ctx, &format!("p{}", i + 1), mean, 100.0))
        .collect();
    let teams = distribute(sorted, 2);
    let ids: Vec<Vec<String>> = teams
        .iter()
        .map(|team| {
            team.iter()
                .flat_map(|search| search.player_ids().cloned())
                .collect()
        })
        .collect();
    assert_eq!(
        ids,
        vec![
            vec!["p1".to_string(), "p4".to_string()],
            vec!["p2".to_string(), "p3".to_string()]
        ]
    );
}

#[test]
fn test_unplayed_map_chosen_over_played_ones() {
    let pool = MapPool::new(
        1,
        "ladder",
        vec![fixed_map(1), fixed_map(2), fixed_map(3), fixed_map(4)],
    );
    for _ in 0..200 {
        assert_eq!(pool.choose_map(&[1, 2, 3]).unwrap().id, 4);
    }
}

#[test]
fn test_newbie_matched_with_waiting_experienced_player() {
    let ctx = context(MatchmakingConfig::default());
    let rookie = search(&ctx, vec![newbie("newbie")]);
    let pro = solo(&ctx, "pro", 1400.0, 10.0);
    assert!(!pro.has_high_rated_player());
    assert!(!rookie.matches_with(&pro));
    assert!(!pro.matches_with(&rookie));

    let searches = vec![rookie.clone(), pro.clone()];
    let result = RandomlyMatchNewbies::new().find(&searches, 1);
    assert!(result.matches.is_empty());
    assert_eq!(result.unmatched.len(), 2);

    pro.register_failed_matching_attempt();
    let result = RandomlyMatchNewbies::new().find(&searches, 1);
    assert_eq!(pairs(&result.matches), [pair("newbie", "pro")].into_iter().collect());
    assert!(result.unmatched.is_empty());
}

#[test]
fn test_newbie_never_forced_onto_strong_players() {
    let ctx = context(MatchmakingConfig::default());
    let top = solo(&ctx, "top", 2300.0, 64.0);
    let smurf = search(
        &ctx,
        vec![Player::new("smurf", PlayerRating::new(2000.0, 150.0), 2)],
    );
    assert!(top.has_high_rated_player());
    assert!(smurf.has_newbie() && smurf.has_high_rated_player());
    top.register_failed_matching_attempt();
    smurf.register_failed_matching_attempt();

    let searches = vec![search(&ctx, vec![newbie("newbie")]), top, smurf];
    let result = RandomlyMatchNewbies::new().find(&searches, 1);
    assert!(result.matches.is_empty());
    assert_eq!(result.unmatched.len(), 3);
}

#[test]
fn test_cancelling_resolved_search_has_no_effect() {
    let ctx = context(MatchmakingConfig::default());
    let a = solo(&ctx, "a", 1500.0, 100.0);
    let b = solo(&ctx, "b", 1500.0, 100.0);
    a.match_with(&b).unwrap();

    assert!(!a.cancel());
    assert!(!b.cancel());
    assert!(a.is_matched() && b.is_matched());
    assert!(!a.is_cancelled());

    let c = solo(&ctx, "c", 1500.0, 100.0);
    assert!(c.cancel());
    assert!(!c.cancel());
    assert!(c.is_cancelled());
    assert!(c.match_with(&solo(&ctx, "d", 1500.0, 100.0)).is_err());
}

fn pool_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((1000.0f64..2200.0, 50.0f64..240.0), 0..24)
}

fn solos(ratings: &[(f64, f64)]) -> Vec<Arc<Search>> {
    let ctx = context(MatchmakingConfig::default());
    ratings
        .iter()
        .enumerate()
        .map(|(i, &(mean, deviation))| solo(&ctx, &format!("p{}", i), mean, deviation))
        .collect()
}

/// Every match fills both teams and no player shows up twice in one round
fn assert_round_well_formed(matches: &[Match], team_size: usize) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    for game in matches {
        prop_assert!(game.is_valid(team_size));
        prop_assert_eq!(game.team_a.len(), team_size);
        prop_assert_eq!(game.team_b.len(), team_size);
        for id in game.team_a.player_ids().chain(game.team_b.player_ids()) {
            prop_assert!(seen.insert(id.clone()), "player {} matched twice", id);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stable_marriage_rounds_are_well_formed(ratings in pool_strategy()) {
        let config = MatchmakingConfig::default();
        let searches = solos(&ratings);
        let result = StableMarriageMatchmaker::without_fallback(&config).find(&searches, 1);

        assert_round_well_formed(&result.matches, 1)?;
        prop_assert_eq!(result.matches.len() * 2 + result.unmatched.len(), searches.len());
        for game in &result.matches {
            prop_assert!(game.quality >= config.minimum_game_quality);
        }
    }

    #[test]
    fn team_matchmaker_rounds_are_well_formed(
        ratings in pool_strategy(),
        team_size in 1usize..=3,
    ) {
        let config = MatchmakingConfig::default();
        let searches = solos(&ratings);
        let result = TeamMatchMaker::new(&config).find(&searches, team_size);

        assert_round_well_formed(&result.matches, team_size)?;
        for game in &result.matches {
            prop_assert!(game.quality >= config.minimum_game_quality);
        }
    }

    #[test]
    fn bucket_rounds_are_well_formed(ratings in pool_strategy(), team_size in 1usize..=3) {
        let searches = solos(&ratings);
        let result = BucketTeamMatchmaker::new(&MatchmakingConfig::default())
            .find(&searches, team_size);

        assert_round_well_formed(&result.matches, team_size)?;
    }

    #[test]
    fn applied_matches_are_symmetric(ratings in pool_strategy()) {
        let searches = solos(&ratings);
        let result = StableMarriageMatchmaker::new(&MatchmakingConfig::default())
            .find(&searches, 1);

        for game in &result.matches {
            game.team_a.match_with(&game.team_b).unwrap();
        }
        for game in &result.matches {
            let a = &game.team_a.searches()[0];
            let b = &game.team_b.searches()[0];
            prop_assert!(a.is_matched() && b.is_matched());
            prop_assert_eq!(a.status(), SearchStatus::Matched { opponents: vec![b.id()] });
            prop_assert_eq!(b.status(), SearchStatus::Matched { opponents: vec![a.id()] });
        }
    }

    #[test]
    fn quality_is_symmetric(
        a in (1000.0f64..2200.0, 50.0f64..500.0),
        b in (1000.0f64..2200.0, 50.0f64..500.0),
    ) {
        let ctx = context(MatchmakingConfig::default());
        let a = solo(&ctx, "a", a.0, a.1);
        let b = solo(&ctx, "b", b.0, b.1);

        let forward = a.quality_with(&b);
        let backward = b.quality_with(&a);
        prop_assert!((forward - backward).abs() < 1e-9);
        prop_assert!((0.0..=1.0).contains(&forward));
    }

    #[test]
    fn newbie_mean_moves_toward_raw_mean(raw_mean in 0.0f64..3000.0) {
        let config = MatchmakingConfig::default();
        let ctx = context(config.clone());
        let threshold = config.newbie_min_games;
        let base = config.newbie_base_mean;

        let means: Vec<f64> = (0..=threshold + 5)
            .map(|games| {
                let player = Player::new("p", PlayerRating::new(raw_mean, 200.0), games);
                ctx.effective_rating(&player).mean
            })
            .collect();

        prop_assert!((means[0] - base).abs() < 1e-9);
        for window in means.windows(2) {
            if raw_mean >= base {
                prop_assert!(window[1] >= window[0] - 1e-9);
            } else {
                prop_assert!(window[1] <= window[0] + 1e-9);
            }
        }
        for mean in &means[threshold as usize..] {
            prop_assert_eq!(*mean, raw_mean);
        }
    }
}
