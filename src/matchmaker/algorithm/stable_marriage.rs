//! 1v1 pairing over a weighted compatibility graph
//!
//! Nodes are teams, edges connect teams that mutually accept each other's
//! quality, and a propose/accept loop turns the graph into a stable matching.

use super::{Match, Matchmaker, MatchmakerResult};
use crate::config::MatchmakingConfig;
use crate::matchmaker::search::{Search, Team};
use std::sync::Arc;
use tracing::debug;

/// Undirected graph of mutually acceptable teams
#[derive(Debug)]
pub struct MatchingGraph {
    nodes: Vec<Team>,
    /// Neighbours of every node with the edge quality, worst first
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl MatchingGraph {
    /// Build the graph, exhaustively for small pools
    pub fn build(nodes: Vec<Team>, full_graph_pool_size: usize) -> Self {
        if nodes.len() <= full_graph_pool_size {
            Self::build_full(nodes)
        } else {
            Self::build_fast(nodes)
        }
    }

    /// Test every pair of nodes
    pub fn build_full(nodes: Vec<Team>) -> Self {
        let mut graph = Self::empty(nodes);
        let len = graph.nodes.len();
        for i in 0..len {
            for j in (i + 1)..len {
                graph.try_connect(i, j);
            }
        }
        graph.finish()
    }

    /// Only connect each node to its `log2(n)` nearest successors by rating
    pub fn build_fast(nodes: Vec<Team>) -> Self {
        let mut graph = Self::empty(nodes);
        let len = graph.nodes.len();
        let reach = (len.max(16) as f64).log2().floor() as usize;

        let mut order: Vec<usize> = (0..len).collect();
        order.sort_by(|&a, &b| {
            graph.nodes[a]
                .average_rating()
                .total_cmp(&graph.nodes[b].average_rating())
        });

        for (position, &i) in order.iter().enumerate() {
            for &j in order.iter().skip(position + 1).take(reach) {
                graph.try_connect(i, j);
            }
        }
        graph.finish()
    }

    fn empty(nodes: Vec<Team>) -> Self {
        let adjacency = vec![Vec::new(); nodes.len()];
        Self { nodes, adjacency }
    }

    fn try_connect(&mut self, i: usize, j: usize) {
        let (a, b) = (&self.nodes[i], &self.nodes[j]);
        if a.shares_players_with(b) {
            return;
        }
        let quality = a.quality_with(b);
        if quality >= a.match_threshold() && quality >= b.match_threshold() {
            self.adjacency[i].push((j, quality));
            self.adjacency[j].push((i, quality));
        }
    }

    fn finish(mut self) -> Self {
        for edges in &mut self.adjacency {
            edges.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        self
    }

    pub fn nodes(&self) -> &[Team] {
        &self.nodes
    }

    pub fn edges(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    /// Nodes without any acceptable opponent
    pub fn isolated_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&node| self.adjacency[node].is_empty())
    }

    /// Run propose/accept rounds; `partners[i]` is `(partner, quality)`
    pub fn stable_matching(&self) -> Vec<Option<(usize, f64)>> {
        let mut candidates = self.adjacency.clone();
        let mut partners: Vec<Option<(usize, f64)>> = vec![None; self.nodes.len()];
        let rounds = candidates.iter().map(Vec::len).max().unwrap_or(0);

        for _ in 0..rounds {
            let mut proposals = 0;
            for proposer in 0..self.nodes.len() {
                if partners[proposer].is_some() {
                    continue;
                }
                let Some((candidate, quality)) = candidates[proposer].pop() else {
                    continue;
                };
                proposals += 1;

                match partners[candidate] {
                    None => {
                        partners[proposer] = Some((candidate, quality));
                        partners[candidate] = Some((proposer, quality));
                    }
                    Some((current, current_quality)) if quality > current_quality => {
                        partners[current] = None;
                        partners[proposer] = Some((candidate, quality));
                        partners[candidate] = Some((proposer, quality));
                    }
                    Some(_) => {}
                }
            }
            if proposals == 0 {
                break;
            }
        }

        partners
    }

    /// Stable matches and the teams that found no partner
    pub fn into_matches(self) -> (Vec<Match>, Vec<Team>) {
        let partners = self.stable_matching();
        let mut matches = Vec::new();
        let mut unmatched = Vec::new();
        let mut nodes: Vec<Option<Team>> = self.nodes.into_iter().map(Some).collect();

        for (node, partner) in partners.iter().enumerate() {
            match partner {
                Some((other, quality)) if node < *other => {
                    if let (Some(a), Some(b)) = (nodes[node].take(), nodes[*other].take()) {
                        matches.push(Match::new(a, b, *quality));
                    }
                }
                Some(_) => {}
                None => {
                    if let Some(team) = nodes[node].take() {
                        unmatched.push(team);
                    }
                }
            }
        }

        (matches, unmatched)
    }
}

/// Fallback pairing for newbies, whose adjusted ratings rarely pass match thresholds
#[derive(Debug, Clone, Default)]
pub struct RandomlyMatchNewbies;

impl RandomlyMatchNewbies {
    pub fn new() -> Self {
        Self
    }
}

impl Matchmaker for RandomlyMatchNewbies {
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult {
        // High-rated searches never take part, smurfing newbies included
        let eligible = searches.iter().filter(|search| {
            search.is_pending() && search.len() == team_size && !search.has_high_rated_player()
        });
        let (newbies, others): (Vec<&Arc<Search>>, Vec<&Arc<Search>>) =
            eligible.partition(|search| search.has_newbie());

        let mut matches = Vec::new();
        let mut pairs = newbies.chunks_exact(2);
        for pair in pairs.by_ref() {
            let quality = pair[0].quality_with(pair[1]);
            matches.push(Match::new(
                Team::Single(pair[0].clone()),
                Team::Single(pair[1].clone()),
                quality,
            ));
        }

        if let [newbie] = pairs.remainder() {
            let opponent = others
                .iter()
                .find(|search| !search.has_newbie() && search.failed_matching_attempts() >= 1);
            if let Some(opponent) = opponent {
                debug!(
                    "Matching leftover newbie {} with {} after {} failed attempts",
                    newbie,
                    opponent,
                    opponent.failed_matching_attempts()
                );
                let quality = newbie.quality_with(opponent);
                matches.push(Match::new(
                    Team::Single((*newbie).clone()),
                    Team::Single((*opponent).clone()),
                    quality,
                ));
            }
        }

        MatchmakerResult::from_matches(searches, matches)
    }

    fn name(&self) -> &'static str {
        "randomly_match_newbies"
    }
}

/// Stable marriage over searches that already fill a team
#[derive(Debug, Clone)]
pub struct StableMarriageMatchmaker {
    full_graph_pool_size: usize,
    newbie_fallback: Option<RandomlyMatchNewbies>,
}

impl StableMarriageMatchmaker {
    pub fn new(config: &MatchmakingConfig) -> Self {
        Self {
            full_graph_pool_size: config.full_graph_pool_size,
            newbie_fallback: config
                .match_newbies_randomly
                .then(RandomlyMatchNewbies::new),
        }
    }

    /// Stable marriage alone, without the newbie fallback
    pub fn without_fallback(config: &MatchmakingConfig) -> Self {
        Self {
            full_graph_pool_size: config.full_graph_pool_size,
            newbie_fallback: None,
        }
    }

    /// Pair already formed teams
    pub fn match_teams(&self, teams: Vec<Team>) -> (Vec<Match>, Vec<Team>) {
        let graph = MatchingGraph::build(teams, self.full_graph_pool_size);
        debug!(
            "Built matching graph with {} nodes, {} isolated",
            graph.nodes().len(),
            graph.isolated_nodes().count()
        );
        graph.into_matches()
    }
}

impl Matchmaker for StableMarriageMatchmaker {
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult {
        // Proposals are made in queue order
        let teams = searches
            .iter()
            .filter(|search| search.is_pending() && search.len() == team_size)
            .cloned()
            .map(Team::Single)
            .collect();
        let (mut matches, _) = self.match_teams(teams);

        if let Some(fallback) = &self.newbie_fallback {
            let leftovers = MatchmakerResult::from_matches(searches, matches.clone()).unmatched;
            matches.extend(fallback.find(&leftovers, team_size).matches);
        }

        MatchmakerResult::from_matches(searches, matches)
    }

    fn name(&self) -> &'static str {
        "stable_marriage"
    }
}
