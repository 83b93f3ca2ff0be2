//! Matching policies
//!
//! Every policy implements `Matchmaker`: given the pending searches of one
//! queue and its team size, return the matches it proposes and the searches
//! it left alone. Policies never resolve searches themselves; the queue
//! applies their results.

pub mod bucket_teams;
pub mod stable_marriage;
pub mod team_matchmaker;

pub use bucket_teams::BucketTeamMatchmaker;
pub use stable_marriage::{RandomlyMatchNewbies, StableMarriageMatchmaker};
pub use team_matchmaker::TeamMatchMaker;

use crate::config::{MatchmakingConfig, PolicyKind};
use crate::matchmaker::search::{Search, Team};
use crate::types::SearchId;
use std::collections::HashSet;
use std::sync::Arc;

/// Two opposing teams forming one game
#[derive(Debug, Clone)]
pub struct Match {
    pub team_a: Team,
    pub team_b: Team,
    /// Quality the match was accepted with
    pub quality: f64,
}

impl Match {
    pub fn new(team_a: Team, team_b: Team, quality: f64) -> Self {
        Self {
            team_a,
            team_b,
            quality,
        }
    }

    pub fn searches(&self) -> impl Iterator<Item = &Arc<Search>> {
        self.team_a
            .searches()
            .iter()
            .chain(self.team_b.searches().iter())
    }

    pub fn search_ids(&self) -> Vec<SearchId> {
        self.searches().map(|search| search.id()).collect()
    }

    /// Both sides hold exactly `team_size` players and share none
    pub fn is_valid(&self, team_size: usize) -> bool {
        self.team_a.len() == team_size
            && self.team_b.len() == team_size
            && !self.team_a.shares_players_with(&self.team_b)
    }

    /// Average displayed rating over every player of the game
    pub fn average_rating(&self) -> f64 {
        let total = self.team_a.cumulated_rating() + self.team_b.cumulated_rating();
        total / (self.team_a.len() + self.team_b.len()) as f64
    }

    /// Difference of the two teams' average displayed ratings
    pub fn rating_imbalance(&self) -> f64 {
        (self.team_a.average_rating() - self.team_b.average_rating()).abs()
    }
}

/// Result of one policy run
#[derive(Debug, Default)]
pub struct MatchmakerResult {
    pub matches: Vec<Match>,
    pub unmatched: Vec<Arc<Search>>,
}

impl MatchmakerResult {
    /// Build a result where every input search not used by `matches` is unmatched
    pub fn from_matches(searches: &[Arc<Search>], matches: Vec<Match>) -> Self {
        let matched: HashSet<SearchId> = matches.iter().flat_map(Match::search_ids).collect();
        let unmatched = searches
            .iter()
            .filter(|search| !matched.contains(&search.id()))
            .cloned()
            .collect();

        Self { matches, unmatched }
    }
}

/// Trait implemented by every matching policy
pub trait Matchmaker: Send + Sync {
    /// Propose matches among `searches` for teams of `team_size` players
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult;

    /// Name used in logs and metrics
    fn name(&self) -> &'static str;
}

/// The closed set of policies a queue can be configured with
#[derive(Debug, Clone)]
pub enum MatchmakerPolicy {
    StableMarriage(StableMarriageMatchmaker),
    BucketTeams(BucketTeamMatchmaker),
    TeamMatch(TeamMatchMaker),
}

impl MatchmakerPolicy {
    pub fn build(kind: PolicyKind, config: &MatchmakingConfig) -> Self {
        match kind {
            PolicyKind::StableMarriage => {
                MatchmakerPolicy::StableMarriage(StableMarriageMatchmaker::new(config))
            }
            PolicyKind::BucketTeams => {
                MatchmakerPolicy::BucketTeams(BucketTeamMatchmaker::new(config))
            }
            PolicyKind::TeamMatch => MatchmakerPolicy::TeamMatch(TeamMatchMaker::new(config)),
        }
    }

    fn inner(&self) -> &dyn Matchmaker {
        match self {
            MatchmakerPolicy::StableMarriage(policy) => policy,
            MatchmakerPolicy::BucketTeams(policy) => policy,
            MatchmakerPolicy::TeamMatch(policy) => policy,
        }
    }
}

impl Matchmaker for MatchmakerPolicy {
    fn find(&self, searches: &[Arc<Search>], team_size: usize) -> MatchmakerResult {
        self.inner().find(searches, team_size)
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

/// Sort searches by average rating, highest first
pub(crate) fn sort_by_rating_desc(searches: &mut [Arc<Search>]) {
    searches.sort_by(|a, b| b.average_rating().total_cmp(&a.average_rating()));
}

/// Sort searches by average rating, lowest first
pub(crate) fn sort_by_rating_asc(searches: &mut [Arc<Search>]) {
    searches.sort_by(|a, b| a.average_rating().total_cmp(&b.average_rating()));
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::MatchmakingConfig;
    use crate::matchmaker::search::{Search, SearchContext};
    use crate::rating::TrueSkillModel;
    use crate::types::{Player, PlayerRating};
    use std::sync::Arc;

    pub fn context(config: MatchmakingConfig) -> Arc<SearchContext> {
        SearchContext::new(config, Arc::new(TrueSkillModel::default()))
    }

    pub fn solo(ctx: &Arc<SearchContext>, id: &str, mean: f64, deviation: f64) -> Arc<Search> {
        party(ctx, &[(id, mean, deviation)])
    }

    pub fn party(ctx: &Arc<SearchContext>, players: &[(&str, f64, f64)]) -> Arc<Search> {
        let players = players
            .iter()
            .map(|&(id, mean, deviation)| Player::new(id, PlayerRating::new(mean, deviation), 100))
            .collect();
        Arc::new(Search::new(players, ctx.clone()).unwrap())
    }
}
