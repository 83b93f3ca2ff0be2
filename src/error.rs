//! Error types for the matchmaking engine
//!
//! Fallible operations return `anyhow::Result`; the domain failures callers
//! may want to match on are expressed as `MatchmakingError` variants.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid search: {reason}")]
    InvalidSearch { reason: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Player {player_id} is already searching in queue {queue_name}")]
    PlayerAlreadyQueued {
        player_id: String,
        queue_name: String,
    },

    #[error("Search {search_id} has already been resolved")]
    SearchAlreadyResolved { search_id: u64 },

    #[error("Search {search_id} was cancelled")]
    SearchCancelled { search_id: u64 },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue {queue_name} has been shut down")]
    QueueShutDown { queue_name: String },

    #[error("Match stream for queue {queue_name} was already taken")]
    MatchStreamTaken { queue_name: String },

    #[error("Map pool {pool} has no maps")]
    EmptyMapPool { pool: String },

    #[error("Invalid map weights in pool {pool}: {reason}")]
    InvalidMapWeights { pool: String, reason: String },

    #[error("Team formation failed: {0}")]
    TeamFormation(#[from] TeamFormationError),

    #[error("Rating calculation failed: {reason}")]
    RatingCalculationFailed { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Failures while splitting a set of searches into two teams
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeamFormationError {
    #[error("not enough players: needed {needed}, found {found}")]
    NotEnoughPlayers { needed: usize, found: usize },

    #[error("uneven teams: {left} vs {right} players")]
    UnevenTeams { left: usize, right: usize },
}
