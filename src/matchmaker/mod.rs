//! Core matchmaking: searches, matching policies, map pools and queues

pub mod algorithm;
pub mod group;
pub mod launcher;
pub mod map_pool;
pub mod pop_timer;
pub mod queue;
pub mod registry;
pub mod search;

pub use algorithm::{Match, Matchmaker, MatchmakerPolicy, MatchmakerResult};
pub use group::QueueGroup;
pub use launcher::{GameLauncher, NotifyingGameLauncher};
pub use map_pool::{MapEntry, MapPool};
pub use pop_timer::PopTimer;
pub use queue::{MatchmakerQueue, QueueSnapshot, SearchOutcome};
pub use registry::ConnectionRegistry;
pub use search::{resolve_match, CombinedSearch, Search, SearchContext, SearchStatus, Team};
