//! Queues whose players may search in several of them at once
//!
//! Queues of a group apply their matches one at a time. A player matched in
//! one queue is withdrawn from every other queue of the group before the lock
//! is released, so a later round elsewhere cannot match the same player again.

use crate::error::{MatchmakingError, Result};
use crate::matchmaker::queue::MatchmakerQueue;
use crate::types::PlayerId;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct QueueGroup {
    apply_lock: Mutex<()>,
    queues: RwLock<Vec<Weak<MatchmakerQueue>>>,
}

impl QueueGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a queue built `with_group` on this group
    pub fn join(&self, queue: &Arc<MatchmakerQueue>) {
        match self.queues.write() {
            Ok(mut queues) => queues.push(Arc::downgrade(queue)),
            Err(_) => error!("Failed to add queue {} to its group", queue.name()),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.read().map(|queues| queues.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Held while a queue applies a round's matches
    pub(crate) fn lock_apply(&self) -> Result<MutexGuard<'_, ()>> {
        self.apply_lock.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire queue group lock".to_string(),
            }
            .into()
        })
    }

    /// Cancel the searches of `players` in every queue but `matched_in`
    pub(crate) fn withdraw<'a>(
        &self,
        matched_in: &str,
        players: impl IntoIterator<Item = &'a PlayerId>,
    ) {
        let others: Vec<Arc<MatchmakerQueue>> = match self.queues.read() {
            Ok(queues) => queues
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|queue| queue.name() != matched_in)
                .collect(),
            Err(_) => {
                error!("Queue group lock poisoned, players of {} stay queued elsewhere", matched_in);
                return;
            }
        };
        if others.is_empty() {
            return;
        }

        for player_id in players {
            for queue in &others {
                if let Some(search) = queue.search_of_player(player_id) {
                    if queue.cancel(search.id()) {
                        info!(
                            "Withdrew {} from {} after a match in {}",
                            player_id,
                            queue.name(),
                            matched_in
                        );
                    }
                }
            }
        }
    }
}
