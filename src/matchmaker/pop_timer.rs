//! Adaptive queue pop scheduling
//!
//! The delay between two pops follows a moving average of how many players
//! were queued and how long it took them to gather, aiming for a configured
//! number of matches per pop.

use crate::config::MatchmakingConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
struct PopTimerSettings {
    time_max: Duration,
    time_min: Duration,
    desired_matches: f64,
    window_size: usize,
}

impl PopTimerSettings {
    fn from_config(config: &MatchmakingConfig) -> Self {
        Self {
            time_max: config.pop_time_max(),
            time_min: config.pop_time_min(),
            desired_matches: config.queue_pop_desired_matches,
            window_size: config.moving_average_window_size.max(1),
        }
    }
}

/// Decides when a queue pops next
#[derive(Debug)]
pub struct PopTimer {
    team_size: usize,
    settings: PopTimerSettings,
    last_queue_amounts: VecDeque<usize>,
    last_queue_times: VecDeque<f64>,
    last_pop: Instant,
    next_pop: Instant,
}

impl PopTimer {
    /// The first pop happens after half the maximum pop time
    pub fn new(team_size: usize, config: &MatchmakingConfig) -> Self {
        let settings = PopTimerSettings::from_config(config);
        let now = Instant::now();

        Self {
            team_size,
            settings,
            last_queue_amounts: VecDeque::with_capacity(settings.window_size),
            last_queue_times: VecDeque::with_capacity(settings.window_size),
            last_pop: now,
            next_pop: now + settings.time_max / 2,
        }
    }

    pub fn next_pop_at(&self) -> Instant {
        self.next_pop
    }

    pub fn last_pop_at(&self) -> Instant {
        self.last_pop
    }

    /// Time left until the next pop, zero when it is due
    pub fn time_until_next_pop(&self) -> Duration {
        self.next_pop.saturating_duration_since(Instant::now())
    }

    /// Record a pop that saw `num_players` queued and schedule the next one
    pub fn record_pop(&mut self, num_players: usize) -> Duration {
        let now = Instant::now();
        let waited = now.saturating_duration_since(self.last_pop);
        let delay = self.next_delay(num_players, waited);

        self.last_pop = now;
        self.next_pop = now + delay;
        delay
    }

    /// Push one sample into the moving averages and compute the next delay
    pub fn next_delay(&mut self, num_players: usize, waited: Duration) -> Duration {
        push_bounded(
            &mut self.last_queue_amounts,
            num_players,
            self.settings.window_size,
        );
        push_bounded(
            &mut self.last_queue_times,
            waited.as_secs_f64(),
            self.settings.window_size,
        );

        let total_players: usize = self.last_queue_amounts.iter().sum();
        if total_players == 0 {
            return self.settings.time_max;
        }

        let total_times: f64 = self.last_queue_times.iter().sum();
        let desired_players = self.settings.desired_matches * 2.0 * self.team_size as f64;
        let seconds = desired_players * total_times / total_players as f64;
        let delay = Duration::from_secs_f64(seconds.max(0.0));

        if delay > self.settings.time_max {
            warn!(
                "Required pop time {:.1}s exceeds the maximum of {:?}, capping",
                seconds, self.settings.time_max
            );
            return self.settings.time_max;
        }
        if delay < self.settings.time_min {
            debug!(
                "Required pop time {:.1}s is below the minimum of {:?}",
                seconds, self.settings.time_min
            );
            return self.settings.time_min;
        }

        delay
    }

    /// Apply new pop settings; the already scheduled pop is kept
    pub fn update_config(&mut self, config: &MatchmakingConfig) {
        self.settings = PopTimerSettings::from_config(config);
        while self.last_queue_amounts.len() > self.settings.window_size {
            self.last_queue_amounts.pop_front();
        }
        while self.last_queue_times.len() > self.settings.window_size {
            self.last_queue_times.pop_front();
        }
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, size: usize) {
    if window.len() == size {
        window.pop_front();
    }
    window.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchmakingConfig {
        MatchmakingConfig {
            queue_pop_time_max: 90,
            queue_pop_time_min: 10,
            queue_pop_desired_matches: 2.5,
            moving_average_window_size: 5,
            ..MatchmakingConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pop_after_half_max() {
        let timer = PopTimer::new(1, &config());
        assert_eq!(timer.time_until_next_pop(), Duration::from_secs(45));
    }

    #[test]
    fn test_no_players_waits_max() {
        let mut timer = PopTimer::new(1, &config());
        assert_eq!(
            timer.next_delay(0, Duration::from_secs(45)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_delay_tracks_arrival_rate() {
        // 1v1: five desired players per pop; 10 players in 40s means 4s per player
        let mut timer = PopTimer::new(1, &config());
        assert_eq!(
            timer.next_delay(10, Duration::from_secs(40)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_delay_is_clamped() {
        let mut timer = PopTimer::new(1, &config());
        // One player in 90 seconds would need 450 seconds
        assert_eq!(
            timer.next_delay(1, Duration::from_secs(90)),
            Duration::from_secs(90)
        );

        let mut timer = PopTimer::new(1, &config());
        // 100 players in a second would pop almost immediately
        assert_eq!(
            timer.next_delay(100, Duration::from_secs(1)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_team_size_scales_desired_players() {
        let mut solo = PopTimer::new(1, &config());
        let mut teams = PopTimer::new(2, &config());
        let solo_delay = solo.next_delay(40, Duration::from_secs(40));
        let team_delay = teams.next_delay(40, Duration::from_secs(40));
        assert_eq!(team_delay, solo_delay * 2);
    }

    #[test]
    fn test_moving_average_window() {
        let mut timer = PopTimer::new(1, &config());
        for _ in 0..5 {
            timer.next_delay(0, Duration::from_secs(90));
        }
        // Old empty samples still weigh in while inside the window
        let delay = timer.next_delay(50, Duration::from_secs(20));
        assert_eq!(delay, Duration::from_secs_f64(5.0 * 380.0 / 50.0));

        for _ in 0..4 {
            timer.next_delay(50, Duration::from_secs(20));
        }
        // Only the last five samples remain
        let delay = timer.next_delay(50, Duration::from_secs(20));
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_pop_schedules_next() {
        let mut timer = PopTimer::new(1, &config());
        tokio::time::advance(Duration::from_secs(45)).await;
        let delay = timer.record_pop(10);
        // 5 desired players * 45s / 10 players
        assert_eq!(delay, Duration::from_secs_f64(22.5));
        assert_eq!(timer.time_until_next_pop(), delay);
    }

    #[test]
    fn test_update_config_shrinks_window() {
        let mut timer = PopTimer::new(1, &config());
        for _ in 0..5 {
            timer.next_delay(10, Duration::from_secs(10));
        }
        let updated = MatchmakingConfig {
            moving_average_window_size: 2,
            ..config()
        };
        timer.update_config(&updated);
        assert_eq!(timer.last_queue_amounts.len(), 2);
        assert_eq!(timer.last_queue_times.len(), 2);
    }
}
