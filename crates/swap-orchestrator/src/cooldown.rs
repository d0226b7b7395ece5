//! Per-model failure tracking and load cool-down
//!
//! A model whose loads fail `failure_threshold` times in a row is benched
//! for the cool-down window and the router skips it. The streak resets on a
//! successful load, when the bench expires, or when a streak that never
//! tripped is older than the window. Generation errors and timeouts are
//! counted separately and never bench a model.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use swap_core::CooldownConfig;

/// Failure counters for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelHealth {
    pub consecutive_load_failures: u32,
    pub generation_errors: u64,
    pub timeouts: u64,
    /// Time left on the bench, if benched
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Debug, Default)]
struct Entry {
    consecutive_load_failures: u32,
    /// First failure of the current streak
    streak_started: Option<Instant>,
    generation_errors: u64,
    timeouts: u64,
    cooled_until: Option<Instant>,
}

impl Entry {
    /// Clear an expired bench or a stale streak
    fn settle(&mut self, now: Instant, window: Duration) {
        let expired = match (self.cooled_until, self.streak_started) {
            (Some(until), _) => until <= now,
            (None, Some(started)) => now.duration_since(started) >= window,
            (None, None) => false,
        };
        if expired {
            self.clear_streak();
        }
    }

    fn clear_streak(&mut self) {
        self.cooled_until = None;
        self.streak_started = None;
        self.consecutive_load_failures = 0;
    }
}

#[derive(Debug)]
pub struct Cooldown {
    threshold: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Cooldown {
    pub fn new(config: &CooldownConfig) -> Self {
        Self::with_window(config.failure_threshold, config.duration())
    }

    pub fn with_window(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count a failed load; true when this failure benched the model
    pub fn record_load_failure(&self, model: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(model.to_string()).or_default();
        entry.settle(now, self.window);
        entry.streak_started.get_or_insert(now);
        entry.consecutive_load_failures += 1;

        if entry.cooled_until.is_none() && entry.consecutive_load_failures >= self.threshold {
            entry.cooled_until = Some(now + self.window);
            warn!(
                "{} failed to load {} times in a row, cooling down for {:?}",
                model, entry.consecutive_load_failures, self.window
            );
            return true;
        }
        false
    }

    pub fn record_load_success(&self, model: &str) {
        if let Some(entry) = self.entries.lock().get_mut(model) {
            if entry.consecutive_load_failures > 0 || entry.cooled_until.is_some() {
                info!("{} loaded, clearing failure streak", model);
            }
            entry.clear_streak();
        }
    }

    pub fn record_generation_error(&self, model: &str) {
        self.entries
            .lock()
            .entry(model.to_string())
            .or_default()
            .generation_errors += 1;
    }

    pub fn record_timeout(&self, model: &str) {
        self.entries.lock().entry(model.to_string()).or_default().timeouts += 1;
    }

    pub fn is_cooling(&self, model: &str) -> bool {
        self.remaining(model).is_some()
    }

    pub fn remaining(&self, model: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(model)?;
        entry.settle(now, self.window);
        entry.cooled_until.map(|until| until.saturating_duration_since(now))
    }

    pub fn health(&self, model: &str) -> ModelHealth {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(model) {
            Some(entry) => {
                entry.settle(now, self.window);
                ModelHealth {
                    consecutive_load_failures: entry.consecutive_load_failures,
                    generation_errors: entry.generation_errors,
                    timeouts: entry.timeouts,
                    cooldown_remaining: entry
                        .cooled_until
                        .map(|until| until.saturating_duration_since(now)),
                }
            }
            None => ModelHealth::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let cooldown = Cooldown::new(&CooldownConfig::default());
        assert!(!cooldown.record_load_failure("m"));
        assert!(!cooldown.record_load_failure("m"));
        assert!(!cooldown.is_cooling("m"));
        assert!(cooldown.record_load_failure("m"));
        assert!(cooldown.is_cooling("m"));
        assert!(cooldown.remaining("m").unwrap() > Duration::from_secs(290));
        assert!(!cooldown.is_cooling("other"));
    }

    #[test]
    fn test_success_resets_streak() {
        let cooldown = Cooldown::with_window(2, Duration::from_secs(60));
        cooldown.record_load_failure("m");
        cooldown.record_load_success("m");
        assert!(!cooldown.record_load_failure("m"));
        assert_eq!(cooldown.health("m").consecutive_load_failures, 1);
    }

    #[test]
    fn test_window_expires() {
        let cooldown = Cooldown::with_window(1, Duration::from_millis(30));
        assert!(cooldown.record_load_failure("m"));
        assert!(cooldown.is_cooling("m"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!cooldown.is_cooling("m"));
        assert_eq!(cooldown.health("m").consecutive_load_failures, 0);
    }

    #[test]
    fn test_stale_streak_lapses() {
        let cooldown = Cooldown::with_window(2, Duration::from_millis(30));
        assert!(!cooldown.record_load_failure("m"));
        assert_eq!(cooldown.health("m").consecutive_load_failures, 1);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cooldown.health("m").consecutive_load_failures, 0);
        assert!(!cooldown.record_load_failure("m"));
        assert!(!cooldown.is_cooling("m"));

        // Back-to-back failures inside the window still trip
        assert!(cooldown.record_load_failure("m"));
        assert!(cooldown.is_cooling("m"));
    }

    #[test]
    fn test_generation_failures_do_not_bench() {
        let cooldown = Cooldown::with_window(1, Duration::from_secs(60));
        for _ in 0..5 {
            cooldown.record_generation_error("m");
        }
        cooldown.record_timeout("m");

        let health = cooldown.health("m");
        assert_eq!(health.generation_errors, 5);
        assert_eq!(health.timeouts, 1);
        assert!(health.cooldown_remaining.is_none());
    }
}
