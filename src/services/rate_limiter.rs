use crate::log_warn;
use crate::services::config_service::Settings;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sliding-window attempt counter keyed by client (e.g. remote address).
///
/// Constructed once and shared by `Arc`; every call prunes attempts that
/// fell out of the window before answering.
#[derive(Debug)]
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.login_max_attempts, settings.login_window())
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `(limited, remaining_attempts)` without recording anything.
    pub fn is_rate_limited(&self, key: &str) -> (bool, usize) {
        self.is_rate_limited_at(key, Instant::now())
    }

    /// Records one attempt unless the limit is already reached. Returns
    /// `(true, 0)` for a refused attempt, otherwise `(false, remaining)`.
    pub fn record_attempt(&self, key: &str) -> (bool, usize) {
        self.record_attempt_at(key, Instant::now())
    }

    /// Forget every attempt of `key`, e.g. after a successful login.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Time until the oldest recorded attempt leaves the window; zero when
    /// nothing is recorded.
    pub fn retry_after(&self, key: &str) -> Duration {
        self.retry_after_at(key, Instant::now())
    }

    pub(crate) fn is_rate_limited_at(&self, key: &str, now: Instant) -> (bool, usize) {
        let mut attempts = self.lock();
        let count = self.prune(&mut attempts, key, now);
        self.state(count)
    }

    pub(crate) fn record_attempt_at(&self, key: &str, now: Instant) -> (bool, usize) {
        let mut attempts = self.lock();
        if self.prune(&mut attempts, key, now) >= self.max_attempts {
            log_warn!(key = key, "Attempt refused, limit already reached");
            return (true, 0);
        }

        let entry = attempts.entry(key.to_string()).or_default();
        entry.push(now);
        (false, self.max_attempts.saturating_sub(entry.len()))
    }

    pub(crate) fn retry_after_at(&self, key: &str, now: Instant) -> Duration {
        let mut attempts = self.lock();
        self.prune(&mut attempts, key, now);

        attempts
            .get(key)
            .and_then(|times| times.iter().min())
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Drops expired attempts of `key` and returns how many remain.
    fn prune(&self, attempts: &mut HashMap<String, Vec<Instant>>, key: &str, now: Instant) -> usize {
        let Some(entry) = attempts.get_mut(key) else {
            return 0;
        };
        entry.retain(|&time| now.saturating_duration_since(time) < self.window);
        let count = entry.len();
        if count == 0 {
            attempts.remove(key);
        }
        count
    }

    fn state(&self, count: usize) -> (bool, usize) {
        (
            count >= self.max_attempts,
            self.max_attempts.saturating_sub(count),
        )
    }

    // A poisoned map only ever holds timestamps, so keep using it
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
