use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by caller.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    inner: Arc<Mutex<LimiterState>>,
    window: Duration,
    max_requests: usize,
}

#[derive(Debug, Default)]
struct LimiterState {
    requests: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl LimiterState {
    /// Drops callers with nothing left inside the window, at most once per window.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if self
            .last_sweep
            .is_some_and(|last| now.saturating_duration_since(last) < window)
        {
            return;
        }
        self.requests.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < window)
        });
        self.last_sweep = Some(now);
    }
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState::default())),
            window,
            max_requests,
        }
    }

    /// `Err` carries how long until the oldest request leaves the window.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut guard = self.inner.lock();
        guard.sweep(now, self.window);
        let queue = guard.requests.entry(key.to_string()).or_default();

        while let Some(front) = queue.front() {
            if now.saturating_duration_since(*front) >= self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.max_requests {
            let retry_after = queue
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        queue.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_past_the_limit_until_the_window_slides() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        assert!(limiter.check_at("key", start).is_ok());
        assert!(limiter.check_at("key", start + Duration::from_secs(10)).is_ok());

        let retry = limiter
            .check_at("key", start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(retry, Duration::from_secs(40));
        assert!(limiter.check_at("other", start).is_ok());

        assert!(limiter.check_at("key", start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn idle_callers_are_forgotten() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        for caller in 0..100 {
            assert!(limiter.check_at(&format!("10.0.0.{caller}"), start).is_ok());
        }
        assert_eq!(limiter.inner.lock().requests.len(), 100);

        assert!(limiter
            .check_at("10.0.1.1", start + Duration::from_secs(61))
            .is_ok());
        let state = limiter.inner.lock();
        assert_eq!(state.requests.len(), 1);
        assert!(state.requests.contains_key("10.0.1.1"));
    }
}
