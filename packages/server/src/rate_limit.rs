//! Per-client sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How often idle clients are dropped from the table.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct Clients {
    requests: HashMap<String, VecDeque<Instant>>,
    last_cleanup: Instant,
}

/// Allows at most `limit` requests per client in any window of `window`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clients: Mutex<Clients>,
}

impl RateLimiter {
    /// A limiter with a one-minute window. A `limit` of 0 allows
    /// everything.
    #[must_use]
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(Clients {
                requests: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Records a request from `client` and reports whether it is allowed.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    /// [`Self::check`] at an explicit instant.
    pub fn check_at(&self, client: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(clients.last_cleanup) > CLEANUP_INTERVAL {
            let window = self.window;
            let before = clients.requests.len();
            clients.requests.retain(|_, history| {
                expire(history, now, window);
                !history.is_empty()
            });
            let removed = before - clients.requests.len();
            if removed > 0 {
                log::debug!("Dropped {removed} idle rate limit entries");
            }
            clients.last_cleanup = now;
        }

        let history = clients.requests.entry(client.to_string()).or_default();
        expire(history, now, self.window);
        if history.len() < self.limit {
            history.push_back(now);
            true
        } else {
            log::warn!("Rate limit exceeded for client {client}");
            false
        }
    }

    /// Requests `client` may still make in the current window.
    #[must_use]
    pub fn remaining(&self, client: &str) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.requests.get_mut(client).map_or(self.limit, |history| {
            expire(history, now, self.window);
            self.limit.saturating_sub(history.len())
        })
    }
}

fn expire(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while history
        .front()
        .is_some_and(|&at| now.saturating_duration_since(at) >= window)
    {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..3 {
            assert!(limiter.check_at("a", start), "request {i} should pass");
        }
        assert!(!limiter.check_at("a", start + Duration::from_secs(1)));
        assert!(limiter.check_at("b", start), "clients are independent");
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("a", start));
        assert!(limiter.check_at("a", start + Duration::from_secs(30)));
        assert!(!limiter.check_at("a", start + Duration::from_secs(59)));
        assert!(limiter.check_at("a", start + Duration::from_secs(60)));
        assert!(!limiter.check_at("a", start + Duration::from_secs(61)));
    }

    #[test]
    fn zero_limit_disables() {
        let limiter = RateLimiter::per_minute(0);
        for _ in 0..100 {
            assert!(limiter.check("a"));
        }
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::per_minute(5);
        assert_eq!(limiter.remaining("a"), 5);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert_eq!(limiter.remaining("a"), 3);
    }
}
