//! Rate Limiter (C7)
//!
//! In-process sliding window of failed attempts per key, with a lockout
//! once a threshold is reached. Single-node only, as spec'd — sharing
//! this across nodes requires swapping the `DashMap` for a shared store.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::config::RateLimitConfig;

#[derive(Debug, Clone, Default)]
struct KeyState {
    failures: Vec<Instant>,
    locked_until: Option<Instant>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    keys: DashMap<String, KeyState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, keys: DashMap::new() }
    }

    /// Build the default key: `"<subject>:<source_ip>"`.
    pub fn key(subject: &str, source_ip: &str) -> String {
        format!("{subject}:{source_ip}")
    }

    /// Seconds remaining in an active lockout, or `None` if the key is
    /// clear to proceed.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let entry = self.keys.get(key)?;
        remaining_lockout(&entry, now)
    }

    /// Record a failed attempt. Prunes entries older than the window;
    /// if the failure count reaches `max_attempts`, opens a lockout,
    /// clears the failure list, and returns the lockout duration.
    pub fn hit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);
        let mut entry = self.keys.entry(key.to_string()).or_default();

        entry.failures.retain(|t| now.duration_since(*t) < window);
        entry.failures.push(now);

        if entry.failures.len() as u32 >= self.config.max_attempts {
            let block = Duration::from_secs(self.config.block_secs);
            entry.locked_until = Some(now + block);
            entry.failures.clear();
            return Some(block.as_secs());
        }
        None
    }

    /// Clear failures and lockout for `key` — called on successful auth.
    pub fn reset(&self, key: &str) {
        self.keys.remove(key);
    }

    /// Maintenance hook: clear every tracked key (tests, admin tooling).
    pub fn reset_all(&self) {
        self.keys.clear();
    }
}

fn remaining_lockout(entry: &KeyState, now: Instant) -> Option<u64> {
    let locked_until = entry.locked_until?;
    if locked_until > now {
        Some((locked_until - now).as_secs().max(1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig { max_attempts: 3, window_secs: 60, block_secs: 300 })
    }

    #[test]
    fn unlocked_key_reports_no_lockout() {
        let rl = limiter();
        assert_eq!(rl.check("user:1.2.3.4"), None);
    }

    #[test]
    fn reaching_max_attempts_locks_the_key() {
        let rl = limiter();
        let key = "user@example.com:1.2.3.4";
        assert_eq!(rl.hit(key), None);
        assert_eq!(rl.hit(key), None);
        let locked = rl.hit(key);
        assert_eq!(locked, Some(300));
        assert!(rl.check(key).is_some());
    }

    #[test]
    fn reset_clears_failures_and_lockout() {
        let rl = limiter();
        let key = "user@example.com:1.2.3.4";
        rl.hit(key);
        rl.hit(key);
        rl.hit(key);
        assert!(rl.check(key).is_some());
        rl.reset(key);
        assert_eq!(rl.check(key), None);
    }

    #[test]
    fn reset_all_clears_every_key() {
        let rl = limiter();
        rl.hit("a");
        rl.hit("b");
        rl.reset_all();
        assert_eq!(rl.check("a"), None);
        assert_eq!(rl.check("b"), None);
    }

    #[test]
    fn default_key_format_matches_subject_colon_source() {
        assert_eq!(RateLimiter::key("user@example.com", "1.2.3.4"), "user@example.com:1.2.3.4");
    }
}
