//! Fixed-window per-IP rate limiting.
//!
//! Four categories with their own budgets: auth (brute-force surface),
//! execute (expensive), mutate, and read. Windows are minute-aligned;
//! a rejected request learns how long until the window rolls over.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LimitCategory {
    Auth,
    Execute,
    Mutate,
    Read,
}

impl LimitCategory {
    /// Requests allowed per source IP per minute.
    #[must_use]
    pub fn per_minute(&self) -> u32 {
        match self {
            LimitCategory::Auth => 5,
            LimitCategory::Execute => 10,
            LimitCategory::Mutate => 60,
            LimitCategory::Read => 120,
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<FxHashMap<(IpAddr, LimitCategory), (u64, u32)>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request. `Err(retry_after_seconds)` when the caller has
    /// exhausted this minute's budget.
    pub fn check(&self, category: LimitCategory, ip: IpAddr) -> Result<(), u64> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let window = now / 60;

        let mut windows = self.windows.lock();
        let entry = windows.entry((ip, category)).or_insert((window, 0));
        if entry.0 != window {
            *entry = (window, 0);
        }
        if entry.1 >= category.per_minute() {
            return Err(60 - (now % 60));
        }
        entry.1 += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn budget_is_enforced_per_category() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(LimitCategory::Auth, ip(1)).is_ok());
        }
        let retry = limiter.check(LimitCategory::Auth, ip(1)).unwrap_err();
        assert!(retry <= 60);
        // Other categories and other IPs are unaffected.
        assert!(limiter.check(LimitCategory::Read, ip(1)).is_ok());
        assert!(limiter.check(LimitCategory::Auth, ip(2)).is_ok());
    }

    #[test]
    fn read_budget_is_wider() {
        let limiter = RateLimiter::new();
        for _ in 0..120 {
            assert!(limiter.check(LimitCategory::Read, ip(3)).is_ok());
        }
        assert!(limiter.check(LimitCategory::Read, ip(3)).is_err());
    }
}
