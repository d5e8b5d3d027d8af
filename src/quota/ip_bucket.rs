//! Per-IP request rate limiting via `governor`'s keyed token bucket.

use std::net::IpAddr;
use std::num::NonZeroU32;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;

type Limiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Keyed-by-IP token bucket guarding debate submission at the edge, ahead
/// of any per-user quota check.
pub struct IpRateLimiter {
    limiter: Limiter,
}

impl IpRateLimiter {
    /// `burst` requests refill at `per_minute` per minute.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self { limiter: RateLimiter::keyed(quota) }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_then_throttles() {
        let limiter = IpRateLimiter::new(10, 2);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn ips_are_tracked_independently() {
        let limiter = IpRateLimiter::new(10, 1);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(limiter.check(b));
    }
}
