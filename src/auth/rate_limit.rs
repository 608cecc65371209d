use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bucket shared by every client we cannot identify.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained refill rate, tokens per second.
    pub rate_per_sec: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// Buckets untouched for this long are eligible for eviction.
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 5.0,
            burst: 10,
            idle_ttl: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Per-client token-bucket admission control.
///
/// Owned by the application state; nothing here is global. Bucket creation
/// goes through the map's entry API so concurrent first requests from the same
/// client share one bucket.
#[derive(Debug)]
pub struct RateGovernor {
    buckets: DashMap<String, TokenBucket>,
    config: RateLimitConfig,
}

impl RateGovernor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now())
    }

    pub fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        let capacity = f64::from(self.config.burst);
        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| TokenBucket::full(capacity, now));

        bucket.refill(now, self.config.rate_per_sec, capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops buckets idle for longer than the configured TTL. Returns the
    /// number removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let ttl = self.config.idle_ttl;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) < ttl);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Evicted idle rate-limit buckets");
        }
        removed
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Resolves the rate-limit identity for a request: peer address, then the
/// first `X-Forwarded-For` hop, then `X-Real-IP`, then the shared
/// `"unknown"` bucket.
pub fn client_identity(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
) -> String {
    if let Some(ip) = peer {
        return ip.to_string();
    }

    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    match real_ip.map(str::trim) {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => UNKNOWN_CLIENT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn governor(rate: f64, burst: u32) -> RateGovernor {
        RateGovernor::new(RateLimitConfig {
            rate_per_sec: rate,
            burst,
            idle_ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = governor(100.0, 200);
        let now = Instant::now();

        for _ in 0..200 {
            assert!(limiter.allow_at("10.0.0.1", now));
        }
        assert!(!limiter.allow_at("10.0.0.1", now));
    }

    #[test]
    fn test_partial_refill_is_capped() {
        let limiter = governor(100.0, 200);
        let start = Instant::now();

        for _ in 0..200 {
            assert!(limiter.allow_at("10.0.0.1", start));
        }

        // One second at 100/s buys back 100 tokens, not the full burst.
        let later = start + Duration::from_secs(1);
        for _ in 0..100 {
            assert!(limiter.allow_at("10.0.0.1", later));
        }
        assert!(!limiter.allow_at("10.0.0.1", later));

        // A long pause never refills past capacity.
        let much_later = later + Duration::from_secs(60);
        for _ in 0..200 {
            assert!(limiter.allow_at("10.0.0.1", much_later));
        }
        assert!(!limiter.allow_at("10.0.0.1", much_later));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = governor(1.0, 2);
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_idle_eviction() {
        let limiter = governor(1.0, 5);
        let start = Instant::now();

        limiter.allow_at("stale", start);
        limiter.allow_at("fresh", start + Duration::from_secs(50));

        assert_eq!(limiter.evict_idle_at(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.evict_idle_at(start + Duration::from_secs(200)), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_concurrent_first_sight_shares_bucket() {
        let limiter = Arc::new(governor(0.0001, 50));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.allow_at("same", now)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_identity_resolution() {
        let peer = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)));
        assert_eq!(client_identity(peer, Some("1.1.1.1"), None), "192.168.1.7");
        assert_eq!(client_identity(None, Some(" 203.0.113.9 , 10.0.0.1"), None), "203.0.113.9");
        assert_eq!(client_identity(None, None, Some("198.51.100.4")), "198.51.100.4");
        assert_eq!(client_identity(None, Some(""), Some("")), UNKNOWN_CLIENT);
        assert_eq!(client_identity(None, None, None), UNKNOWN_CLIENT);
    }
}
