//! In-process token bucket. Grounded on the source system's
//! `local_ratelimiter.cpp`: refill-then-consume-one under a single mutex,
//! `burst` silently promoted up to `rate` if smaller, fail-open when no
//! config was ever applied.

use crate::error::RelayError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Deserialize)]
struct RawLocalConfig {
    rate: f64,
    #[serde(default)]
    burst: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct LocalRateLimiterConfig {
    pub tokens_per_second: f64,
    pub capacity: f64,
}

impl LocalRateLimiterConfig {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let raw: RawLocalConfig = serde_json::from_str(raw)
            .map_err(|e| RelayError::config(format!("invalid local rate limiter config: {}", e)))?;

        if raw.rate <= 1e-6 {
            return Err(RelayError::config("local rate limiter: rate must be > 0"));
        }

        let burst = raw.burst.unwrap_or(0.0);
        let capacity = burst.max(raw.rate);

        Ok(Self {
            tokens_per_second: raw.rate,
            capacity,
        })
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// `None` until a window's YAML supplies `rate_limiter_config` — an
/// uninitialized limiter always returns `true` (fail-open).
pub struct LocalRateLimiter {
    config: Option<LocalRateLimiterConfig>,
    bucket: Mutex<Bucket>,
}

impl LocalRateLimiter {
    pub fn uninitialized() -> Self {
        Self {
            config: None,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: LocalRateLimiterConfig) -> Self {
        Self {
            config: Some(config),
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl super::RateLimiter for LocalRateLimiter {
    fn allowed(&self) -> bool {
        let Some(config) = self.config else {
            return true;
        };

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * config.tokens_per_second).min(config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimiter;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn uninitialized_fails_open() {
        let limiter = LocalRateLimiter::uninitialized();
        for _ in 0..1000 {
            assert!(limiter.allowed());
        }
    }

    #[test]
    fn burst_smaller_than_rate_is_promoted() {
        let cfg = LocalRateLimiterConfig::parse(r#"{"rate": 10, "burst": 2}"#).unwrap();
        assert_eq!(cfg.capacity, 10.0);
    }

    #[test]
    fn burst_larger_than_rate_is_kept() {
        let cfg = LocalRateLimiterConfig::parse(r#"{"rate": 5, "burst": 20}"#).unwrap();
        assert_eq!(cfg.capacity, 20.0);
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(LocalRateLimiterConfig::parse(r#"{"rate": 0}"#).is_err());
        assert!(LocalRateLimiterConfig::parse(r#"{"rate": -1}"#).is_err());
    }

    #[test]
    fn admits_up_to_capacity_then_blocks() {
        let cfg = LocalRateLimiterConfig::parse(r#"{"rate": 1000, "burst": 3}"#).unwrap();
        let limiter = LocalRateLimiter::from_config(cfg);
        assert!(limiter.allowed());
        assert!(limiter.allowed());
        assert!(limiter.allowed());
        // Capacity exhausted; refill at 1000/s is negligible over a few
        // nanoseconds, so the 4th call should be denied.
        assert!(!limiter.allowed());
    }

    #[test]
    fn refills_over_time() {
        let cfg = LocalRateLimiterConfig::parse(r#"{"rate": 100, "burst": 1}"#).unwrap();
        let limiter = LocalRateLimiter::from_config(cfg);
        assert!(limiter.allowed());
        assert!(!limiter.allowed());
        sleep(Duration::from_millis(20));
        assert!(limiter.allowed());
    }
}
