//! Cache-backed (Redis) token bucket. Grounded on the source system's
//! `redis_ratelimiter.cpp`: a registered server-side script invoked by
//! SHA (`EVALSHA`), with exactly one raw-script (`EVAL`) retry when the
//! server reports the script isn't loaded, and a fail-open policy on any
//! other transport failure, timeout, or unexpected reply.

use crate::error::RelayError;
use parking_lot::Mutex;
use redis::{Client, Connection, RedisError};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

const DEFAULT_REDIS_ADDRESS: &str = "127.0.0.1:6379";
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const SCRIPT_LOAD_TIMEOUT: Duration = Duration::from_millis(1000);
const CHECK_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Refills `tokens` by elapsed time * rate, caps at capacity, decrements
/// one on success. `KEYS[1]` is
/// the bucket key, `ARGV` is `(rate, capacity, now_ms)`.
const DEFAULT_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])

local state = redis.call("HMGET", key, "tokens", "last_refill_ms")
local tokens = tonumber(state[1])
local last_refill_ms = tonumber(state[2])

if tokens == nil then
  tokens = capacity
  last_refill_ms = now_ms
end

local elapsed_ms = now_ms - last_refill_ms
if elapsed_ms < 0 then
  elapsed_ms = 0
end
tokens = math.min(capacity, tokens + (elapsed_ms * rate / 1000))
last_refill_ms = now_ms

local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end

redis.call("HMSET", key, "tokens", tokens, "last_refill_ms", last_refill_ms)
redis.call("EXPIRE", key, 3600)

return allowed
"#;

#[derive(Debug, Deserialize)]
struct RawSharedConfig {
    rate: f64,
    #[serde(default)]
    burst: Option<f64>,
    #[serde(default)]
    bucket_key: Option<String>,
    #[serde(default)]
    script_path: Option<String>,
    #[serde(default)]
    redis_address: Option<String>,
    #[serde(default)]
    redis_password: Option<String>,
}

pub struct SharedRateLimiterConfig {
    pub bucket_key: String,
    pub tokens_per_second: f64,
    pub capacity: f64,
    pub script_text: String,
    pub redis_address: String,
    pub redis_password: Option<String>,
}

impl SharedRateLimiterConfig {
    /// `bucket_key` is always the manager-composed `scheduler:window` key —
    /// any `bucket_key` present in `raw` is ignored; the parser
    /// rewrite rule.
    pub fn parse(raw: &str, bucket_key: String) -> Result<Self, RelayError> {
        let raw: RawSharedConfig = serde_json::from_str(raw).map_err(|e| {
            RelayError::config(format!("invalid shared rate limiter config: {}", e))
        })?;

        if bucket_key.is_empty() {
            return Err(RelayError::config("shared rate limiter: bucket_key must not be empty"));
        }
        if raw.rate <= 1e-6 {
            return Err(RelayError::config("shared rate limiter: rate must be > 0"));
        }

        let capacity = raw.burst.unwrap_or(0.0).max(raw.rate);

        let script_text = match &raw.script_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                RelayError::config(format!("reading script_path {}: {}", path, e))
            })?,
            None => DEFAULT_SCRIPT.to_string(),
        };

        Ok(Self {
            bucket_key,
            tokens_per_second: raw.rate,
            capacity,
            script_text,
            redis_address: raw
                .redis_address
                .unwrap_or_else(|| DEFAULT_REDIS_ADDRESS.to_string()),
            redis_password: raw.redis_password.filter(|p| !p.is_empty()),
        })
    }
}

struct Connected {
    conn: Mutex<Connection>,
    sha: String,
    config: SharedRateLimiterConfig,
    fail_open_count: AtomicU64,
}

/// `None` until a window's YAML supplies `rate_limiter_config` — like the
/// local limiter, an unconfigured shared limiter fails open rather than
/// attempting a connection.
pub struct SharedRateLimiter {
    connected: Option<Connected>,
}

impl SharedRateLimiter {
    /// Count of `allowed()` calls that fell back to fail-open because of a
    /// transport failure, timeout, or unexpected reply — zero for an
    /// uninitialized limiter, which never attempts a call at all.
    pub fn fail_open_count(&self) -> u64 {
        self.connected
            .as_ref()
            .map(|c| c.fail_open_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn uninitialized() -> Self {
        Self { connected: None }
    }

    pub fn from_config(config: SharedRateLimiterConfig) -> Result<Self, RelayError> {
        let url = format!("redis://{}", config.redis_address);
        let client = Client::open(url)
            .map_err(|e| RelayError::dependency_init(format!("redis client: {}", e)))?;

        let mut conn = connect_with_retry(&client)?;

        if let Some(password) = &config.redis_password {
            redis::cmd("AUTH")
                .arg(password)
                .query::<()>(&mut conn)
                .map_err(|e| RelayError::dependency_init(format!("redis auth: {}", e)))?;
        }

        conn.set_read_timeout(Some(SCRIPT_LOAD_TIMEOUT))
            .map_err(|e| RelayError::dependency_init(format!("redis set timeout: {}", e)))?;

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(&config.script_text)
            .query(&mut conn)
            .map_err(|e| RelayError::dependency_init(format!("redis script load: {}", e)))?;

        conn.set_read_timeout(Some(CHECK_TIMEOUT))
            .map_err(|e| RelayError::dependency_init(format!("redis set timeout: {}", e)))?;

        Ok(Self {
            connected: Some(Connected {
                conn: Mutex::new(conn),
                sha,
                config,
                fail_open_count: AtomicU64::new(0),
            }),
        })
    }
}

fn connect_with_retry(client: &Client) -> Result<Connection, RelayError> {
    let mut last_err = None;
    for _ in 0..MAX_CONNECT_ATTEMPTS {
        match client.get_connection_with_timeout(CONNECT_TIMEOUT) {
            Ok(conn) => return Ok(conn),
            Err(e) => last_err = Some(e),
        }
    }
    Err(RelayError::dependency_init(format!(
        "redis connect failed after {} attempts: {}",
        MAX_CONNECT_ATTEMPTS,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn is_noscript(e: &RedisError) -> bool {
    e.code() == Some("NOSCRIPT")
}

impl super::RateLimiter for SharedRateLimiter {
    fn allowed(&self) -> bool {
        let Some(connected) = &self.connected else {
            return true;
        };

        let now_ms = now_millis();
        let cfg = &connected.config;
        let mut conn = connected.conn.lock();

        let evalsha_result: Result<i64, RedisError> = redis::cmd("EVALSHA")
            .arg(&connected.sha)
            .arg(1)
            .arg(&cfg.bucket_key)
            .arg(cfg.tokens_per_second)
            .arg(cfg.capacity)
            .arg(now_ms)
            .query(&mut conn);

        match evalsha_result {
            Ok(v) => v != 0,
            Err(e) if is_noscript(&e) => {
                warn!(bucket_key = %cfg.bucket_key, error = %e, "shared rate limiter: script not loaded, retrying once with raw script");
                let eval_result: Result<i64, RedisError> = redis::cmd("EVAL")
                    .arg(&cfg.script_text)
                    .arg(1)
                    .arg(&cfg.bucket_key)
                    .arg(cfg.tokens_per_second)
                    .arg(cfg.capacity)
                    .arg(now_ms)
                    .query(&mut conn);
                // Fail open on any failure of this raw-script retry too —
                // NOSCRIPT gets exactly one retry, never a loop.
                eval_result.map(|v| v != 0).unwrap_or_else(|e| {
                    connected.fail_open_count.fetch_add(1, Ordering::Relaxed);
                    error!(bucket_key = %cfg.bucket_key, error = %e, "shared rate limiter: raw-script retry failed, failing open");
                    true
                })
            }
            // Any other transport failure, timeout, or reply-type mismatch
            // fails open; the limiter is advisory, not a hard cap.
            Err(e) => {
                connected.fail_open_count.fetch_add(1, Ordering::Relaxed);
                error!(bucket_key = %cfg.bucket_key, error = %e, "shared rate limiter: call failed, failing open");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_fails_open() {
        let limiter = SharedRateLimiter::uninitialized();
        assert!(crate::ratelimit::RateLimiter::allowed(&limiter));
    }

    #[test]
    fn uninitialized_never_counts_a_fail_open() {
        let limiter = SharedRateLimiter::uninitialized();
        crate::ratelimit::RateLimiter::allowed(&limiter);
        assert_eq!(limiter.fail_open_count(), 0);
    }

    #[test]
    fn rejects_empty_bucket_key() {
        assert!(SharedRateLimiterConfig::parse(r#"{"rate": 5}"#, String::new()).is_err());
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(SharedRateLimiterConfig::parse(r#"{"rate": 0}"#, "k".to_string()).is_err());
    }

    #[test]
    fn bucket_key_argument_wins_over_json_field() {
        let cfg = SharedRateLimiterConfig::parse(
            r#"{"rate": 5, "bucket_key": "ignored"}"#,
            "scheduler:window".to_string(),
        )
        .unwrap();
        assert_eq!(cfg.bucket_key, "scheduler:window");
    }

    #[test]
    fn default_redis_address_used_when_absent() {
        let cfg = SharedRateLimiterConfig::parse(r#"{"rate": 5}"#, "k".to_string()).unwrap();
        assert_eq!(cfg.redis_address, DEFAULT_REDIS_ADDRESS);
    }

    #[test]
    fn embeds_default_script_when_no_path_given() {
        let cfg = SharedRateLimiterConfig::parse(r#"{"rate": 5}"#, "k".to_string()).unwrap();
        assert!(cfg.script_text.contains("HMGET"));
    }
}
