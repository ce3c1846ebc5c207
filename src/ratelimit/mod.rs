pub mod local;
pub mod shared;

use crate::error::RelayError;
use crate::registry::Registry;
use std::sync::Arc;

/// Mirrors the source system's `IRateLimiter`: `init` is folded into
/// construction (each factory call in the registry returns an
/// already-default-initialized limiter; `with_config` applies the parsed
/// JSON). `allowed` is the hot-path check workers call once per iteration.
pub trait RateLimiter: Send + Sync {
    fn allowed(&self) -> bool;
}

pub type RateLimiterFactory = Arc<dyn Fn() -> Arc<dyn RateLimiter> + Send + Sync>;

/// Build the Extension Registry entries for the two rate-limiter types this
/// crate ships. Populated once in `main`, before any config is parsed.
pub fn default_registry() -> Registry<Arc<dyn RateLimiter>> {
    let mut registry: Registry<Arc<dyn RateLimiter>> = Registry::new();
    registry.register("local", || {
        Arc::new(local::LocalRateLimiter::uninitialized()) as Arc<dyn RateLimiter>
    });
    registry.register("shared", || {
        Arc::new(shared::SharedRateLimiter::uninitialized()) as Arc<dyn RateLimiter>
    });
    registry
}

/// Construct and initialize a rate limiter for one time window. `scheduler_name`
/// and `window_id` are used only by the shared variant, which rewrites
/// `bucket_key` to `scheduler_name:window_id` regardless of what the file
/// said, per the parser's bucket-key composition rule.
pub fn build_for_window(
    registry: &Registry<Arc<dyn RateLimiter>>,
    limiter_type: &str,
    raw_config: Option<&str>,
    scheduler_name: &str,
    window_id: &str,
) -> Result<Arc<dyn RateLimiter>, RelayError> {
    let limiter = registry.create(limiter_type)?;
    let Some(raw) = raw_config else {
        // No config supplied at all: leave the fail-open uninitialized
        // limiter as-is (uninitialized limiters fail open).
        return Ok(limiter);
    };

    match limiter_type {
        "local" => {
            let parsed = local::LocalRateLimiterConfig::parse(raw)?;
            Ok(Arc::new(local::LocalRateLimiter::from_config(parsed)))
        }
        "shared" => {
            let bucket_key = format!("{}:{}", scheduler_name, window_id);
            let parsed = shared::SharedRateLimiterConfig::parse(raw, bucket_key)?;
            Ok(Arc::new(shared::SharedRateLimiter::from_config(parsed)?))
        }
        other => Err(RelayError::config(format!(
            "unknown rate_limiter_type '{}'",
            other
        ))),
    }
}
