//! Per-provider minimum-interval rate limiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use postcraft_core::config::schema::RateLimitConfig;

use crate::registry::spec_for;

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Enforces a minimum interval between call starts to the same provider.
///
/// Each provider has its own slot. Callers for the same provider queue on the
/// slot's async mutex, so two concurrent callers can never both see a stale
/// timestamp; callers for different providers never wait on each other.
#[derive(Debug)]
pub struct RateLimiter {
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    /// Limiter with one interval for every provider.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Set the interval for one provider.
    pub fn with_interval(mut self, provider: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(provider.into(), interval);
        self
    }

    /// Build from config for the given provider names.
    ///
    /// Precedence per provider: `rateLimit.intervals.<name>`, then the
    /// provider's built-in interval, then `rateLimit.defaultIntervalSecs`.
    /// Out-of-range values are ignored with a warning.
    pub fn from_config<I, S>(config: &RateLimitConfig, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let default_interval = RateLimitConfig::interval_from_secs(config.default_interval_secs)
            .unwrap_or_else(|| {
                warn!(
                    value = config.default_interval_secs,
                    "Ignoring out-of-range default interval"
                );
                Duration::from_secs(2)
            });

        let mut limiter = Self::new(default_interval);
        for name in providers {
            let name = name.as_ref();
            let configured = config.intervals.get(name).copied().and_then(|secs| {
                let interval = RateLimitConfig::interval_from_secs(secs);
                if interval.is_none() {
                    warn!(provider = name, value = secs, "Ignoring out-of-range interval");
                }
                interval
            });
            let builtin = spec_for(name)
                .default_interval_secs
                .and_then(RateLimitConfig::interval_from_secs);
            if let Some(interval) = configured.or(builtin) {
                limiter = limiter.with_interval(name, interval);
            }
        }
        limiter
    }

    /// Minimum interval between call starts for `provider`.
    pub fn interval(&self, provider: &str) -> Duration {
        self.intervals
            .get(provider)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Wait until `provider` may be called again, then record the call start.
    ///
    /// Returns how long the caller was held back.
    pub async fn throttle(&self, provider: &str) -> Duration {
        let slot = self.slot(provider);
        let started = Instant::now();

        let mut last_call = slot.lock().await;
        if let Some(prev) = *last_call {
            let ready_at = prev + self.interval(provider);
            if Instant::now() < ready_at {
                debug!(
                    provider,
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Rate limit wait"
                );
                sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());

        started.elapsed()
    }

    fn slot(&self, provider: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(provider.to_string()).or_default())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_from_config() {
        let mut config = RateLimitConfig::default();
        config.intervals.insert("moonshot".into(), 3.5);
        let limiter = RateLimiter::from_config(&config, ["openrouter", "moonshot", "novita"]);

        assert_eq!(limiter.interval("openrouter"), Duration::from_secs(4));
        assert_eq!(limiter.interval("moonshot"), Duration::from_millis(3500));
        assert_eq!(limiter.interval("novita"), Duration::from_secs(2));
        assert_eq!(limiter.interval("never-seen"), Duration::from_secs(2));
    }

    #[test]
    fn test_configured_interval_beats_builtin() {
        let mut config = RateLimitConfig::default();
        config.intervals.insert("openrouter".into(), 1.0);
        let limiter = RateLimiter::from_config(&config, ["openrouter"]);
        assert_eq!(limiter.interval("openrouter"), Duration::from_secs(1));
    }

    #[test]
    fn test_out_of_range_intervals_fall_back() {
        let mut config = RateLimitConfig {
            default_interval_secs: 1e30,
            ..Default::default()
        };
        config.intervals.insert("moonshot".into(), 1e30);
        config.intervals.insert("openrouter".into(), f64::NAN);
        config.intervals.insert("novita".into(), -3.0);
        let limiter = RateLimiter::from_config(&config, ["moonshot", "openrouter", "novita"]);

        assert_eq!(limiter.interval("moonshot"), Duration::from_secs(2));
        // A bad override keeps the built-in interval.
        assert_eq!(limiter.interval("openrouter"), Duration::from_secs(4));
        assert_eq!(limiter.interval("novita"), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.throttle("novita").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::default().with_interval("openrouter", Duration::from_secs(4));

        let t0 = Instant::now();
        limiter.throttle("openrouter").await;
        limiter.throttle("openrouter").await;
        assert!(t0.elapsed() >= Duration::from_secs(4));

        // Other providers keep their own clock.
        let t1 = Instant::now();
        limiter.throttle("moonshot").await;
        assert_eq!(t1.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let limiter = RateLimiter::default();
        limiter.throttle("siliconflow").await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(limiter.throttle("siliconflow").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_serialize() {
        let limiter = Arc::new(RateLimiter::default());
        let t0 = Instant::now();

        let first = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.throttle("moonshot").await;
                Instant::now()
            })
        };
        let second = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                limiter.throttle("moonshot").await;
                Instant::now()
            })
        };

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert_eq!(a - t0, Duration::ZERO);
        assert!(b - a >= Duration::from_millis(1900));
        assert!(b - t0 >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_concurrent_callers_keep_interval() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.throttle("novita").await;
                    Instant::now()
                })
            })
            .collect();

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap());
        }
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }
}
