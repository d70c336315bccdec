//! Failover dispatch: walks a task's provider chain with throttling and retries.
//!
//! For each chain entry the dispatcher resolves the client, then drives one
//! attempt through `NotStarted → Throttling → InFlight`, ending in `Succeeded`,
//! `Abandoned`, or `RetryPending → Throttling`. The first success wins; if every
//! entry is abandoned the caller gets a single aggregated `TaskFailed`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use postcraft_core::config::schema::RateLimitConfig;
use postcraft_core::config::Config;

use crate::error::{AttemptFailure, ConfigError, DispatchError, FailureKind, ProviderError};
use crate::rate_limit::RateLimiter;
use crate::registry::ProviderRegistry;
use crate::router::{TaskAttempt, TaskRouter};
use crate::stats::UsageStats;
use crate::traits::LlmProvider;

// ─────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────

/// How many calls one chain entry gets, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls per chain entry before it is abandoned.
    pub max_retries: u32,
    /// Rate-limit backoff is `rate_limit_base * attempt`.
    pub rate_limit_base: Duration,
    /// Backoff for other retryable failures is `transient_base * attempt`.
    pub transient_base: Duration,
    /// Longest wait a `Retry-After` hint can ask for.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_base: Duration::from_secs(10),
            transient_base: Duration::from_secs(5),
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limit_base: Duration::from_secs(config.rate_limit_delay_seconds),
            transient_base: Duration::from_secs(config.retry_delay_seconds),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    /// Delay before retrying after `error` on the 1-based `attempt`.
    ///
    /// A `Retry-After` hint can lengthen the rate-limit delay but never shorten it,
    /// and counts for at most `max_retry_after`.
    pub fn backoff(&self, error: &ProviderError, attempt: u32) -> Duration {
        match error.kind() {
            FailureKind::RateLimited => {
                let scheduled = self.rate_limit_base * attempt;
                error
                    .retry_after()
                    .map_or(scheduled, |hint| scheduled.max(hint.min(self.max_retry_after)))
            }
            _ => self.transient_base * attempt,
        }
    }

    fn calls_per_entry(&self) -> u32 {
        self.max_retries.max(1)
    }
}

// ─────────────────────────────────────────────
// Attempt state machine
// ─────────────────────────────────────────────

/// Lifecycle of one chain entry.
#[derive(Debug)]
enum AttemptState {
    NotStarted,
    Throttling,
    InFlight,
    RetryPending { delay: Duration },
    Succeeded(String),
    Abandoned(ProviderError),
}

/// Result of driving one chain entry to a terminal state.
struct AttemptOutcome {
    tries: u32,
    result: Result<String, ProviderError>,
}

/// Text produced by a successful dispatch, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    pub model: String,
    /// Provider calls made across the whole chain, including the successful one.
    pub attempts: u32,
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Routes task requests to providers with failover.
///
/// Cheap to share behind an `Arc`; concurrent calls coordinate only through
/// the rate limiter and the usage counters.
#[derive(Debug)]
pub struct Dispatcher {
    router: TaskRouter,
    registry: ProviderRegistry,
    limiter: Arc<RateLimiter>,
    stats: Arc<UsageStats>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        router: TaskRouter,
        registry: ProviderRegistry,
        limiter: Arc<RateLimiter>,
        stats: Arc<UsageStats>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            router,
            registry,
            limiter,
            stats,
            policy,
        }
    }

    /// Build everything from a loaded config: one client per usable provider,
    /// per-provider intervals, chains, and the retry policy.
    pub fn from_config(config: &Config) -> Self {
        let registry = ProviderRegistry::from_configs(&config.providers.to_map());
        let limiter = RateLimiter::from_config(&config.rate_limit, config.providers.names());

        Self::new(
            TaskRouter::from_config(&config.tasks),
            registry,
            Arc::new(limiter),
            Arc::new(UsageStats::new()),
            RetryPolicy::from_config(&config.rate_limit),
        )
    }

    pub fn stats(&self) -> &Arc<UsageStats> {
        &self.stats
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `task` and return only the generated text.
    pub async fn run(
        &self,
        task: &str,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, DispatchError> {
        self.generate(task, system_prompt, user_content)
            .await
            .map(|generation| generation.text)
    }

    /// Run `task` through its chain.
    ///
    /// # Errors
    /// - `Config` for an unknown task, an empty chain, or a chain whose every
    ///   entry was skipped. No provider is called in these cases.
    /// - `EmptyInput` when `user_content` is blank, also before any call.
    /// - `TaskFailed` when every reachable entry was abandoned; lists each
    ///   entry's terminal failure in chain order.
    pub async fn generate(
        &self,
        task: &str,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<Generation, DispatchError> {
        let chain = self.router.chain_for(task)?;
        if chain.is_empty() {
            return Err(ConfigError::EmptyChain(task.to_string()).into());
        }
        if user_content.trim().is_empty() {
            return Err(DispatchError::EmptyInput(task.to_string()));
        }

        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut total_calls = 0;

        for entry in &chain.attempts {
            let provider = match self.registry.resolve(&entry.provider) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(
                        task,
                        provider = %entry.provider,
                        rank = entry.rank,
                        reason = %e,
                        "Skipping chain entry"
                    );
                    continue;
                }
            };

            let outcome = self
                .drive_attempt(task, entry, provider.as_ref(), system_prompt, user_content)
                .await;
            total_calls += outcome.tries;

            match outcome.result {
                Ok(text) => {
                    self.stats.record_success(&entry.provider);
                    info!(
                        task,
                        provider = %entry.provider,
                        model = %entry.model,
                        rank = entry.rank,
                        calls = total_calls,
                        "Task succeeded"
                    );
                    return Ok(Generation {
                        text,
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        attempts: total_calls,
                    });
                }
                Err(error) => {
                    self.stats.record_abandoned(&entry.provider);
                    warn!(
                        task,
                        provider = %entry.provider,
                        model = %entry.model,
                        kind = %error.kind(),
                        tries = outcome.tries,
                        "Abandoning provider"
                    );
                    failures.push(AttemptFailure {
                        provider: entry.provider.clone(),
                        model: entry.model.clone(),
                        tries: outcome.tries,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            return Err(ConfigError::NoReachableProvider(task.to_string()).into());
        }

        self.stats.record_failure();
        Err(DispatchError::TaskFailed {
            task: task.to_string(),
            attempts: failures,
        })
    }

    async fn drive_attempt(
        &self,
        task: &str,
        entry: &TaskAttempt,
        provider: &dyn LlmProvider,
        system_prompt: &str,
        user_content: &str,
    ) -> AttemptOutcome {
        let max_calls = self.policy.calls_per_entry();
        let mut tries = 0;
        let mut state = AttemptState::NotStarted;

        loop {
            state = match state {
                AttemptState::NotStarted => AttemptState::Throttling,
                AttemptState::Throttling => {
                    self.limiter.throttle(&entry.provider).await;
                    AttemptState::InFlight
                }
                AttemptState::InFlight => {
                    tries += 1;
                    debug!(
                        task,
                        provider = %entry.provider,
                        model = %entry.model,
                        attempt = tries,
                        "Calling provider"
                    );
                    match provider
                        .generate(system_prompt, user_content, &entry.model)
                        .await
                    {
                        Ok(text) => AttemptState::Succeeded(text),
                        Err(error) if !error.is_retryable() || tries >= max_calls => {
                            AttemptState::Abandoned(error)
                        }
                        Err(error) => {
                            let delay = self.policy.backoff(&error, tries);
                            warn!(
                                task,
                                provider = %entry.provider,
                                attempt = tries,
                                kind = %error.kind(),
                                delay_secs = delay.as_secs_f64(),
                                error = %error,
                                "Retryable failure, backing off"
                            );
                            AttemptState::RetryPending { delay }
                        }
                    }
                }
                AttemptState::RetryPending { delay } => {
                    tokio::time::sleep(delay).await;
                    AttemptState::Throttling
                }
                AttemptState::Succeeded(text) => {
                    return AttemptOutcome {
                        tries,
                        result: Ok(text),
                    }
                }
                AttemptState::Abandoned(error) => {
                    return AttemptOutcome {
                        tries,
                        result: Err(error),
                    }
                }
            };
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
