//! Process-wide usage counters.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    successes: BTreeMap<String, u64>,
    abandoned: BTreeMap<String, u64>,
    failed: u64,
}

/// Success counts per provider plus task-level failures.
///
/// Shared by reference (`Arc<UsageStats>`); every method takes `&self`.
#[derive(Debug, Default)]
pub struct UsageStats {
    inner: Mutex<Counters>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Successful calls per provider.
    pub successes: BTreeMap<String, u64>,
    /// Chain entries given up on, per provider.
    pub abandoned: BTreeMap<String, u64>,
    /// Tasks that failed on every provider.
    pub failed: u64,
}

impl UsageSnapshot {
    pub fn success_count(&self, provider: &str) -> u64 {
        self.successes.get(provider).copied().unwrap_or(0)
    }

    pub fn total_successes(&self) -> u64 {
        self.successes.values().sum()
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str) {
        *self.lock().successes.entry(provider.to_string()).or_default() += 1;
    }

    /// A chain entry was abandoned (fatal error or retries exhausted).
    pub fn record_abandoned(&self, provider: &str) {
        *self.lock().abandoned.entry(provider.to_string()).or_default() += 1;
    }

    /// A whole task failed.
    pub fn record_failure(&self) {
        self.lock().failed += 1;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let counters = self.lock();
        UsageSnapshot {
            successes: counters.successes.clone(),
            abandoned: counters.abandoned.clone(),
            failed: counters.failed,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
