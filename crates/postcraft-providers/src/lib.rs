//! LLM provider layer for Postcraft.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait that all providers implement
//! - [`registry`]: static specs for the built-in providers + the client table
//! - [`http_provider::HttpProvider`]: generic OpenAI-compatible HTTP client
//! - [`rate_limit::RateLimiter`]: per-provider minimum call spacing
//! - [`router::TaskRouter`]: task name → ordered provider chain
//! - [`dispatcher::Dispatcher`]: walks a chain with retries and failover
//! - [`stats::UsageStats`]: success / failure counters

pub mod dispatcher;
pub mod error;
pub mod http_provider;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod stats;
pub mod traits;

// Re-export main types for convenience
pub use dispatcher::{Dispatcher, Generation, RetryPolicy};
pub use error::{AttemptFailure, ConfigError, DispatchError, FailureKind, ProviderError};
pub use http_provider::{create_provider, HttpProvider};
pub use rate_limit::RateLimiter;
pub use registry::{ProviderRegistry, ProviderSpec, PROVIDERS};
pub use router::{TaskAttempt, TaskChain, TaskKind, TaskRouter};
pub use stats::{UsageSnapshot, UsageStats};
pub use traits::{LlmProvider, LlmRequestConfig};
