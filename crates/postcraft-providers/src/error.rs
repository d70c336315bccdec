//! Error types for provider calls, routing, and dispatch.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ─────────────────────────────────────────────
// ProviderError: one outbound call
// ─────────────────────────────────────────────

/// Failure of a single call to a provider.
///
/// The dispatcher only cares about [`ProviderError::kind`] and
/// [`ProviderError::is_retryable`]; the variants keep enough detail for logs.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 401/403: the credential was rejected.
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// 429: the provider asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Network error, timeout, or 408.
    #[error("transient error: {0}")]
    Transient(String),

    /// 5xx from the provider.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other 4xx: the request itself was rejected.
    #[error("request rejected ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// 2xx whose body could not be used: unparseable, no choices, or empty content.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Category of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Authentication { .. } => FailureKind::Authentication,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Transient(_) => FailureKind::Transient,
            Self::Server { .. } => FailureKind::ServerError,
            Self::InvalidRequest { .. } => FailureKind::MalformedRequest,
            Self::MalformedResponse(_) => FailureKind::MalformedResponse,
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Retry-After hint sent with a 429, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Coarse failure category used for retry decisions and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Authentication,
    RateLimited,
    Transient,
    ServerError,
    MalformedRequest,
    MalformedResponse,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Transient | Self::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimited => "rate-limited",
            Self::Transient => "transient",
            Self::ServerError => "server-error",
            Self::MalformedRequest => "malformed-request",
            Self::MalformedResponse => "malformed-response",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// ConfigError: routing and registry
// ─────────────────────────────────────────────

/// A configuration problem. Never retried and never touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown task '{0}' (expected one of: title, body, svg)")]
    UnknownTask(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{0}' is disabled")]
    ProviderDisabled(String),

    #[error("provider '{0}' has no API key")]
    MissingApiKey(String),

    #[error("provider '{name}' could not be initialised: {reason}")]
    InvalidProvider { name: String, reason: String },

    #[error("task '{0}' has an empty provider chain")]
    EmptyChain(String),

    #[error("task '{0}' has no reachable provider")]
    NoReachableProvider(String),
}

// ─────────────────────────────────────────────
// DispatchError: what callers of the dispatcher see
// ─────────────────────────────────────────────

/// Terminal reason for one abandoned chain entry.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub provider: String,
    pub model: String,
    /// Number of calls made to this provider before giving up.
    pub tries: u32,
    pub error: ProviderError,
}

impl AttemptFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} [{}] after {} call(s): {}",
            self.provider,
            self.model,
            self.kind(),
            self.tries,
            self.error
        )
    }
}

/// Error returned by [`crate::Dispatcher::run`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The user content was blank; no provider is called for it.
    #[error("task '{0}' was given empty input")]
    EmptyInput(String),

    #[error("task '{task}' failed on every provider: {}", summarize(.attempts))]
    TaskFailed {
        task: String,
        attempts: Vec<AttemptFailure>,
    },
}

impl DispatchError {
    /// Per-attempt failures, in chain order. Empty when no provider was called.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::TaskFailed { attempts, .. } => attempts,
            Self::Config(_) | Self::EmptyInput(_) => &[],
        }
    }
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
