//! Configuration schema.
//!
//! Hierarchy: `Config` → `ProvidersConfig`, `TasksConfig`, `RateLimitConfig`,
//! `FilesConfig`, `LoggingConfig`, `BatchConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Names of the logical generation tasks, in processing order.
pub const TASK_NAMES: [&str; 3] = ["svg", "title", "body"];

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub tasks: TasksConfig,
    pub rate_limit: RateLimitConfig,
    pub files: FilesConfig,
    pub logging: LoggingConfig,
    pub batch: BatchConfig,
}

impl Config {
    /// Check the configuration for problems that make tasks degraded or unreachable.
    ///
    /// Returns human-readable issues; an empty list means the config is usable as-is.
    /// Nothing here is fatal on its own: the dispatcher skips unusable chain entries.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let providers = self.providers.to_map();

        let mut names: Vec<&String> = providers.keys().collect();
        names.sort();
        for name in names {
            let provider = &providers[name];
            if provider.enabled && !provider.is_configured() {
                issues.push(format!("provider '{name}' is enabled but has no API key"));
            }
            if provider.timeout_secs == 0 {
                issues.push(format!("provider '{name}' has a zero request timeout"));
            }
            if let Some(t) = provider.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
                issues.push(format!("provider '{name}' has temperature {t} outside 0.0-2.0"));
            }
        }

        let rate = &self.rate_limit;
        if RateLimitConfig::interval_from_secs(rate.default_interval_secs).is_none() {
            issues.push(format!(
                "rateLimit.defaultIntervalSecs {} is outside 0-{MAX_INTERVAL_SECS}s",
                rate.default_interval_secs
            ));
        }
        let mut intervals: Vec<(&String, &f64)> = rate.intervals.iter().collect();
        intervals.sort_by(|a, b| a.0.cmp(b.0));
        for (name, secs) in intervals {
            if RateLimitConfig::interval_from_secs(*secs).is_none() {
                issues.push(format!(
                    "rateLimit.intervals.{name} {secs} is outside 0-{MAX_INTERVAL_SECS}s"
                ));
            }
        }

        for task in TASK_NAMES {
            let Some(task_config) = self.tasks.get(task) else {
                continue;
            };
            if task_config.chain.is_empty() {
                issues.push(format!("task '{task}' has an empty provider chain"));
                continue;
            }

            let mut reachable = 0;
            for entry in &task_config.chain {
                match providers.get(&entry.provider) {
                    None => issues.push(format!(
                        "task '{task}' references unknown provider '{}'",
                        entry.provider
                    )),
                    Some(p) if !p.enabled => issues.push(format!(
                        "task '{task}' references disabled provider '{}'",
                        entry.provider
                    )),
                    Some(_) => reachable += 1,
                }
                if entry.model.trim().is_empty() {
                    issues.push(format!(
                        "task '{task}' has an entry for '{}' without a model",
                        entry.provider
                    ));
                }
            }
            if reachable == 0 {
                issues.push(format!("task '{task}' has no enabled provider in its chain"));
            }
        }

        issues
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Disabled providers are never instantiated; chain entries naming them are skipped.
    pub enabled: bool,
    /// API key for bearer authentication.
    pub api_key: String,
    /// Custom API base URL (overrides the provider's built-in endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Model used when a caller does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
    /// Cap on generated tokens. Unset lets the provider decide.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature. Unset sends 0.7.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            api_base: None,
            timeout_secs: 180,
            model: None,
            extra_headers: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// All provider configurations.
///
/// The five built-in providers have dedicated fields; any other key under
/// `providers` is kept in `custom` and treated as a generic OpenAI-compatible
/// endpoint (it must set `apiBase`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openrouter: ProviderConfig,
    pub gemini: ProviderConfig,
    pub siliconflow: ProviderConfig,
    pub moonshot: ProviderConfig,
    pub novita: ProviderConfig,
    #[serde(flatten)]
    pub custom: BTreeMap<String, ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openrouter: ProviderConfig::default(),
            // The Gemini proxy is opt-in.
            gemini: ProviderConfig::disabled(),
            siliconflow: ProviderConfig::default(),
            moonshot: ProviderConfig::default(),
            novita: ProviderConfig::default(),
            custom: BTreeMap::new(),
        }
    }
}

impl ProvidersConfig {
    /// Get a provider config by name (e.g. `"openrouter"`).
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "openrouter" => Some(&self.openrouter),
            "gemini" => Some(&self.gemini),
            "siliconflow" => Some(&self.siliconflow),
            "moonshot" => Some(&self.moonshot),
            "novita" => Some(&self.novita),
            other => self.custom.get(other),
        }
    }

    /// Mutable access by name, used by env overrides.
    pub fn get_by_name_mut(&mut self, name: &str) -> Option<&mut ProviderConfig> {
        match name {
            "openrouter" => Some(&mut self.openrouter),
            "gemini" => Some(&mut self.gemini),
            "siliconflow" => Some(&mut self.siliconflow),
            "moonshot" => Some(&mut self.moonshot),
            "novita" => Some(&mut self.novita),
            other => self.custom.get_mut(other),
        }
    }

    /// Names of every configured provider, built-ins first.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = ["openrouter", "gemini", "siliconflow", "moonshot", "novita"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.extend(self.custom.keys().cloned());
        names
    }

    /// Convert to a HashMap<String, ProviderConfig> for use with the provider registry.
    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let mut map = HashMap::new();
        let entries: &[(&str, &ProviderConfig)] = &[
            ("openrouter", &self.openrouter),
            ("gemini", &self.gemini),
            ("siliconflow", &self.siliconflow),
            ("moonshot", &self.moonshot),
            ("novita", &self.novita),
        ];
        for (name, config) in entries {
            map.insert(name.to_string(), (*config).clone());
        }
        for (name, config) in &self.custom {
            map.insert(name.clone(), config.clone());
        }
        map
    }
}

// ─────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────

/// One `(provider, model)` entry in a task's failover chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainEntry {
    pub provider: String,
    pub model: String,
}

impl ChainEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Failover chain for one task. The first entry is the primary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConfig {
    pub chain: Vec<ChainEntry>,
}

impl TaskConfig {
    pub fn new(chain: Vec<ChainEntry>) -> Self {
        Self { chain }
    }
}

/// Chains for all three tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TasksConfig {
    pub title: TaskConfig,
    pub body: TaskConfig,
    pub svg: TaskConfig,
}

const DEEPSEEK_SILICONFLOW: &str = "deepseek-ai/DeepSeek-V3.1";
const DEEPSEEK_NOVITA: &str = "deepseek/deepseek-v3.1";
const DEEPSEEK_OPENROUTER: &str = "deepseek/deepseek-chat";
const KIMI: &str = "kimi-k2-0711-preview";

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            title: TaskConfig::new(vec![
                ChainEntry::new("siliconflow", DEEPSEEK_SILICONFLOW),
                ChainEntry::new("moonshot", KIMI),
            ]),
            body: TaskConfig::new(vec![
                ChainEntry::new("novita", DEEPSEEK_NOVITA),
                ChainEntry::new("moonshot", KIMI),
            ]),
            svg: TaskConfig::new(vec![
                ChainEntry::new("openrouter", DEEPSEEK_OPENROUTER),
                ChainEntry::new("novita", DEEPSEEK_NOVITA),
                ChainEntry::new("siliconflow", DEEPSEEK_SILICONFLOW),
                ChainEntry::new("moonshot", KIMI),
            ]),
        }
    }
}

impl TasksConfig {
    /// Get a task config by task name (`"title"`, `"body"`, `"svg"`).
    pub fn get(&self, task: &str) -> Option<&TaskConfig> {
        match task {
            "title" => Some(&self.title),
            "body" => Some(&self.body),
            "svg" => Some(&self.svg),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────
// Rate limiting & retries
// ─────────────────────────────────────────────

/// Longest accepted call interval, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;

/// Throttle and retry settings shared by all providers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Minimum seconds between call starts for providers without an explicit interval.
    pub default_interval_secs: f64,
    /// Per-provider minimum interval in seconds (overrides built-in provider defaults).
    pub intervals: HashMap<String, f64>,
    /// Attempts per chain entry before moving on.
    pub max_retries: u32,
    /// Base backoff for transient failures; attempt `n` waits `n * base`.
    pub retry_delay_seconds: u64,
    /// Base backoff for rate-limit failures; attempt `n` waits `n * base`.
    pub rate_limit_delay_seconds: u64,
    /// Ceiling on a provider's `Retry-After` hint.
    pub max_retry_after_secs: u64,
}

impl RateLimitConfig {
    /// An interval in seconds as a `Duration`, or `None` when it is negative,
    /// not a number, or longer than [`MAX_INTERVAL_SECS`].
    pub fn interval_from_secs(secs: f64) -> Option<Duration> {
        if (0.0..=MAX_INTERVAL_SECS).contains(&secs) {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 2.0,
            intervals: HashMap::new(),
            max_retries: 3,
            retry_delay_seconds: 5,
            rate_limit_delay_seconds: 10,
            max_retry_after_secs: 120,
        }
    }
}

// ─────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────

/// Input dataset, prompt files, and output directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilesConfig {
    /// JSON array of post records (each with a `full_text` field).
    pub input_json: String,
    pub svg_prompt: String,
    pub title_prompt: String,
    pub body_prompt: String,
    pub output_dir: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            input_json: "posts.json".to_string(),
            svg_prompt: "prompts/svg.txt".to_string(),
            title_prompt: "prompts/title.txt".to_string(),
            body_prompt: "prompts/body.txt".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────

/// Log level and sinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default filter level (`RUST_LOG` takes precedence when set).
    pub level: String,
    /// Optional log file, appended to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Whether to log to the console.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console: true,
        }
    }
}

// ─────────────────────────────────────────────
// Batch
// ─────────────────────────────────────────────

/// Batch loop pacing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    /// Save the progress file every N records.
    pub progress_save_interval: usize,
    /// Pause between records, in milliseconds.
    pub record_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            progress_save_interval: 5,
            record_delay_ms: 500,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
