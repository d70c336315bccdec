//! Config loader: reads `config.json`, migrates legacy layouts, and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file (`--config`, else `$CONFIG_FILE`, else `./config.json`)
//! 3. Environment variables (override JSON)

use std::path::{Path, PathBuf};
use tracing::debug;

use serde_json::{Map, Value};

use super::schema::{Config, ProviderConfig};

/// Env var naming an alternative config file.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    std::env::var(CONFIG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"))
}

/// A loaded config plus the problems met while reading it.
///
/// Loading runs before logging is set up, so problems are handed back
/// instead of logged; the caller reports them once a subscriber exists.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// Why the file was ignored, if it was. Empty when it loaded cleanly or is absent.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    fn defaults_because(warning: String) -> Self {
        Self {
            config: Config::default(),
            warnings: vec![warning],
        }
    }
}

/// Load configuration from `path` (or the default path) + env vars.
///
/// Falls back to `Config::default()` if the file can't be read or parsed, and
/// says why in [`LoadedConfig::warnings`].
pub fn load_config(path: Option<&Path>) -> LoadedConfig {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    let mut loaded = load_config_from_path(&config_path);
    loaded.config = apply_env_overrides(loaded.config);
    loaded
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> LoadedConfig {
    if !path.exists() {
        debug!("No config file found at {}, using defaults", path.display());
        return LoadedConfig {
            config: Config::default(),
            warnings: Vec::new(),
        };
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return LoadedConfig::defaults_because(format!(
                "failed to read config file {}: {e}; using defaults",
                path.display()
            ))
        }
    };

    // Parse JSON → Value first for migration
    let mut raw: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            return LoadedConfig::defaults_because(format!(
                "config file {} is not valid JSON ({e}); using defaults",
                path.display()
            ))
        }
    };

    migrate_config(&mut raw);

    match serde_json::from_value(raw) {
        Ok(config) => LoadedConfig {
            config,
            warnings: Vec::new(),
        },
        Err(e) => LoadedConfig::defaults_because(format!(
            "config file {} has invalid settings ({e}); using defaults",
            path.display()
        )),
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

// ─────────────────────────────────────────────
// Legacy migration
// ─────────────────────────────────────────────

/// Rename `old` to `new` inside `obj`, unless `new` is already present.
fn rename_key(obj: &mut Map<String, Value>, old: &str, new: &str) {
    if obj.contains_key(new) {
        obj.remove(old);
        return;
    }
    if let Some(val) = obj.remove(old) {
        debug!("Migrated config key {old} → {new}");
        obj.insert(new.to_string(), val);
    }
}

/// Apply legacy config migrations.
///
/// The older snake_case layout (`api_providers`, `rate_limit`, provider `key`/`base_url`,
/// `primary`/`fallback`/`fallback2`/`fallback3` task slots, `openrouter_interval`, ...)
/// is rewritten into the current camelCase layout before deserialization.
fn migrate_config(raw: &mut Value) {
    let Some(root) = raw.as_object_mut() else {
        return;
    };

    rename_key(root, "api_providers", "providers");
    rename_key(root, "rate_limit", "rateLimit");

    if let Some(providers) = root.get_mut("providers").and_then(Value::as_object_mut) {
        for provider in providers.values_mut() {
            if let Some(p) = provider.as_object_mut() {
                rename_key(p, "key", "apiKey");
                rename_key(p, "base_url", "apiBase");
                rename_key(p, "timeout", "timeoutSecs");
                // An empty legacy base_url means "use the built-in endpoint".
                if p.get("apiBase").and_then(Value::as_str) == Some("") {
                    p.remove("apiBase");
                }
            }
        }
    }

    if let Some(tasks) = root.get_mut("tasks").and_then(Value::as_object_mut) {
        for task in tasks.values_mut() {
            if let Some(t) = task.as_object_mut() {
                migrate_task_slots(t);
            }
        }
    }

    if let Some(rate) = root.get_mut("rateLimit").and_then(Value::as_object_mut) {
        rename_key(rate, "retry_attempts", "maxRetries");
        rename_key(rate, "retry_delay_seconds", "retryDelaySeconds");

        let mut intervals = rate
            .remove("intervals")
            .and_then(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .unwrap_or_default();
        let legacy: Vec<String> = rate
            .keys()
            .filter(|k| k.ends_with("_interval") || k.ends_with("Interval"))
            .cloned()
            .collect();
        for key in legacy {
            let provider = key
                .trim_end_matches("_interval")
                .trim_end_matches("Interval")
                .to_string();
            if let Some(val) = rate.remove(&key) {
                intervals.entry(provider).or_insert(val);
            }
        }
        if !intervals.is_empty() {
            rate.insert("intervals".to_string(), Value::Object(intervals));
        }
    }

    if let Some(files) = root.get_mut("files").and_then(Value::as_object_mut) {
        rename_key(files, "input_json", "inputJson");
        rename_key(files, "svg_prompt", "svgPrompt");
        rename_key(files, "title_prompt", "titlePrompt");
        rename_key(files, "xiaohongshu_prompt", "bodyPrompt");
        rename_key(files, "output_dir", "outputDir");
    }

    if let Some(batch) = root.get_mut("batch").and_then(Value::as_object_mut) {
        rename_key(batch, "progress_save_interval", "progressSaveInterval");
    }
}

/// Fold `primary`, `fallback`, `fallback2`, `fallback3`, ... into one ordered `chain`.
fn migrate_task_slots(task: &mut Map<String, Value>) {
    if task.contains_key("chain") {
        return;
    }

    let mut slots: Vec<(u32, Value)> = Vec::new();
    let keys: Vec<String> = task.keys().cloned().collect();
    for key in keys {
        let rank = match key.as_str() {
            "primary" => 0,
            "fallback" => 1,
            other => match other.strip_prefix("fallback").and_then(|n| n.parse::<u32>().ok()) {
                Some(n) => n,
                None => continue,
            },
        };
        if let Some(val) = task.remove(&key) {
            // Unset slots are empty objects in the legacy layout.
            if val.as_object().is_some_and(|o| !o.is_empty()) {
                slots.push((rank, val));
            }
        }
    }

    if slots.is_empty() {
        return;
    }
    slots.sort_by_key(|(rank, _)| *rank);
    let chain = slots.into_iter().map(|(_, v)| v).collect();
    task.insert("chain".to_string(), Value::Array(chain));
}

// ─────────────────────────────────────────────
// Environment overrides
// ─────────────────────────────────────────────

/// Apply environment variable overrides on top of a loaded config.
///
/// Supported overrides:
/// - `<NAME>_API_KEY` → `providers.<name>.api_key` (e.g. `OPENROUTER_API_KEY`)
/// - `POSTCRAFT_PROVIDERS__<NAME>__API_BASE` → `providers.<name>.api_base`
/// - `LOG_LEVEL` → `logging.level`
/// - `INPUT_JSON` → `files.input_json`
/// - `OUTPUT_DIR` → `files.output_dir`
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

fn apply_overrides_from(mut config: Config, env: impl Fn(&str) -> Option<String>) -> Config {
    for name in config.providers.names() {
        if let Some(provider) = config.providers.get_by_name_mut(&name) {
            apply_provider_env(provider, &env_name(&name), &env);
        }
    }

    if let Some(val) = env("LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = env("INPUT_JSON") {
        config.files.input_json = val;
    }
    if let Some(val) = env("OUTPUT_DIR") {
        config.files.output_dir = val;
    }

    config
}

/// Apply env var overrides for a single provider.
fn apply_provider_env(
    provider: &mut ProviderConfig,
    name: &str,
    env: &impl Fn(&str) -> Option<String>,
) {
    if let Some(val) = env(&format!("{name}_API_KEY")) {
        provider.api_key = val;
    }
    if let Some(val) = env(&format!("POSTCRAFT_PROVIDERS__{name}__API_BASE")) {
        provider.api_base = Some(val);
    }
}

/// `"my-proxy"` → `"MY_PROXY"`.
fn env_name(provider: &str) -> String {
    provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
