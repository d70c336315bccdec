//! Provider registry: static specs for the built-in providers, plus the
//! runtime table of instantiated clients.
//!
//! Each `ProviderSpec` describes how to reach one provider: env var name,
//! default endpoint, fixed headers, and its minimum call interval.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use postcraft_core::config::ProviderConfig;

use crate::error::ConfigError;
use crate::http_provider::create_provider;
use crate::traits::LlmProvider;

// ─────────────────────────────────────────────
// ProviderSpec: static metadata for one provider
// ─────────────────────────────────────────────

/// Static specification describing one LLM provider.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Internal name (e.g. `"openrouter"`).
    pub name: &'static str,
    /// Environment variable for the API key. E.g. `"OPENROUTER_API_KEY"`.
    pub env_key: &'static str,
    /// Human-readable name for logs. E.g. `"OpenRouter"`.
    pub display_name: &'static str,
    /// Endpoint used when the config does not set `apiBase`.
    pub default_api_base: Option<&'static str>,
    /// Headers sent with every request, before any configured `extraHeaders`.
    pub extra_headers: &'static [(&'static str, &'static str)],
    /// Minimum seconds between call starts. `None` uses the configured default.
    pub default_interval_secs: Option<f64>,
}

/// Built-in providers, in display order.
pub static PROVIDERS: &[ProviderSpec] = &[
    // OpenRouter asks clients to identify themselves and is the strictest on rate.
    ProviderSpec {
        name: "openrouter",
        env_key: "OPENROUTER_API_KEY",
        display_name: "OpenRouter",
        default_api_base: Some("https://openrouter.ai/api/v1"),
        extra_headers: &[
            ("HTTP-Referer", "https://github.com"),
            ("X-Title", "Postcraft"),
        ],
        default_interval_secs: Some(4.0),
    },
    // Gemini through an OpenAI-compatible proxy. Disabled by default.
    ProviderSpec {
        name: "gemini",
        env_key: "GEMINI_API_KEY",
        display_name: "Gemini",
        default_api_base: Some("http://xai-studio.top:8000/openai/v1"),
        extra_headers: &[],
        default_interval_secs: Some(2.0),
    },
    ProviderSpec {
        name: "siliconflow",
        env_key: "SILICONFLOW_API_KEY",
        display_name: "SiliconFlow",
        default_api_base: Some("https://api.siliconflow.cn/v1"),
        extra_headers: &[],
        default_interval_secs: None,
    },
    ProviderSpec {
        name: "moonshot",
        env_key: "MOONSHOT_API_KEY",
        display_name: "Moonshot",
        default_api_base: Some("https://api.moonshot.cn/v1"),
        extra_headers: &[],
        default_interval_secs: None,
    },
    ProviderSpec {
        name: "novita",
        env_key: "NOVITA_API_KEY",
        display_name: "Novita",
        default_api_base: Some("https://api.novita.ai/openai"),
        extra_headers: &[],
        default_interval_secs: None,
    },
];

/// Spec used for providers configured under a name with no built-in entry.
/// Such providers must set `apiBase`.
pub static GENERIC: ProviderSpec = ProviderSpec {
    name: "custom",
    env_key: "",
    display_name: "Custom",
    default_api_base: None,
    extra_headers: &[],
    default_interval_secs: None,
};

/// Find a built-in provider spec by its name.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|s| s.name == name)
}

/// The spec a provider name runs under: its built-in spec, else the generic one.
pub fn spec_for(name: &str) -> &'static ProviderSpec {
    find_by_name(name).unwrap_or(&GENERIC)
}

// ─────────────────────────────────────────────
// ProviderRegistry: instantiated clients
// ─────────────────────────────────────────────

/// Table of ready-to-use provider clients, keyed by provider name.
///
/// Built once at startup. Every enabled, keyed provider gets exactly one client;
/// everything else is remembered with the reason it cannot be used, so that
/// `resolve` can report it without touching the network.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn LlmProvider>>,
    unavailable: HashMap<String, ConfigError>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ready: Vec<&String> = self.clients.keys().collect();
        ready.sort();
        f.debug_struct("ProviderRegistry")
            .field("ready", &ready)
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry. Every `resolve` fails with `UnknownProvider`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate one client per usable provider config.
    pub fn from_configs(configs: &HashMap<String, ProviderConfig>) -> Self {
        let mut registry = Self::new();

        for (name, config) in configs {
            if !config.enabled {
                debug!(provider = %name, "Provider disabled");
                registry
                    .unavailable
                    .insert(name.clone(), ConfigError::ProviderDisabled(name.clone()));
                continue;
            }
            if !config.is_configured() {
                warn!(provider = %name, "Provider enabled but has no API key");
                registry
                    .unavailable
                    .insert(name.clone(), ConfigError::MissingApiKey(name.clone()));
                continue;
            }

            match create_provider(name, config) {
                Ok(provider) => {
                    registry.clients.insert(name.clone(), Arc::new(provider));
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider could not be created");
                    registry.unavailable.insert(name.clone(), e);
                }
            }
        }

        debug!(
            ready = registry.clients.len(),
            unavailable = registry.unavailable.len(),
            "Provider registry built"
        );
        registry
    }

    /// Register a client under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let name = name.into();
        self.unavailable.remove(&name);
        self.clients.insert(name, provider);
    }

    /// Look up the shared client for `name`.
    ///
    /// # Errors
    /// `UnknownProvider` for names never configured, otherwise the reason the
    /// provider was left out (`ProviderDisabled`, `MissingApiKey`, `InvalidProvider`).
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        if let Some(client) = self.clients.get(name) {
            return Ok(Arc::clone(client));
        }
        Err(self
            .unavailable
            .get(name)
            .cloned()
            .unwrap_or_else(|| ConfigError::UnknownProvider(name.to_string())))
    }

    /// Names of providers with a live client, sorted.
    pub fn ready_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
