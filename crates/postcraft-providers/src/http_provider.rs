//! Generic HTTP-based LLM provider for OpenAI-compatible APIs.
//!
//! Talks directly to any `/chat/completions` endpoint and classifies every
//! failure into a [`ProviderError`] so the dispatcher can decide what to do.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};

use postcraft_core::config::ProviderConfig;
use postcraft_core::types::{ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, Message};
use postcraft_core::utils::truncate_string;

use crate::error::{ConfigError, ProviderError};
use crate::registry::{spec_for, ProviderSpec};
use crate::traits::{LlmProvider, LlmRequestConfig};

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A provider client for one OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// Registry name (e.g. `"siliconflow"`).
    name: String,
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.siliconflow.cn/v1"`).
    api_base: String,
    /// API key for Bearer authentication.
    api_key: String,
    /// Model used when a chain entry leaves it blank.
    default_model: Option<String>,
    /// Spec headers followed by configured extra headers.
    extra_headers: HeaderMap,
    request_config: LlmRequestConfig,
    timeout: Duration,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a client from a provider config and spec.
    ///
    /// # Errors
    /// `InvalidProvider` when no endpoint is known or the HTTP client cannot be built.
    pub fn new(
        name: &str,
        config: &ProviderConfig,
        spec: &'static ProviderSpec,
    ) -> Result<Self, ConfigError> {
        // Resolve API base: config > spec default
        let api_base = config
            .api_base
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| spec.default_api_base.map(String::from))
            .ok_or_else(|| ConfigError::InvalidProvider {
                name: name.to_string(),
                reason: "no apiBase configured and no built-in endpoint".to_string(),
            })?;

        let mut extra_headers = HeaderMap::new();
        let spec_headers = spec.extra_headers.iter().map(|(k, v)| (*k, *v));
        let config_headers = config
            .extra_headers
            .iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str()));
        for (key, value) in spec_headers.chain(config_headers) {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    extra_headers.insert(name, val);
                }
                _ => warn!(provider = %name, header = %key, "Invalid header, skipping"),
            }
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidProvider {
                name: name.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(HttpProvider {
            name: name.to_string(),
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            extra_headers,
            request_config: LlmRequestConfig::from_provider(config),
            timeout,
            spec,
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_content: &str,
        model: &str,
    ) -> Result<String, ProviderError> {
        let model = match (model.trim(), self.default_model.as_deref()) {
            ("", Some(default)) => default,
            _ => model,
        };

        debug!(
            provider = %self.name,
            model = %model,
            prompt_chars = system_prompt.chars().count() + user_content.chars().count(),
            "Calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: Message::prompt_pair(system_prompt, user_content),
            max_tokens: self.request_config.max_tokens,
            temperature: Some(self.request_config.temperature),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e, self.timeout))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let err = classify_status(status, &body, retry_after);
            warn!(
                provider = %self.name,
                model = %model,
                status = %status,
                kind = %err.kind(),
                "API error"
            );
            return Err(err);
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::MalformedResponse(format!("unparseable body: {e}"))
        })?;
        if parsed.choices.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "response has no choices".to_string(),
            ));
        }
        let finish_reason = parsed
            .choices
            .first()
            .and_then(|c| c.finish_reason.clone());
        let text = parsed.into_text().ok_or_else(|| {
            ProviderError::MalformedResponse("response content is empty".to_string())
        })?;

        debug!(
            provider = %self.name,
            model = %model,
            chars = text.chars().count(),
            finish_reason = finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        if std::ptr::eq(self.spec, &crate::registry::GENERIC) {
            &self.name
        } else {
            self.spec.display_name
        }
    }
}

// ─────────────────────────────────────────────
// Failure classification
// ─────────────────────────────────────────────

/// Map a non-2xx status to a provider error.
pub fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = truncate_string(&ApiErrorBody::message_from(body), MAX_ERROR_BODY);
    let code = status.as_u16();

    match code {
        401 | 403 => ProviderError::Authentication {
            status: code,
            message,
        },
        429 => ProviderError::RateLimited {
            retry_after,
            message,
        },
        408 => ProviderError::Transient(format!("request timeout (408): {message}")),
        500..=599 => ProviderError::Server {
            status: code,
            message,
        },
        _ => ProviderError::InvalidRequest {
            status: code,
            message,
        },
    }
}

fn classify_send_error(err: &reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient(format!("request timed out after {}s", timeout.as_secs()))
    } else {
        ProviderError::Transient(format!("request failed: {err}"))
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values and numbers that do
/// not fit a `Duration` are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an HttpProvider for a configured provider name.
///
/// Built-in names use their spec; any other name is a generic
/// OpenAI-compatible endpoint and must configure `apiBase`.
pub fn create_provider(name: &str, config: &ProviderConfig) -> Result<HttpProvider, ConfigError> {
    let spec = spec_for(name);

    debug!(
        provider = %name,
        spec = spec.name,
        api_base = config.api_base.as_deref().unwrap_or("default"),
        "Creating LLM provider"
    );

    HttpProvider::new(name, config, spec)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::registry::find_by_name;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            ..Default::default()
        }
    }

    fn provider_at(server: &MockServer) -> HttpProvider {
        let spec = find_by_name("siliconflow").unwrap();
        let config = make_config("test-key-123", Some(&server.uri()));
        HttpProvider::new("siliconflow", &config, spec).unwrap()
    }

    async fn respond_with(template: ResponseTemplate) -> (MockServer, HttpProvider) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(template)
            .mount(&server)
            .await;
        let provider = provider_at(&server);
        (server, provider)
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let spec = find_by_name("moonshot").unwrap();
        let config = make_config("key", Some("https://api.moonshot.cn/v1/"));
        let provider = HttpProvider::new("moonshot", &config, spec).unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://api.moonshot.cn/v1/chat/completions"
        );
    }

    #[test]
    fn test_default_api_base_from_spec() {
        let spec = find_by_name("novita").unwrap();
        let provider = HttpProvider::new("novita", &make_config("k", None), spec).unwrap();
        assert_eq!(provider.api_base, "https://api.novita.ai/openai");
    }

    #[test]
    fn test_config_overrides_default_base() {
        let spec = find_by_name("openrouter").unwrap();
        let config = make_config("sk-or-abc", Some("https://custom.proxy.com/v1"));
        let provider = HttpProvider::new("openrouter", &config, spec).unwrap();
        assert_eq!(provider.api_base, "https://custom.proxy.com/v1");
    }

    #[test]
    fn test_spec_and_config_headers_merge() {
        let spec = find_by_name("openrouter").unwrap();
        let mut headers = HashMap::new();
        headers.insert("X-Title".to_string(), "My Batch".to_string());
        headers.insert("X-App-Code".to_string(), "abc".to_string());
        let config = ProviderConfig {
            api_key: "key".to_string(),
            extra_headers: Some(headers),
            ..Default::default()
        };
        let provider = HttpProvider::new("openrouter", &config, spec).unwrap();

        assert!(provider.extra_headers.contains_key("http-referer"));
        assert!(provider.extra_headers.contains_key("x-app-code"));
        assert_eq!(provider.extra_headers["x-title"], "My Batch");
    }

    #[test]
    fn test_generic_provider_requires_api_base() {
        let err = create_provider("my-proxy", &make_config("k", None)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProvider { .. }));

        let provider =
            create_provider("my-proxy", &make_config("k", Some("http://localhost:9/v1"))).unwrap();
        assert_eq!(provider.display_name(), "my-proxy");
    }

    #[test]
    fn test_classify_status() {
        let kinds: Vec<(u16, FailureKind)> = vec![
            (401, FailureKind::Authentication),
            (403, FailureKind::Authentication),
            (429, FailureKind::RateLimited),
            (408, FailureKind::Transient),
            (500, FailureKind::ServerError),
            (503, FailureKind::ServerError),
            (400, FailureKind::MalformedRequest),
            (404, FailureKind::MalformedRequest),
        ];
        for (code, expected) in kinds {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status, "", None).kind(), expected, "{code}");
        }
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);

        for unusable in ["99999999999999999999", "1e400", "-5", "NaN", "inf"] {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(unusable));
            assert_eq!(parse_retry_after(&headers), None, "{unusable}");
        }

        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(86_400)));
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-ai/DeepSeek-V3.1",
                "messages": [
                    { "role": "system", "content": "Write a title." },
                    { "role": "user", "content": "Some post" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "message": { "content": "A Fine Title" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13 }
            })))
            .mount(&server)
            .await;

        let provider = provider_at(&server);
        let text = provider
            .generate("Write a title.", "Some post", "deepseek-ai/DeepSeek-V3.1")
            .await
            .unwrap();
        assert_eq!(text, "A Fine Title");
    }

    #[tokio::test]
    async fn test_generate_ignores_partial_usage() {
        let (_server, provider) = respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({
                "choices": [{ "message": { "content": "A Fine Title" } }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 3 }
            }),
        ))
        .await;

        let text = provider.generate("s", "u", "m").await.unwrap();
        assert_eq!(text, "A Fine Title");
    }

    #[tokio::test]
    async fn test_generate_sends_configured_sampling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "max_tokens": 800,
                "temperature": 0.2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" } }]
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("novita").unwrap();
        let config = ProviderConfig {
            api_key: "k".into(),
            api_base: Some(server.uri()),
            max_tokens: Some(800),
            temperature: Some(0.2),
            ..Default::default()
        };
        let provider = HttpProvider::new("novita", &config, spec).unwrap();

        assert_eq!(provider.generate("s", "u", "m").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_generate_sends_spec_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("HTTP-Referer", "https://github.com"))
            .and(header("X-Title", "Postcraft"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "<svg/>" } }]
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("openrouter").unwrap();
        let config = make_config("sk-or", Some(&server.uri()));
        let provider = HttpProvider::new("openrouter", &config, spec).unwrap();

        // A header mismatch makes wiremock answer 404, which would surface as an error.
        let text = provider
            .generate("sys", "user", "deepseek/deepseek-chat")
            .await
            .unwrap();
        assert_eq!(text, "<svg/>");
    }

    #[tokio::test]
    async fn test_generate_uses_default_model_for_blank_entry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "model": "kimi-k2-0711-preview" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" } }]
            })))
            .mount(&server)
            .await;

        let spec = find_by_name("moonshot").unwrap();
        let config = ProviderConfig {
            api_key: "k".into(),
            api_base: Some(server.uri()),
            model: Some("kimi-k2-0711-preview".into()),
            ..Default::default()
        };
        let provider = HttpProvider::new("moonshot", &config, spec).unwrap();

        assert_eq!(provider.generate("s", "u", "").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_rate_limited_with_retry_after() {
        let (_server, provider) = respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "30")
                .set_body_json(serde_json::json!({
                    "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
                })),
        )
        .await;

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_rate_limited_with_oversized_retry_after() {
        let (_server, provider) = respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "99999999999999999999"),
        )
        .await;

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RateLimited);
        assert_eq!(err.retry_after(), None);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let (_server, provider) = respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({ "error": { "message": "Invalid API key" } })),
        )
        .await;

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Authentication);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let (_server, provider) =
            respond_with(ResponseTemplate::new(502).set_body_string("bad gateway")).await;

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ServerError);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("bad gateway"));
    }

    #[tokio::test]
    async fn test_malformed_responses() {
        let bodies = [
            ResponseTemplate::new(200).set_body_string("not json"),
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "choices": [{ "message": { "content": "" } }] })),
        ];

        for template in bodies {
            let (_server, provider) = respond_with(template).await;
            let err = provider.generate("s", "u", "m").await.unwrap_err();
            assert_eq!(err.kind(), FailureKind::MalformedResponse, "{err}");
        }
    }

    #[tokio::test]
    async fn test_network_error_is_transient() {
        // Point to a port that's not listening
        let spec = find_by_name("moonshot").unwrap();
        let config = make_config("key", Some("http://127.0.0.1:1"));
        let provider = HttpProvider::new("moonshot", &config, spec).unwrap();

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(serde_json::json!({
                        "choices": [{ "message": { "content": "late" } }]
                    })),
            )
            .mount(&server)
            .await;

        let spec = find_by_name("moonshot").unwrap();
        let config = ProviderConfig {
            api_key: "k".into(),
            api_base: Some(server.uri()),
            timeout_secs: 1,
            ..Default::default()
        };
        let provider = HttpProvider::new("moonshot", &config, spec).unwrap();

        let err = provider.generate("s", "u", "m").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert!(err.to_string().contains("timed out"));
    }
}
