//! HTTP transport to the local model server.
//!
//! Speaks the NDJSON chat protocol: `POST {base}/chat` and `GET {base}/tags`.
//! Failed attempts are retried with exponential backoff; every send, backoff
//! sleep and stream read races the caller's cancellation token.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use super::config::BridgeConfig;
use super::errors::{AttemptFailure, BridgeError};
use super::streaming::{ndjson_frames, FrameStream, StreamOrigin};
use super::types::{BackendFrame, ChatPayload, ModelInfo, TagsResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout, independent of the per-attempt timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Error bodies are cut to this many characters in error messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

// ─── Call options ────────────────────────────────────────────────────────────

/// Per-call settings: the attempt timeout and a cancellation handle.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Bounds each attempt. For streams it bounds the wait for headers, then
    /// each wait for the next body chunk.
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ─── Retry policy ────────────────────────────────────────────────────────────

/// Bounded exponential backoff: `delay(n) = min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff.base_ms),
            max: Duration::from_millis(config.backoff.max_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

// ─── Transport trait ─────────────────────────────────────────────────────────

/// The orchestrator's view of a backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One non-streaming chat call, returning the single response frame.
    async fn request(
        &self,
        payload: &ChatPayload,
        options: &CallOptions,
    ) -> Result<BackendFrame, BridgeError>;

    /// A streaming chat call. Retries cover getting the response headers;
    /// once frames flow, a broken connection ends the stream.
    async fn stream(
        &self,
        payload: &ChatPayload,
        options: &CallOptions,
    ) -> Result<FrameStream, BridgeError>;

    /// Models installed on the server.
    async fn list_models(&self, options: &CallOptions) -> Result<Vec<ModelInfo>, BridgeError>;

    /// Whether the server answers at all. Never errors.
    async fn health_check(&self) -> bool;
}

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    http: HttpClient,
    config: BridgeConfig,
    policy: RetryPolicy,
}

/// What is being attempted, for logs and errors.
struct Attempting<'a> {
    url: &'a str,
    model: &'a str,
    operation: &'static str,
}

impl HttpTransport {
    /// Build a transport. Fails with `Configuration` for an invalid config.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Configuration {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            http,
            config,
            policy,
        })
    }

    /// Replace the retry policy derived from the config.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Run `attempt` until it succeeds or retries run out. Every failure is
    /// retried, client errors included.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &Attempting<'_>,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let cancelled = || BridgeError::Cancelled {
            operation: what.operation.to_string(),
        };
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                outcome = attempt() => outcome,
            };

            let failure = match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if attempts > self.policy.max_retries {
                tracing::warn!(
                    url = %what.url,
                    model = %what.model,
                    operation = what.operation,
                    attempts,
                    error = %failure,
                    "backend call failed"
                );
                return Err(BridgeError::Connectivity {
                    url: what.url.to_string(),
                    model: what.model.to_string(),
                    operation: what.operation.to_string(),
                    attempts,
                    last_error: failure.to_string(),
                });
            }

            let delay = self.policy.delay(attempts - 1);
            tracing::info!(
                url = %what.url,
                model = %what.model,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying backend call"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One POST, bounded by `timeout`, returning the 2xx response.
    ///
    /// The timeout covers only the headers; callers that read the body
    /// bound that themselves.
    async fn post_once(
        &self,
        url: &str,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> Result<reqwest::Response, AttemptFailure> {
        let send = async {
            let response = self
                .http
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(network_failure)?;
            ensure_success(response).await
        };
        tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| timeout_failure(timeout))?
    }

    /// One POST whose whole body is read within `timeout`.
    async fn post_body_once(
        &self,
        url: &str,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> Result<String, AttemptFailure> {
        let exchange = async {
            let response = self
                .http
                .post(url)
                .json(payload)
                .send()
                .await
                .map_err(network_failure)?;
            let response = ensure_success(response).await?;
            response.text().await.map_err(network_failure)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| timeout_failure(timeout))?
    }

    async fn get_body_once(&self, url: &str, timeout: Duration) -> Result<String, AttemptFailure> {
        let exchange = async {
            let response = self.http.get(url).send().await.map_err(network_failure)?;
            let response = ensure_success(response).await?;
            response.text().await.map_err(network_failure)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| timeout_failure(timeout))?
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        payload: &ChatPayload,
        options: &CallOptions,
    ) -> Result<BackendFrame, BridgeError> {
        let url = self.config.endpoint("chat");
        tracing::info!(
            url = %url,
            model = %payload.model,
            message_count = payload.messages.len(),
            tool_count = payload.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            stream = false,
            "chat request"
        );

        let what = Attempting {
            url: &url,
            model: &payload.model,
            operation: "chat",
        };
        let body = self
            .with_retry(&what, &options.cancel, || {
                self.post_body_once(&url, payload, options.timeout)
            })
            .await?;

        serde_json::from_str::<BackendFrame>(&body).map_err(|e| BridgeError::Protocol {
            reason: format!("failed to parse chat response: {e}"),
        })
    }

    async fn stream(
        &self,
        payload: &ChatPayload,
        options: &CallOptions,
    ) -> Result<FrameStream, BridgeError> {
        let url = self.config.endpoint("chat");
        tracing::info!(
            url = %url,
            model = %payload.model,
            message_count = payload.messages.len(),
            tool_count = payload.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            stream = true,
            "chat request"
        );

        let what = Attempting {
            url: &url,
            model: &payload.model,
            operation: "stream",
        };
        let response = self
            .with_retry(&what, &options.cancel, || {
                self.post_once(&url, payload, options.timeout)
            })
            .await?;

        let origin = StreamOrigin {
            url,
            model: payload.model.clone(),
        };
        Ok(Box::pin(ndjson_frames(
            Box::pin(response.bytes_stream()),
            options.cancel.clone(),
            options.timeout,
            origin,
        )))
    }

    async fn list_models(&self, options: &CallOptions) -> Result<Vec<ModelInfo>, BridgeError> {
        let url = self.config.endpoint("tags");
        let what = Attempting {
            url: &url,
            model: "-",
            operation: "list_models",
        };
        let body = self
            .with_retry(&what, &options.cancel, || {
                self.get_body_once(&url, options.timeout)
            })
            .await?;

        let tags: TagsResponse = serde_json::from_str(&body).map_err(|e| BridgeError::Protocol {
            reason: format!("failed to parse model list: {e}"),
        })?;
        Ok(tags.models.unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        let url = self.config.endpoint("tags");
        match self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "health check failed");
                false
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn network_failure(e: reqwest::Error) -> AttemptFailure {
    AttemptFailure::Network(e.to_string())
}

fn timeout_failure(timeout: Duration) -> AttemptFailure {
    AttemptFailure::Timeout {
        after_ms: timeout.as_millis() as u64,
    }
}

/// Turn a non-2xx response into a `Status` failure carrying a body snippet.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AttemptFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    Err(AttemptFailure::Status {
        status: status.as_u16(),
        body,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::{ChatMessage, WireMessage};
    use futures::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
        }
    }

    fn transport(server: &MockServer, max_retries: u32) -> HttpTransport {
        let config = BridgeConfig {
            base_url: format!("{}/api", server.uri()),
            ..BridgeConfig::default()
        };
        HttpTransport::new(config)
            .unwrap()
            .with_retry_policy(fast_policy(max_retries))
    }

    fn payload(stream: bool) -> ChatPayload {
        ChatPayload {
            model: "mistral".into(),
            messages: vec![WireMessage::from(&ChatMessage::user("hi"))],
            stream,
            tools: None,
            options: serde_json::Map::new(),
        }
    }

    fn options() -> CallOptions {
        CallOptions::new(Duration::from_secs(5))
    }

    const DONE_BODY: &str = r#"{"model":"mistral","message":{"role":"assistant","content":"hello"},"done":true,"done_reason":"stop","prompt_eval_count":3,"eval_count":1}"#;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base: Duration::from_millis(500),
            max: Duration::from_millis(8_000),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay(4), Duration::from_millis(8_000));
        assert_eq!(policy.delay(10), Duration::from_millis(8_000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(8_000));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = BridgeConfig {
            base_url: "localhost:11434".into(),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            HttpTransport::new(config),
            Err(BridgeError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_parses_frame() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DONE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let frame = transport(&server, 0).request(&payload(false), &options()).await.unwrap();
        assert!(frame.done);
        assert_eq!(frame.message.unwrap().content, "hello");
        assert_eq!(frame.eval_count, Some(1));
    }

    #[tokio::test]
    async fn test_request_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DONE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let frame = transport(&server, 3).request(&payload(false), &options()).await.unwrap();
        assert!(frame.done);
    }

    #[tokio::test]
    async fn test_request_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .expect(3)
            .mount(&server)
            .await;

        let err = transport(&server, 2)
            .request(&payload(false), &options())
            .await
            .unwrap_err();
        match err {
            BridgeError::Connectivity {
                attempts,
                last_error,
                model,
                url,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "HTTP 500: model crashed");
                assert_eq!(model, "mistral");
                assert!(url.ends_with("/api/chat"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_client_error_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'mistral' not found"))
            .expect(4)
            .mount(&server)
            .await;

        let err = transport(&server, 3)
            .request(&payload(false), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Connectivity { attempts: 4, .. }));
        assert!(err.remedy().unwrap().contains("ollama pull mistral"));
    }

    #[tokio::test]
    async fn test_timeout_is_per_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(DONE_BODY)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let opts = CallOptions::new(Duration::from_millis(50));
        let err = transport(&server, 1)
            .request(&payload(false), &opts)
            .await
            .unwrap_err();
        match err {
            BridgeError::Connectivity {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "timed out after 50ms");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport(&server, 3)
            .request(&payload(false), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Nothing listens on port 9 (discard) in the test environment
        let config = BridgeConfig {
            base_url: "http://127.0.0.1:9/api".into(),
            ..BridgeConfig::default()
        };
        let transport = HttpTransport::new(config).unwrap().with_retry_policy(fast_policy(1));
        let err = transport.request(&payload(false), &options()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connectivity { attempts: 2, .. }));
        assert!(!transport.health_check().await);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let slow = RetryPolicy {
            max_retries: 5,
            base: Duration::from_secs(30),
            max: Duration::from_secs(30),
        };
        let transport = transport(&server, 0).with_retry_policy(slow);
        let cancel = CancellationToken::new();
        let opts = options().with_cancel(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = transport.request(&payload(false), &opts).await.unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_frame() {
        let server = MockServer::start().await;
        let body = concat!(
            r#"{"model":"mistral","message":{"content":"Hel"},"done":false}"#, "\n",
            "{\"model\": broken\n",
            r#"{"model":"mistral","message":{"content":"lo"},"done":true,"done_reason":"stop"}"#, "\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = transport(&server, 0).stream(&payload(true), &options()).await.unwrap();
        let frames: Vec<_> = stream.collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().message.as_ref().unwrap().content, "Hel");
        assert!(frames[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_stream_retries_before_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"done\":true}\n"))
            .mount(&server)
            .await;

        let stream = transport(&server, 2).stream(&payload(true), &options()).await.unwrap();
        let frames: Vec<_> = stream.collect().await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"models":[{"name":"mistral:latest","model":"mistral:latest","size":4100000000},{"name":"hermes3:8b"}]}"#,
            ))
            .mount(&server)
            .await;

        let transport = transport(&server, 0);
        let models = transport.list_models(&options()).await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "mistral:latest");
        assert_eq!(models[0].size, Some(4_100_000_000));
        assert_eq!(models[1].model, "");
        assert!(transport.health_check().await);
    }

    #[tokio::test]
    async fn test_list_models_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        assert!(transport(&server, 0).list_models(&options()).await.unwrap().is_empty());
    }
}
