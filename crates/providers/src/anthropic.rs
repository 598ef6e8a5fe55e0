//! Anthropic Messages API provider.
//!
//! One client serves three backends that differ only in data:
//! - **Direct**: `x-api-key` auth, betas in the `anthropic-beta` header,
//!   SSE framing, prompt caching.
//! - **Vertex AI**: bearer auth, model in the URL, betas in the body, SSE.
//! - **Bedrock**: bearer auth, model in the URL, betas in the body, AWS
//!   event-stream framing.
//!
//! Opening an exchange is retried for transient failures. Once the stream is
//! open, events are decoded on a spawned task and delivered over a channel.

use async_trait::async_trait;
use futures::StreamExt;
use operative_core::error::ProviderError;
use operative_core::message::Message;
use operative_core::provider::*;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event_stream::{EventStreamDecoder, frame_to_event};
use crate::sse::{SseDecoder, parse_event};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const VERTEX_VERSION: &str = "vertex-2023-10-16";
const BEDROCK_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_RETRIES: u32 = 4;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Where requests go and how they authenticate.
#[derive(Clone)]
pub enum Backend {
    Direct {
        base_url: String,
        api_key: String,
    },
    Vertex {
        base_url: String,
        project_id: String,
        region: String,
        access_token: String,
    },
    Bedrock {
        base_url: String,
        bearer_token: String,
    },
}

impl Backend {
    pub fn direct(api_key: impl Into<String>) -> Self {
        Self::Direct {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
        }
    }

    pub fn vertex(
        project_id: impl Into<String>,
        region: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let region = region.into();
        let base_url = if region == "global" {
            "https://aiplatform.googleapis.com/v1".to_string()
        } else {
            format!("https://{region}-aiplatform.googleapis.com/v1")
        };
        Self::Vertex {
            base_url,
            project_id: project_id.into(),
            region,
            access_token: access_token.into(),
        }
    }

    pub fn bedrock(region: &str, bearer_token: impl Into<String>) -> Self {
        Self::Bedrock {
            base_url: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            bearer_token: bearer_token.into(),
        }
    }

    /// Point the backend at a different host (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        match &mut self {
            Self::Direct { base_url, .. }
            | Self::Vertex { base_url, .. }
            | Self::Bedrock { base_url, .. } => *base_url = url,
        }
        self
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "anthropic",
            Self::Vertex { .. } => "vertex",
            Self::Bedrock { .. } => "bedrock",
        }
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_prompt_caching: matches!(self, Self::Direct { .. }),
            supports_beta_headers: true,
        }
    }

    fn framing(&self) -> Framing {
        match self {
            Self::Bedrock { .. } => Framing::EventStream,
            Self::Direct { .. } | Self::Vertex { .. } => Framing::Sse,
        }
    }

    pub fn url(&self, model: &str) -> String {
        match self {
            Self::Direct { base_url, .. } => format!("{base_url}/v1/messages"),
            Self::Vertex {
                base_url,
                project_id,
                region,
                ..
            } => format!(
                "{base_url}/projects/{project_id}/locations/{region}/publishers/anthropic/models/{model}:streamRawPredict"
            ),
            Self::Bedrock { base_url, .. } => {
                format!("{base_url}/model/{model}/invoke-with-response-stream")
            }
        }
    }

    /// The JSON body for `request`.
    pub fn body(&self, request: &ProviderRequest) -> serde_json::Value {
        let mut body = json!({
            "max_tokens": request.max_tokens,
            "messages": wire_messages(&request.messages),
        });
        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        if let Some(thinking) = &request.thinking {
            body["thinking"] = json!(thinking);
        }

        match self {
            Self::Direct { .. } => {
                body["model"] = json!(request.model);
                body["stream"] = json!(true);
            }
            Self::Vertex { .. } => {
                body["anthropic_version"] = json!(VERTEX_VERSION);
                body["stream"] = json!(true);
            }
            Self::Bedrock { .. } => {
                body["anthropic_version"] = json!(BEDROCK_VERSION);
            }
        }
        if !matches!(self, Self::Direct { .. }) && !request.betas.is_empty() {
            body["anthropic_beta"] = json!(request.betas);
        }
        body
    }

    /// Request headers, credentials included.
    pub fn headers(&self, request: &ProviderRequest) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        match self {
            Self::Direct { api_key, .. } => {
                headers.push(("x-api-key".into(), api_key.clone()));
                headers.push(("anthropic-version".into(), ANTHROPIC_VERSION.into()));
                headers.push(("accept".into(), "text/event-stream".into()));
                if !request.betas.is_empty() {
                    headers.push(("anthropic-beta".into(), request.betas.join(",")));
                }
            }
            Self::Vertex { access_token, .. } => {
                headers.push(("authorization".into(), format!("Bearer {access_token}")));
                headers.push(("accept".into(), "text/event-stream".into()));
            }
            Self::Bedrock { bearer_token, .. } => {
                headers.push(("authorization".into(), format!("Bearer {bearer_token}")));
                headers.push(("accept".into(), "application/vnd.amazon.eventstream".into()));
            }
        }
        headers
    }
}

/// Role names on the wire are `user`/`assistant`; tool-result turns travel
/// as `user`.
fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.wire_name(), "content": m.content}))
        .collect()
}

fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| match k.as_str() {
            "x-api-key" | "authorization" => (k.clone(), "[REDACTED]".to_string()),
            _ => (k.clone(), v.clone()),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Framing {
    Sse,
    EventStream,
}

enum Decoder {
    Sse(SseDecoder),
    EventStream(EventStreamDecoder),
}

impl Decoder {
    fn new(framing: Framing) -> Self {
        match framing {
            Framing::Sse => Self::Sse(SseDecoder::new()),
            Framing::EventStream => Self::EventStream(EventStreamDecoder::new()),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, ProviderError> {
        let mut events = Vec::new();
        match self {
            Self::Sse(decoder) => {
                for data in decoder.push(chunk) {
                    events.extend(parse_event(&data)?);
                }
            }
            Self::EventStream(decoder) => {
                for frame in decoder.push(chunk)? {
                    events.extend(frame_to_event(&frame)?);
                }
            }
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        match self {
            Self::Sse(decoder) => match decoder.finish() {
                Some(data) => Ok(parse_event(&data)?.into_iter().collect()),
                None => Ok(Vec::new()),
            },
            Self::EventStream(_) => Ok(Vec::new()),
        }
    }
}

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    backend: Backend,
    client: reqwest::Client,
    max_retries: u32,
    retry_base: Duration,
}

impl AnthropicProvider {
    pub fn new(backend: Backend) -> Result<Self, ProviderError> {
        // No total timeout: a long thinking stream legitimately runs for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            backend,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Override the retry count and the first backoff step.
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = base_delay;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Delay before retry number `attempt` (0-based).
    fn retry_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs
            && secs <= MAX_RETRY_AFTER_SECS
        {
            return Duration::from_secs(secs);
        }
        self.retry_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY)
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, (ProviderError, Option<ResponseInfo>)> {
        let mut builder = self.client.post(url).json(body);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            let err = if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            };
            (err, None)
        })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let info = response_info(&response);
        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err((status_error(status, retry_after, &body), Some(info)))
    }
}

fn response_info(response: &reqwest::Response) -> ResponseInfo {
    ResponseInfo {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
    }
}

/// `retry-after-ms` wins over `retry-after`; only delta-seconds are honored.
fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(ms) = get("retry-after-ms").and_then(|v| v.trim().parse::<f64>().ok()) {
        return Some((ms / 1000.0).ceil().max(0.0) as u64);
    }
    get("retry-after").and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: u16, retry_after: Option<u64>, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after,
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

/// Decode the response body on a background task.
fn spawn_reader(response: reqwest::Response, framing: Framing) -> EventReceiver {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut decoder = Decoder::new(framing);

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            let events = match decoder.push(&bytes) {
                Ok(events) => events,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for event in events {
                let stop = matches!(event, StreamEvent::MessageStop);
                if tx.send(Ok(event)).await.is_err() {
                    // Receiver dropped; nobody is listening.
                    return;
                }
                if stop {
                    return;
                }
            }
        }

        match decoder.finish() {
            Ok(events) => {
                for event in events {
                    let stop = matches!(event, StreamEvent::MessageStop);
                    if tx.send(Ok(event)).await.is_err() || stop {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }

        let _ = tx
            .send(Err(ProviderError::StreamInterrupted(
                "stream ended before message_stop".into(),
            )))
            .await;
    });

    rx
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.backend.capabilities()
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamResponse, ExchangeFailure> {
        let url = self.backend.url(&request.model);
        let body = self.backend.body(&request);
        let headers = self.backend.headers(&request);
        let request_info = RequestInfo {
            method: "POST".into(),
            url: url.clone(),
            headers: redact_headers(&headers),
            body: body.clone(),
        };

        debug!(
            provider = self.backend.name(),
            model = %request.model,
            messages = request.messages.len(),
            betas = ?request.betas,
            "Sending streaming request"
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &headers, &body).await {
                Ok(response) => {
                    let response_info = response_info(&response);
                    let events = spawn_reader(response, self.backend.framing());
                    return Ok(StreamResponse {
                        request: request_info,
                        response: response_info,
                        events,
                    });
                }
                Err((error, response)) => {
                    if error.is_retryable() && attempt < self.max_retries {
                        let delay = self.retry_delay(attempt, error.retry_after_secs());
                        attempt += 1;
                        info!(
                            provider = self.backend.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(provider = self.backend.name(), error = %error, "Request failed");
                    return Err(ExchangeFailure {
                        request: Some(request_info),
                        response,
                        error,
                    });
                }
            }
        }
    }
}
