//! Provider trait: the abstraction over model backends.
//!
//! A Provider takes an assembled [`ProviderRequest`] and yields the typed
//! streaming events of one response. All backends speak the same event
//! vocabulary; what differs between them is declared up front as
//! [`ProviderCapabilities`] so the loop can configure itself from data
//! instead of branching on the backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{CacheControl, Message};

/// What a backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Prompt caching (cache breakpoints and the caching beta).
    pub supports_prompt_caching: bool,
    /// Beta feature flags, however the backend transports them.
    pub supports_beta_headers: bool,
}

/// A system prompt block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".into(),
            text: text.into(),
            cache_control: None,
        }
    }
}

/// Extended-thinking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ThinkingConfig {
    Enabled { budget_tokens: u32 },
}

/// One fully assembled request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Vec<SystemBlock>,
    /// Tool definitions, already in provider shape.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub betas: Vec<String>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

/// Message header carried by `message_start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStart {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

/// The opening shape of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// An incremental piece of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

/// Top-level fields of `message_delta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Streaming events, an open tagged union.
///
/// Tags this crate does not know deserialize to [`StreamEvent::Unknown`]
/// rather than failing; event vocabularies grow over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

/// Request-side details of an exchange, for the observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    /// Header pairs with credentials redacted.
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// Response-side details of an exchange, for the observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Receiver half of a response stream.
pub type EventReceiver = mpsc::Receiver<Result<StreamEvent, ProviderError>>;

/// An opened streaming exchange.
pub struct StreamResponse {
    pub request: RequestInfo,
    pub response: ResponseInfo,
    pub events: EventReceiver,
}

/// A failed attempt to open an exchange, with whatever context was captured.
#[derive(Debug, Clone)]
pub struct ExchangeFailure {
    pub request: Option<RequestInfo>,
    pub response: Option<ResponseInfo>,
    pub error: ProviderError,
}

impl From<ProviderError> for ExchangeFailure {
    fn from(error: ProviderError) -> Self {
        Self {
            request: None,
            response: None,
            error,
        }
    }
}

/// The core Provider trait.
///
/// `stream` performs one exchange; any retrying happens inside it. Once it
/// returns, the events end with `MessageStop`, an `Err`, or the channel
/// closing.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "anthropic", "vertex").
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn stream(&self, request: ProviderRequest) -> Result<StreamResponse, ExchangeFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_events() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "{\"command\":"}
        }))
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: "{\"command\":".into()
                }
            }
        );

        let start: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}
        }))
        .unwrap();
        assert!(matches!(
            start,
            StreamEvent::ContentBlockStart {
                content_block: StartBlock::ToolUse { .. },
                ..
            }
        ));
    }

    #[test]
    fn unknown_tags_do_not_fail() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "brand_new_event"})).unwrap();
        assert_eq!(event, StreamEvent::Unknown);

        let delta: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "citations_delta"}
        }))
        .unwrap();
        assert_eq!(
            delta,
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::Unknown
            }
        );
    }

    #[test]
    fn message_delta_carries_stop_reason() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use", "stop_sequence": null},
            "usage": {"output_tokens": 42}
        }))
        .unwrap();
        match event {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
                assert_eq!(usage.unwrap().output_tokens, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn request_serializes_thinking_and_betas() {
        let request = ProviderRequest {
            model: "claude-3-7-sonnet-20250219".into(),
            messages: vec![Message::user("hi")],
            system: vec![SystemBlock::text("be brief")],
            tools: vec![],
            betas: vec!["output-128k-2025-02-19".into()],
            max_tokens: 1024,
            thinking: Some(ThinkingConfig::Enabled { budget_tokens: 512 }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["thinking"], json!({"type": "enabled", "budget_tokens": 512}));
        assert_eq!(value["system"][0]["type"], "text");
        assert!(value.get("tools").is_none());
    }
}
