//! Loop events for front-ends.
//!
//! `LoopEvent` turns observer callbacks into owned, serializable values that
//! a UI task can consume from a channel while the loop keeps running.

use operative_core::error::ProviderError;
use operative_core::message::ContentBlock;
use operative_core::provider::{RequestInfo, ResponseInfo};
use operative_core::tool::ToolResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::observer::LoopObserver;

/// Events emitted by the loop while it runs.
///
/// - `text`: streamed text from the model
/// - `thinking`: streamed reasoning
/// - `tool_use`: the model requested a tool, with its complete input
/// - `tool_result`: a tool finished
/// - `api_exchange`: one provider exchange, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Text {
        text: String,
    },

    Thinking {
        thinking: String,
    },

    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        tool_use_id: String,
        result: ToolResult,
    },

    ApiExchange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<RequestInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Set when the provider rate-limited the exchange and said when to retry.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl LoopEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::ApiExchange { .. } => "api_exchange",
        }
    }

    /// The event for a streamed output block, if it is one a UI shows.
    pub fn from_output(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::Text { text, .. } => Some(Self::Text { text: text.clone() }),
            ContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => Some(Self::Thinking {
                thinking: thinking.clone(),
            }),
            ContentBlock::ToolUse {
                id, name, input, ..
            } => Some(Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        }
    }
}

/// Forwards every notification into an unbounded channel.
///
/// Sending never blocks the loop. Once the receiver is dropped, events are
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LoopEvent) {
        let _ = self.tx.send(event);
    }
}

impl LoopObserver for ChannelObserver {
    fn on_output(&self, block: &ContentBlock) {
        if let Some(event) = LoopEvent::from_output(block) {
            self.send(event);
        }
    }

    fn on_tool_output(&self, result: &ToolResult, tool_use_id: &str) {
        self.send(LoopEvent::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            result: result.clone(),
        });
    }

    fn on_api_exchange(
        &self,
        request: Option<&RequestInfo>,
        response: Option<&ResponseInfo>,
        error: Option<&ProviderError>,
    ) {
        self.send(LoopEvent::ApiExchange {
            request: request.cloned(),
            response: response.cloned(),
            error: error.map(ToString::to_string),
            retry_after_secs: error.and_then(ProviderError::retry_after_secs),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serialization_text() {
        let event = LoopEvent::Text {
            text: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""text":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_use() {
        let event = LoopEvent::ToolUse {
            id: "toolu_1".into(),
            name: "bash".into(),
            input: json!({"command": "ls"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_use""#));
        assert!(json.contains(r#""name":"bash""#));
        assert_eq!(event.event_type(), "tool_use");
    }

    #[test]
    fn event_serialization_exchange_omits_missing_parts() {
        let event = LoopEvent::ApiExchange {
            request: None,
            response: None,
            error: Some("boom".into()),
            retry_after_secs: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "api_exchange", "error": "boom"}));
    }

    #[test]
    fn empty_thinking_and_results_are_not_outputs() {
        let empty = ContentBlock::Thinking {
            thinking: String::new(),
            signature: Some("sig".into()),
        };
        assert_eq!(LoopEvent::from_output(&empty), None);
        assert_eq!(
            LoopEvent::from_output(&ContentBlock::tool_error("t", "x")),
            None
        );
    }

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_output(&ContentBlock::text("hi"));
        observer.on_tool_output(&ToolResult::output("ok"), "toolu_1");
        observer.on_api_exchange(
            None,
            None,
            Some(&ProviderError::RateLimited {
                retry_after_secs: Some(7),
            }),
        );

        assert_eq!(rx.try_recv().unwrap().event_type(), "text");
        assert!(matches!(
            rx.try_recv().unwrap(),
            LoopEvent::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_1"
        ));
        let LoopEvent::ApiExchange {
            retry_after_secs, ..
        } = rx.try_recv().unwrap()
        else {
            panic!("expected an exchange event");
        };
        assert_eq!(retry_after_secs, Some(7));
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_output(&ContentBlock::text("nobody listening"));
    }
}
