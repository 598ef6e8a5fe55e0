//! Stream interpretation.
//!
//! Consumes provider events in order, forwards what a UI can show as soon as
//! it arrives, and assembles the authoritative assistant turn. Events this
//! crate does not recognise are skipped.

use operative_core::message::ContentBlock;
use operative_core::provider::{ContentDelta, StartBlock, StreamEvent, Usage};
use std::collections::BTreeMap;
use tracing::{trace, warn};

use crate::observer::LoopObserver;

/// A block still being streamed.
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    RedactedThinking(String),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        json: String,
        closed: bool,
    },
}

impl PartialBlock {
    fn from_start(block: StartBlock) -> Option<Self> {
        match block {
            StartBlock::Text { text } => Some(Self::Text(text)),
            StartBlock::Thinking {
                thinking,
                signature,
            } => Some(Self::Thinking {
                thinking,
                signature,
            }),
            StartBlock::RedactedThinking { data } => Some(Self::RedactedThinking(data)),
            StartBlock::ToolUse { id, name, input } => Some(Self::ToolUse {
                id,
                name,
                input,
                json: String::new(),
                closed: false,
            }),
            StartBlock::Unknown => None,
        }
    }

    /// Resolve the accumulated tool input.
    fn close(&mut self) {
        if let Self::ToolUse {
            input,
            json,
            closed,
            name,
            ..
        } = self
        {
            if *closed {
                return;
            }
            *closed = true;
            if !json.trim().is_empty() {
                match serde_json::from_str(json) {
                    Ok(value) => *input = value,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Tool input is not valid JSON, using {{}}");
                        *input = serde_json::json!({});
                    }
                }
            }
            if input.is_null() {
                *input = serde_json::json!({});
            }
        }
    }

    fn into_block(mut self) -> Option<ContentBlock> {
        self.close();
        match self {
            Self::Text(text) if text.is_empty() => None,
            Self::Text(text) => Some(ContentBlock::text(text)),
            Self::Thinking {
                thinking,
                signature,
            } => {
                if thinking.is_empty() && signature.is_none() {
                    None
                } else {
                    Some(ContentBlock::Thinking {
                        thinking,
                        signature,
                    })
                }
            }
            Self::RedactedThinking(data) => Some(ContentBlock::RedactedThinking { data }),
            Self::ToolUse {
                id, name, input, ..
            } => Some(ContentBlock::tool_use(id, name, input)),
        }
    }

    fn tool_use_block(&self) -> Option<ContentBlock> {
        match self {
            Self::ToolUse {
                id, name, input, ..
            } => Some(ContentBlock::tool_use(id.clone(), name.clone(), input.clone())),
            _ => None,
        }
    }
}

/// The finished assistant turn and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpretedMessage {
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl InterpretedMessage {
    pub fn tool_use_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.as_tool_use().is_some()).count()
    }
}

/// Accumulates one streamed response.
#[derive(Debug, Default)]
pub struct StreamInterpreter {
    blocks: BTreeMap<usize, PartialBlock>,
    stop_reason: Option<String>,
    usage: Usage,
    complete: bool,
}

impl StreamInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Apply one event, notifying `observer` of displayable output.
    pub fn apply(&mut self, event: StreamEvent, observer: &dyn LoopObserver) {
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage = message.usage;
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let Some(block) = PartialBlock::from_start(content_block) else {
                    trace!(index, "Skipping unknown content block");
                    return;
                };
                match &block {
                    PartialBlock::Text(text) if !text.is_empty() => {
                        observer.on_output(&ContentBlock::text(text.clone()));
                    }
                    PartialBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                        observer.on_output(&ContentBlock::Thinking {
                            thinking: thinking.clone(),
                            signature: None,
                        });
                    }
                    _ => {}
                }
                self.blocks.insert(index, block);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = self.blocks.get_mut(&index) else {
                    trace!(index, "Delta for unknown block");
                    return;
                };
                match (block, delta) {
                    (PartialBlock::Text(text), ContentDelta::TextDelta { text: delta }) => {
                        if !delta.is_empty() {
                            observer.on_output(&ContentBlock::text(delta.clone()));
                        }
                        text.push_str(&delta);
                    }
                    (
                        PartialBlock::Thinking { thinking, .. },
                        ContentDelta::ThinkingDelta { thinking: delta },
                    ) => {
                        if !delta.is_empty() {
                            observer.on_output(&ContentBlock::Thinking {
                                thinking: delta.clone(),
                                signature: None,
                            });
                        }
                        thinking.push_str(&delta);
                    }
                    (
                        PartialBlock::Thinking { signature, .. },
                        ContentDelta::SignatureDelta { signature: delta },
                    ) => {
                        signature.get_or_insert_with(String::new).push_str(&delta);
                    }
                    (
                        PartialBlock::ToolUse { json, .. },
                        ContentDelta::InputJsonDelta { partial_json },
                    ) => {
                        json.push_str(&partial_json);
                    }
                    (_, delta) => trace!(index, ?delta, "Ignoring delta"),
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(block) = self.blocks.get_mut(&index) {
                    block.close();
                    if let Some(tool_use) = block.tool_use_block() {
                        observer.on_output(&tool_use);
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::MessageStop => self.complete = true,
            StreamEvent::Ping | StreamEvent::Unknown => {}
        }
    }

    /// The assistant turn, in block-index order.
    pub fn finish(self) -> InterpretedMessage {
        InterpretedMessage {
            blocks: self
                .blocks
                .into_values()
                .filter_map(PartialBlock::into_block)
                .collect(),
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingObserver, events};
    use serde_json::json;

    fn run(events: Vec<StreamEvent>) -> (InterpretedMessage, RecordingObserver) {
        let observer = RecordingObserver::default();
        let mut interpreter = StreamInterpreter::new();
        for event in events {
            interpreter.apply(event, &observer);
        }
        assert!(interpreter.is_complete());
        (interpreter.finish(), observer)
    }

    #[test]
    fn text_deltas_are_forwarded_unbuffered() {
        let (message, observer) = run(events::text_reply(&["Hel", "lo"]));
        assert_eq!(observer.texts(), vec!["Hel", "lo"]);
        assert_eq!(message.blocks, vec![ContentBlock::text("Hello")]);
        assert_eq!(message.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn tool_use_fires_once_with_final_input() {
        let (message, observer) = run(events::tool_reply(
            Some("Checking"),
            &[("toolu_1", "bash", r#"{"command": "ls"}"#)],
        ));
        let outputs = observer.outputs();
        let tool_uses: Vec<_> = outputs.iter().filter(|b| b.as_tool_use().is_some()).collect();
        assert_eq!(tool_uses.len(), 1);
        assert_eq!(
            tool_uses[0].as_tool_use().unwrap().2,
            &json!({"command": "ls"})
        );
        assert_eq!(message.tool_use_count(), 1);
        assert_eq!(message.blocks[0], ContentBlock::text("Checking"));
    }

    #[test]
    fn thinking_is_kept_with_signature_and_empty_deltas_are_skipped() {
        let stream = vec![
            events::start(),
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: StartBlock::Thinking {
                    thinking: String::new(),
                    signature: None,
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::ThinkingDelta {
                    thinking: String::new(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::ThinkingDelta {
                    thinking: "Let me look.".into(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::SignatureDelta {
                    signature: "sig".into(),
                },
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageStop,
        ];
        let (message, observer) = run(stream);
        assert_eq!(observer.outputs().len(), 1);
        assert_eq!(
            message.blocks,
            vec![ContentBlock::Thinking {
                thinking: "Let me look.".into(),
                signature: Some("sig".into()),
            }]
        );
    }

    #[test]
    fn unknown_events_and_blocks_are_ignored() {
        let stream = vec![
            events::start(),
            StreamEvent::Unknown,
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: StartBlock::Unknown,
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::Unknown,
            },
            StreamEvent::ContentBlockDelta {
                index: 7,
                delta: ContentDelta::TextDelta { text: "orphan".into() },
            },
            StreamEvent::Ping,
            StreamEvent::MessageStop,
        ];
        let (message, observer) = run(stream);
        assert!(message.blocks.is_empty());
        assert!(observer.outputs().is_empty());
    }

    #[test]
    fn malformed_tool_json_becomes_empty_object() {
        let (message, _) = run(events::tool_reply(None, &[("toolu_9", "bash", "{\"command\": ")]));
        assert_eq!(message.blocks[0].as_tool_use().unwrap().2, &json!({}));
    }

    #[test]
    fn incomplete_stream_is_not_complete() {
        let observer = RecordingObserver::default();
        let mut interpreter = StreamInterpreter::new();
        interpreter.apply(events::start(), &observer);
        assert!(!interpreter.is_complete());
    }
}
