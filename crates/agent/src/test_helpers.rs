//! Shared test helpers for loop tests.

use async_trait::async_trait;
use operative_core::error::{ProviderError, ToolError};
use operative_core::message::ContentBlock;
use operative_core::provider::{
    ContentDelta, ExchangeFailure, MessageDeltaBody, MessageStart, Provider,
    ProviderCapabilities, ProviderRequest, RequestInfo, ResponseInfo, StartBlock, StreamEvent,
    StreamResponse, Usage,
};
use operative_core::tool::{Tool, ToolCollection, ToolGroup, ToolResult, ToolSource, ToolVersion};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::interrupt::InterruptHandle;
use crate::observer::LoopObserver;

/// Builders for common event sequences.
pub mod events {
    use super::*;

    pub fn start() -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessageStart {
                id: "msg_test".into(),
                model: "claude-test".into(),
                usage: Usage {
                    input_tokens: 10,
                    ..Usage::default()
                },
            },
        }
    }

    fn finish(stop_reason: &str) -> [StreamEvent; 2] {
        [
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason.into()),
                    stop_sequence: None,
                },
                usage: Some(Usage {
                    output_tokens: 5,
                    ..Usage::default()
                }),
            },
            StreamEvent::MessageStop,
        ]
    }

    /// A text-only reply streamed as `chunks`.
    pub fn text_reply(chunks: &[&str]) -> Vec<StreamEvent> {
        let mut out = vec![
            start(),
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: StartBlock::Text {
                    text: String::new(),
                },
            },
        ];
        out.extend(chunks.iter().map(|chunk| StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: chunk.to_string(),
            },
        }));
        out.push(StreamEvent::ContentBlockStop { index: 0 });
        out.extend(finish("end_turn"));
        out
    }

    /// A reply with optional leading text and one tool call per
    /// `(id, name, input_json)`.
    pub fn tool_reply(text: Option<&str>, calls: &[(&str, &str, &str)]) -> Vec<StreamEvent> {
        let mut out = vec![start()];
        let mut index = 0;
        if let Some(text) = text {
            out.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::Text {
                    text: String::new(),
                },
            });
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta { text: text.into() },
            });
            out.push(StreamEvent::ContentBlockStop { index });
            index += 1;
        }
        for (id, name, json) in calls {
            out.push(StreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: serde_json::json!({}),
                },
            });
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: json.to_string(),
                },
            });
            out.push(StreamEvent::ContentBlockStop { index });
            index += 1;
        }
        out.extend(finish("tool_use"));
        out
    }
}

/// One scripted exchange.
pub enum Script {
    /// Deliver these events, then close the stream.
    Events(Vec<StreamEvent>),
    /// Fail to open the exchange.
    Fail(ProviderError),
    /// Deliver these events, then fail mid-stream.
    FailAfter(Vec<StreamEvent>, ProviderError),
    /// Deliver these events, then keep the stream open until it is dropped.
    Stall(Vec<StreamEvent>),
}

/// A provider that replays scripted exchanges in order and records requests.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    capabilities: ProviderCapabilities,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            capabilities: ProviderCapabilities {
                supports_prompt_caching: true,
                supports_beta_headers: true,
            },
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn request_info() -> RequestInfo {
    RequestInfo {
        method: "POST".into(),
        url: "scripted://v1/messages".into(),
        ..RequestInfo::default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamResponse, ExchangeFailure> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();

        let (events, tail, stall) = match script {
            Some(Script::Events(events)) => (events, None, false),
            Some(Script::FailAfter(events, error)) => (events, Some(error), false),
            Some(Script::Stall(events)) => (events, None, true),
            Some(Script::Fail(error)) => {
                return Err(ExchangeFailure {
                    request: Some(request_info()),
                    response: None,
                    error,
                });
            }
            None => {
                return Err(ProviderError::NotConfigured("script exhausted".into()).into());
            }
        };

        let (tx, rx) = mpsc::channel(events.len() + 2);
        for event in events {
            let _ = tx.try_send(Ok(event));
        }
        if let Some(error) = tail {
            let _ = tx.try_send(Err(error));
        }
        if stall {
            tokio::spawn(async move { tx.closed().await });
        }

        Ok(StreamResponse {
            request: request_info(),
            response: ResponseInfo {
                status: 200,
                headers: Vec::new(),
            },
            events: rx,
        })
    }
}

/// Records every notification.
#[derive(Default)]
pub struct RecordingObserver {
    outputs: Mutex<Vec<ContentBlock>>,
    tool_outputs: Mutex<Vec<(ToolResult, String)>>,
    exchanges: Mutex<Vec<(bool, bool, Option<ProviderError>)>>,
}

impl RecordingObserver {
    pub fn outputs(&self) -> Vec<ContentBlock> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.outputs()
            .into_iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn tool_outputs(&self) -> Vec<(ToolResult, String)> {
        self.tool_outputs.lock().unwrap().clone()
    }

    /// `(had_request, had_response, error)` per reported exchange.
    pub fn exchanges(&self) -> Vec<(bool, bool, Option<ProviderError>)> {
        self.exchanges.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ProviderError> {
        self.exchanges()
            .into_iter()
            .filter_map(|(_, _, error)| error)
            .collect()
    }
}

impl LoopObserver for RecordingObserver {
    fn on_output(&self, block: &ContentBlock) {
        self.outputs.lock().unwrap().push(block.clone());
    }

    fn on_tool_output(&self, result: &ToolResult, tool_use_id: &str) {
        self.tool_outputs
            .lock()
            .unwrap()
            .push((result.clone(), tool_use_id.to_string()));
    }

    fn on_api_exchange(
        &self,
        request: Option<&RequestInfo>,
        response: Option<&ResponseInfo>,
        error: Option<&ProviderError>,
    ) {
        self.exchanges.lock().unwrap().push((
            request.is_some(),
            response.is_some(),
            error.cloned(),
        ));
    }
}

/// Echoes `text`; fails without it.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn api_type(&self) -> &str {
        "echo_20250101"
    }
    async fn run(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        match input["text"].as_str() {
            Some(text) => Ok(ToolResult::output(text)),
            None => Err(ToolError::InvalidArguments("missing 'text'".into())),
        }
    }
}

struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "panic"
    }
    fn api_type(&self) -> &str {
        "panic_20250101"
    }
    async fn run(&self, _input: serde_json::Value) -> Result<ToolResult, ToolError> {
        panic!("display went away");
    }
}

/// Returns a tiny fake screenshot.
struct ScreenshotTool;

#[async_trait]
impl Tool for ScreenshotTool {
    fn name(&self) -> &str {
        "screenshot"
    }
    fn api_type(&self) -> &str {
        "screenshot_20250101"
    }
    async fn run(&self, _input: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::image("aW1hZ2U="))
    }
}

/// Raises the interrupt flag, as if the user pressed stop mid-batch.
struct InterruptingTool(InterruptHandle);

#[async_trait]
impl Tool for InterruptingTool {
    fn name(&self) -> &str {
        "interrupt"
    }
    fn api_type(&self) -> &str {
        "interrupt_20250101"
    }
    async fn run(&self, _input: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.0.interrupt();
        Ok(ToolResult::output("stopping"))
    }
}

pub fn test_tools() -> ToolCollection {
    ToolCollection::new(vec![
        Box::new(EchoTool),
        Box::new(PanicTool),
        Box::new(ScreenshotTool),
    ])
}

/// A tool source over the test tools.
#[derive(Default)]
pub struct TestTools {
    interrupt: Option<InterruptHandle>,
}

impl TestTools {
    /// Also register an `interrupt` tool that raises `handle`.
    pub fn with_interrupt(handle: InterruptHandle) -> Self {
        Self {
            interrupt: Some(handle),
        }
    }
}

impl ToolSource for TestTools {
    fn group(&self, version: ToolVersion) -> ToolGroup {
        let mut tools: Vec<Box<dyn Tool>> = vec![
            Box::new(EchoTool),
            Box::new(PanicTool),
            Box::new(ScreenshotTool),
        ];
        if let Some(handle) = &self.interrupt {
            tools.push(Box::new(InterruptingTool(handle.clone())));
        }
        ToolGroup {
            version,
            tools: ToolCollection::new(tools),
            beta_flag: Some(version.beta_flag().to_string()),
        }
    }
}
