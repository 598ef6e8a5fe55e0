//! Tool dispatch.
//!
//! Runs every tool the model asked for, one after another, and turns each
//! outcome into a `tool_result` block. A failing or panicking tool becomes an
//! error result; nothing raised by a tool reaches the loop.

use futures::FutureExt;
use operative_core::message::{ContentBlock, ImageSource, ToolResultContent, ToolResultPart};
use operative_core::tool::{ToolCollection, ToolResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

use crate::interrupt::InterruptHandle;
use crate::observer::LoopObserver;

/// Error text for tool calls that were never run because the user interrupted.
pub const INTERRUPTED_TOOL_ERROR: &str = "human stopped or interrupted tool execution";

fn with_system_note(result: &ToolResult, text: &str) -> String {
    match &result.system {
        Some(system) => format!("<system>{system}</system>\n{text}"),
        None => text.to_string(),
    }
}

/// Convert a tool outcome into the block sent back to the model.
pub fn make_api_tool_result(result: &ToolResult, tool_use_id: &str) -> ContentBlock {
    let (content, is_error) = match &result.error {
        Some(error) => (
            ToolResultContent::Text(with_system_note(result, error)),
            true,
        ),
        None => {
            let mut parts = Vec::new();
            if result.output.is_some() || result.system.is_some() {
                parts.push(ToolResultPart::Text {
                    text: with_system_note(result, result.output.as_deref().unwrap_or_default()),
                });
            }
            if let Some(image) = &result.base64_image {
                parts.push(ToolResultPart::Image {
                    source: ImageSource::png(image.clone()),
                });
            }
            (ToolResultContent::Parts(parts), false)
        }
    };

    ContentBlock::ToolResult {
        tool_use_id: tool_use_id.to_string(),
        content,
        is_error,
        cache_control: None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one tool, containing every failure mode.
async fn run_contained(tools: &ToolCollection, name: &str, input: &serde_json::Value) -> ToolResult {
    match AssertUnwindSafe(tools.run(name, input.clone()))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(tool = %name, error = %e, "Tool failed");
            ToolResult::error(e.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(tool = %name, panic = %message, "Tool panicked");
            ToolResult::error(format!("tool {name} panicked: {message}"))
        }
    }
}

/// Run the tool-use blocks of one assistant turn, in order.
///
/// Returns one result block per tool-use block, with matching ids. The
/// interrupt flag is checked before each tool; once it is set, the remaining
/// calls are answered with [`INTERRUPTED_TOOL_ERROR`] without running.
pub async fn dispatch(
    tools: &ToolCollection,
    blocks: &[ContentBlock],
    observer: &dyn LoopObserver,
    interrupt: &InterruptHandle,
) -> Vec<ContentBlock> {
    let mut results = Vec::new();

    for (id, name, input) in blocks.iter().filter_map(ContentBlock::as_tool_use) {
        let result = if interrupt.is_interrupted() {
            debug!(tool = %name, tool_use_id = %id, "Skipping tool after interrupt");
            ToolResult::error(INTERRUPTED_TOOL_ERROR)
        } else {
            info!(tool = %name, tool_use_id = %id, "Running tool");
            run_contained(tools, name, input).await
        };

        observer.on_tool_output(&result, id);
        results.push(make_api_tool_result(&result, id));
    }

    results
}
