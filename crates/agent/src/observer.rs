//! Notification sinks the loop reports through.

use operative_core::error::ProviderError;
use operative_core::message::ContentBlock;
use operative_core::provider::{RequestInfo, ResponseInfo};
use operative_core::tool::ToolResult;

/// Receives loop progress as it happens.
///
/// Calls are synchronous and made from the loop's own task; implementations
/// should hand work off rather than block.
pub trait LoopObserver: Send + Sync {
    /// Streamed model output: text and thinking deltas, and each tool-use
    /// block once its input is complete.
    fn on_output(&self, _block: &ContentBlock) {}

    /// The result of one tool call, before it is added to history.
    fn on_tool_output(&self, _result: &ToolResult, _tool_use_id: &str) {}

    /// One provider exchange. A failed exchange is reported once with the
    /// error and whatever context was captured.
    fn on_api_exchange(
        &self,
        _request: Option<&RequestInfo>,
        _response: Option<&ResponseInfo>,
        _error: Option<&ProviderError>,
    ) {
    }
}

/// Ignores everything.
pub struct NoopObserver;

impl LoopObserver for NoopObserver {}
