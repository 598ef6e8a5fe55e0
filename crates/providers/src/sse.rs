//! Server-sent events decoding for the Messages API stream.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks survive intact.

use operative_core::error::ProviderError;
use operative_core::provider::StreamEvent;
use tracing::trace;

/// Incremental SSE decoder yielding the `data` payload of each event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // `event:` duplicates the JSON `type` field; `id:`/`retry:` are unused.
        }

        events
    }

    /// Flush an event left unterminated at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                self.data.push(data.trim_start().to_string());
            }
        }
        (!self.data.is_empty()).then(|| std::mem::take(&mut self.data).join("\n"))
    }
}

/// Decode one event payload.
///
/// `Ok(None)` means the payload was not JSON and is skipped. An `error`
/// event becomes an `Err`.
pub fn parse_event(data: &str) -> Result<Option<StreamEvent>, ProviderError> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable stream payload");
            return Ok(None);
        }
    };

    if value["type"] == "error" {
        return Err(stream_error(&value["error"]));
    }

    match serde_json::from_value(value) {
        Ok(event) => Ok(Some(event)),
        Err(e) => {
            // A known tag with an unexpected shape; the vocabulary moved on.
            trace!(error = %e, data = %data, "Ignoring malformed stream event");
            Ok(None)
        }
    }
}

/// Map an in-stream `error` object to a provider error.
fn stream_error(error: &serde_json::Value) -> ProviderError {
    let kind = error["type"].as_str().unwrap_or("error");
    let message = error["message"].as_str().unwrap_or("unknown stream error");
    match kind {
        "overloaded_error" => ProviderError::ApiError {
            status_code: 529,
            message: message.to_string(),
        },
        "rate_limit_error" => ProviderError::RateLimited {
            retry_after_secs: None,
        },
        "api_error" => ProviderError::ApiError {
            status_code: 500,
            message: message.to_string(),
        },
        _ => ProviderError::StreamInterrupted(format!("{kind}: {message}")),
    }
}
