//! AWS event-stream framing used by Bedrock's `invoke-with-response-stream`.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! total_len u32 | headers_len u32 | prelude_crc u32 | headers | payload | message_crc u32
//! ```
//!
//! CRCs are not verified.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use operative_core::error::ProviderError;
use operative_core::provider::StreamEvent;

use crate::sse::parse_event;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| match v {
            HeaderValue::String(s) if k == name => Some(s.as_str()),
            _ => None,
        })
    }
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete frame.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, ProviderError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while self.buffer.len() >= PRELUDE_LEN {
            let total_len = read_u32(&self.buffer, 0) as usize;
            let headers_len = read_u32(&self.buffer, 4) as usize;
            if total_len < PRELUDE_LEN + TRAILER_LEN + headers_len || total_len > MAX_FRAME_LEN {
                return Err(ProviderError::InvalidResponse(format!(
                    "malformed event-stream frame (length {total_len}, headers {headers_len})"
                )));
            }
            if self.buffer.len() < total_len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
            let headers_end = PRELUDE_LEN + headers_len;
            let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
            let payload = frame[headers_end..total_len - TRAILER_LEN].to_vec();
            frames.push(Frame { headers, payload });
        }

        Ok(frames)
    }

    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Turn a Bedrock frame into a stream event.
///
/// `chunk` frames wrap the Messages API event as base64 JSON. Exception
/// frames become errors; anything else is skipped.
pub fn frame_to_event(frame: &Frame) -> Result<Option<StreamEvent>, ProviderError> {
    match frame.header(":message-type") {
        Some("exception") | Some("error") => {
            let kind = frame
                .header(":exception-type")
                .or_else(|| frame.header(":error-code"))
                .unwrap_or("exception");
            let body: serde_json::Value =
                serde_json::from_slice(&frame.payload).unwrap_or_default();
            let message = body["message"]
                .as_str()
                .or_else(|| body["Message"].as_str())
                .unwrap_or("no message")
                .to_string();
            Err(exception_error(kind, message))
        }
        Some("event") if frame.header(":event-type") == Some("chunk") => {
            let body: serde_json::Value = serde_json::from_slice(&frame.payload)
                .map_err(|e| ProviderError::InvalidResponse(format!("bad chunk payload: {e}")))?;
            let encoded = body["bytes"].as_str().ok_or_else(|| {
                ProviderError::InvalidResponse("chunk payload has no 'bytes'".into())
            })?;
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|e| ProviderError::InvalidResponse(format!("bad chunk encoding: {e}")))?;
            parse_event(&String::from_utf8_lossy(&decoded))
        }
        _ => Ok(None),
    }
}

fn exception_error(kind: &str, message: String) -> ProviderError {
    match kind {
        "throttlingException" => ProviderError::RateLimited {
            retry_after_secs: None,
        },
        "modelStreamErrorException" | "internalServerException" => ProviderError::ApiError {
            status_code: 500,
            message,
        },
        "serviceUnavailableException" => ProviderError::ApiError {
            status_code: 503,
            message,
        },
        "validationException" => ProviderError::InvalidResponse(message),
        _ => ProviderError::StreamInterrupted(format!("{kind}: {message}")),
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn parse_headers(mut buf: &[u8]) -> Result<Vec<(String, HeaderValue)>, ProviderError> {
    let truncated = || ProviderError::InvalidResponse("truncated event-stream header".into());
    let mut headers = Vec::new();

    while !buf.is_empty() {
        let name_len = *buf.first().ok_or_else(truncated)? as usize;
        let name = buf.get(1..1 + name_len).ok_or_else(truncated)?;
        let name = String::from_utf8_lossy(name).into_owned();
        let value_type = *buf.get(1 + name_len).ok_or_else(truncated)?;
        buf = &buf[2 + name_len..];

        let (value, used) = match value_type {
            0 => (HeaderValue::Bool(true), 0),
            1 => (HeaderValue::Bool(false), 0),
            2 => (HeaderValue::Int(take::<1>(buf)?[0] as i8 as i64), 1),
            3 => (HeaderValue::Int(i16::from_be_bytes(take::<2>(buf)?) as i64), 2),
            4 => (HeaderValue::Int(i32::from_be_bytes(take::<4>(buf)?) as i64), 4),
            5 => (HeaderValue::Int(i64::from_be_bytes(take::<8>(buf)?)), 8),
            6 | 7 => {
                let len = u16::from_be_bytes(take::<2>(buf)?) as usize;
                let bytes = buf.get(2..2 + len).ok_or_else(truncated)?;
                let value = if value_type == 6 {
                    HeaderValue::Bytes(bytes.to_vec())
                } else {
                    HeaderValue::String(String::from_utf8_lossy(bytes).into_owned())
                };
                (value, 2 + len)
            }
            8 => (HeaderValue::Timestamp(i64::from_be_bytes(take::<8>(buf)?)), 8),
            9 => (HeaderValue::Uuid(take::<16>(buf)?), 16),
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "unknown event-stream header type {other}"
                )));
            }
        };
        buf = &buf[used..];
        headers.push((name, value));
    }

    Ok(headers)
}

fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N], ProviderError> {
    buf.get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ProviderError::InvalidResponse("truncated event-stream header".into()))
}
