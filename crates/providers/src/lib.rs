//! LLM provider implementations for Operative.
//!
//! Every backend speaks the Anthropic Messages API and implements
//! `operative_core::Provider`. The router builds the configured one.

pub mod anthropic;
pub mod event_stream;
pub mod router;
pub mod sse;

pub use anthropic::{AnthropicProvider, Backend};
pub use router::build_from_config;
