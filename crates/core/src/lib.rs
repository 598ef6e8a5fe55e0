//! # Operative Core
//!
//! Domain types, traits, and error definitions for the Operative
//! computer-use agent. This crate has **no framework dependencies**: it
//! defines the conversation model, the tool contract and the provider
//! contract that every other crate implements against.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{
    CacheControl, ContentBlock, Conversation, ConversationId, ImageSource, Message,
    MessageContent, Role, ToolResultContent, ToolResultPart,
};
pub use provider::{
    ExchangeFailure, Provider, ProviderCapabilities, ProviderRequest, StreamEvent, StreamResponse,
    SystemBlock, ThinkingConfig,
};
pub use tool::{Tool, ToolCollection, ToolGroup, ToolResult, ToolSource, ToolVersion};
