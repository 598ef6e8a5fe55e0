//! Message and Conversation domain types.
//!
//! A [`Conversation`] is the single source of conversational truth: an ordered
//! list of role-tagged [`Message`]s whose content is either a plain string or
//! a sequence of [`ContentBlock`]s. The same shapes are serialized to the
//! provider, so what is stored is exactly what is sent.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool results produced by the loop
    Tool,
}

impl Role {
    /// Whether the provider sees this turn as a `user` turn.
    ///
    /// The Messages API only knows `user` and `assistant`; tool-result turns
    /// travel as `user` turns.
    pub fn is_user_side(self) -> bool {
        matches!(self, Self::User | Self::Tool)
    }

    /// The role name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::User | Self::Tool => "user",
        }
    }
}

/// Ephemeral prompt-cache breakpoint marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral,
}

/// Source of an image attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// The source type (always "base64" for tool screenshots).
    #[serde(rename = "type")]
    pub source_type: String,
    /// MIME type of the image (e.g., "image/png").
    pub media_type: String,
    /// Base64-encoded image data.
    pub data: String,
}

impl ImageSource {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".into(),
            media_type: "image/png".into(),
            data: data.into(),
        }
    }
}

/// One segment of a tool result's block content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    Text { text: String },
    Image { source: ImageSource },
}

impl ToolResultPart {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// Content of a tool result: a bare string or text/image segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<ToolResultPart>),
}

impl ToolResultContent {
    /// Number of image segments.
    pub fn image_count(&self) -> usize {
        match self {
            Self::Text(_) => 0,
            Self::Parts(parts) => parts.iter().filter(|p| p.is_image()).count(),
        }
    }
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Parts(Vec::new())
    }
}

/// One semantic unit within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },

    /// The model's private reasoning trace. An empty `thinking` string means
    /// there is nothing to display.
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Reasoning the provider withheld; must be sent back verbatim.
    RedactedThinking { data: String },

    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },

    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ContentBlock {
    /// Create a plain text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    /// Create a tool-use block.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
            cache_control: None,
        }
    }

    /// Create an error tool result carrying `message` as string content.
    pub fn tool_error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(message.into()),
            is_error: true,
            cache_control: None,
        }
    }

    /// The block's cache marker, for variants that can carry one.
    pub fn cache_control(&self) -> Option<CacheControl> {
        match self {
            Self::Text { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => *cache_control,
            Self::Thinking { .. } | Self::RedactedThinking { .. } => None,
        }
    }

    /// Set or clear the cache marker. Returns `false` when the variant
    /// cannot carry one.
    pub fn set_cache_control(&mut self, marker: Option<CacheControl>) -> bool {
        match self {
            Self::Text { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => {
                *cache_control = marker;
                true
            }
            Self::Thinking { .. } | Self::RedactedThinking { .. } => false,
        }
    }

    /// The `(id, name, input)` of a tool-use block.
    pub fn as_tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            Self::ToolUse { id, name, input, .. } => Some((id, name, input)),
            _ => None,
        }
    }

    /// The `tool_use_id` of a tool-result block.
    pub fn tool_result_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

/// A turn's content. One representation per turn, chosen by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Text(_) => &[],
            Self::Blocks(blocks) => blocks,
        }
    }

    pub fn blocks_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        match self {
            Self::Text(_) => None,
            Self::Blocks(blocks) => Some(blocks),
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user turn from plain text.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a turn with block content.
    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Create an assistant turn from blocks.
    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self::with_blocks(Role::Assistant, blocks)
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        self.content.blocks()
    }

    /// Tool-use blocks in document order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.blocks().iter().filter_map(ContentBlock::as_tool_use)
    }

    /// Number of images inside this turn's tool-result blocks.
    pub fn image_count(&self) -> usize {
        self.blocks()
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult { content, .. } => content.image_count(),
                _ => 0,
            })
            .sum()
    }
}

/// A conversation is the ordered, append-only message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered turns
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Total image segments across every tool-result block.
    pub fn image_count(&self) -> usize {
        self.messages.iter().map(Message::image_count).sum()
    }

    /// Indices of the `n` most recent user-side turns with block content,
    /// newest first.
    pub fn recent_user_turns(&self, n: usize) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.role.is_user_side() && matches!(m.content, MessageContent::Blocks(_)))
            .map(|(i, _)| i)
            .take(n)
            .collect()
    }

    /// Clear the cache marker on the last block of every user-side turn
    /// outside the `keep` most recent ones. Returns how many were cleared.
    pub fn clear_stale_breakpoints(&mut self, keep: usize) -> usize {
        let mut seen = 0;
        let mut cleared = 0;
        for message in self.messages.iter_mut().rev() {
            if !message.role.is_user_side() {
                continue;
            }
            let Some(blocks) = message.content.blocks_mut() else {
                continue;
            };
            seen += 1;
            let Some(last) = blocks.last_mut() else {
                continue;
            };
            if seen > keep && last.cache_control().is_some() {
                last.set_cache_control(None);
                cleared += 1;
            }
        }
        cleared
    }

    /// Ids of tool-use blocks in the latest assistant turn that have no
    /// paired result in any later turn, in document order.
    pub fn unresolved_tool_uses(&self) -> Vec<String> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .flat_map(|m| m.blocks().iter().filter_map(ContentBlock::tool_result_id))
            .collect();
        self.messages[pos]
            .tool_uses()
            .map(|(id, _, _)| id)
            .filter(|id| !answered.contains(id))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn screenshot_result(id: &str, images: usize) -> ContentBlock {
        let mut parts = vec![ToolResultPart::Text {
            text: "done".into(),
        }];
        for _ in 0..images {
            parts.push(ToolResultPart::Image {
                source: ImageSource::png("iVBORw0KGgo="),
            });
        }
        ContentBlock::ToolResult {
            tool_use_id: id.into(),
            content: ToolResultContent::Parts(parts),
            is_error: false,
            cache_control: None,
        }
    }

    #[test]
    fn tool_role_travels_as_user() {
        assert_eq!(Role::Tool.wire_name(), "user");
        assert_eq!(Role::Assistant.wire_name(), "assistant");
        assert!(Role::Tool.is_user_side());
        assert!(!Role::Assistant.is_user_side());
    }

    #[test]
    fn content_block_wire_format() {
        let block = ContentBlock::tool_use("toolu_1", "bash", json!({"command": "ls"}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["id"], "toolu_1");
        assert!(value.get("cache_control").is_none());

        let mut text = ContentBlock::text("hi");
        text.set_cache_control(Some(CacheControl::Ephemeral));
        let value = serde_json::to_value(&text).unwrap();
        assert_eq!(value["cache_control"], json!({"type": "ephemeral"}));
    }

    #[test]
    fn tool_result_string_content_parses() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "toolu_9",
            "content": "human stopped",
            "is_error": true
        }))
        .unwrap();
        match block {
            ContentBlock::ToolResult {
                content: ToolResultContent::Text(text),
                is_error,
                ..
            } => {
                assert_eq!(text, "human stopped");
                assert!(is_error);
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn thinking_cannot_carry_cache_marker() {
        let mut block = ContentBlock::Thinking {
            thinking: "hmm".into(),
            signature: Some("sig".into()),
        };
        assert!(!block.set_cache_control(Some(CacheControl::Ephemeral)));
        assert!(block.cache_control().is_none());
    }

    #[test]
    fn counts_images_in_tool_results_only() {
        let mut conv = Conversation::new();
        conv.push(Message::user("take two screenshots"));
        conv.push(Message::with_blocks(
            Role::User,
            vec![screenshot_result("a", 2), ContentBlock::text("note")],
        ));
        conv.push(Message::with_blocks(Role::Tool, vec![screenshot_result("b", 1)]));
        assert_eq!(conv.image_count(), 3);
    }

    #[test]
    fn recent_user_turns_skip_plain_text_and_assistant() {
        let mut conv = Conversation::new();
        conv.push(Message::user("plain"));
        conv.push(Message::with_blocks(Role::User, vec![ContentBlock::text("one")]));
        conv.push(Message::assistant(vec![ContentBlock::text("reply")]));
        conv.push(Message::with_blocks(Role::Tool, vec![screenshot_result("a", 0)]));
        assert_eq!(conv.recent_user_turns(5), vec![3, 1]);
        assert_eq!(conv.recent_user_turns(1), vec![3]);
    }

    #[test]
    fn clear_stale_breakpoints_keeps_recent_window() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            let mut block = ContentBlock::text(format!("turn {i}"));
            block.set_cache_control(Some(CacheControl::Ephemeral));
            conv.push(Message::with_blocks(Role::User, vec![block]));
        }
        assert_eq!(conv.clear_stale_breakpoints(3), 2);
        let marked: Vec<bool> = conv
            .messages
            .iter()
            .map(|m| m.blocks()[0].cache_control().is_some())
            .collect();
        assert_eq!(marked, vec![false, false, true, true, true]);
    }

    #[test]
    fn unresolved_tool_uses_excludes_answered_ids() {
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        conv.push(Message::assistant(vec![
            ContentBlock::tool_use("a1", "bash", json!({})),
            ContentBlock::tool_use("a2", "computer", json!({})),
        ]));
        assert_eq!(conv.unresolved_tool_uses(), vec!["a1", "a2"]);

        conv.push(Message::with_blocks(
            Role::User,
            vec![ContentBlock::tool_error("a1", "failed")],
        ));
        assert_eq!(conv.unresolved_tool_uses(), vec!["a2"]);
    }
}
