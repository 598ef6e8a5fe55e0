//! Screenshot retention.
//!
//! Screenshots dominate request size. Only the most recent ones are kept,
//! and old ones are dropped in batches so the cached prompt prefix is not
//! invalidated on every turn.

use operative_core::message::{ContentBlock, Conversation, ToolResultContent};
use tracing::debug;

/// Drop the oldest images in tool results so that at most `images_to_keep`
/// remain, removing in multiples of `min_removal_threshold`.
///
/// `None`, `Some(0)` and a zero threshold leave history untouched.
/// Returns how many images were removed.
pub fn filter_to_n_most_recent_images(
    conversation: &mut Conversation,
    images_to_keep: Option<usize>,
    min_removal_threshold: usize,
) -> usize {
    let Some(keep) = images_to_keep.filter(|&k| k > 0) else {
        return 0;
    };
    if min_removal_threshold == 0 {
        return 0;
    }

    let total = conversation.image_count();
    let mut excess = total.saturating_sub(keep);
    excess -= excess % min_removal_threshold;
    if excess == 0 {
        return 0;
    }

    let mut remaining = excess;
    for message in conversation.messages.iter_mut() {
        let Some(blocks) = message.content.blocks_mut() else {
            continue;
        };
        for block in blocks.iter_mut() {
            let ContentBlock::ToolResult {
                content: ToolResultContent::Parts(parts),
                ..
            } = block
            else {
                continue;
            };
            parts.retain(|part| {
                if remaining > 0 && part.is_image() {
                    remaining -= 1;
                    false
                } else {
                    true
                }
            });
            if remaining == 0 {
                debug!(removed = excess, kept = total - excess, "Pruned old screenshots");
                return excess;
            }
        }
    }

    excess - remaining
}
