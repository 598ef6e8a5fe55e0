//! Prompt-cache breakpoints.

use operative_core::message::{CacheControl, Conversation};
use tracing::debug;

/// How many user turns carry a breakpoint.
pub const CACHED_USER_TURNS: usize = 3;

/// Mark the last block of the three most recent user turns as a cache
/// breakpoint and clear the marker from every older user turn.
///
/// Several user turns can arrive between two annotations (an interrupted
/// run followed by new input), so the whole tail is cleared, not just the
/// turn that last left the window.
pub fn inject_prompt_caching(conversation: &mut Conversation) {
    for index in conversation.recent_user_turns(CACHED_USER_TURNS) {
        if let Some(last) = conversation.messages[index]
            .content
            .blocks_mut()
            .and_then(|blocks| blocks.last_mut())
        {
            last.set_cache_control(Some(CacheControl::Ephemeral));
        }
    }
    let cleared = conversation.clear_stale_breakpoints(CACHED_USER_TURNS);
    if cleared > 0 {
        debug!(cleared, "Cleared stale cache breakpoints");
    }
}
