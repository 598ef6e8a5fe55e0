//! The sampling loop: the heart of Operative.
//!
//! Each iteration follows one cycle:
//!
//! 1. **Build** the request: prune old screenshots, place cache breakpoints,
//!    assemble system prompt, tools and beta flags
//! 2. **Stream** the response, forwarding text and thinking as it arrives
//! 3. **Interpret** the finished stream into one assistant turn
//! 4. **Dispatch** every requested tool in order and append the results
//!
//! The loop ends when the model asks for no tools, or fails cleanly when the
//! provider exchange fails. Nothing escapes as an error: callers observe
//! progress through a [`LoopObserver`] and inspect the returned history.

pub mod cache;
pub mod dispatcher;
pub mod interpreter;
pub mod interrupt;
pub mod loop_runner;
pub mod observer;
pub mod prompt;
pub mod retention;
pub mod session;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{INTERRUPTED_TOOL_ERROR, make_api_tool_result};
pub use interrupt::InterruptHandle;
pub use loop_runner::{LoopOutcome, LoopParams, LoopState, SamplingLoop};
pub use observer::{LoopObserver, NoopObserver};
pub use session::Session;
pub use stream_event::{ChannelObserver, LoopEvent};
