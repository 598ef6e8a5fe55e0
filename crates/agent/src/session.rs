//! Per-conversation state.
//!
//! A `Session` owns the history of one conversation and is the only path
//! through which user input enters it. Input submitted after an interrupted
//! run first answers any tool calls the run left open, so the history sent
//! to the provider always pairs every tool use with a result.

use operative_core::error::ProviderError;
use operative_core::message::{ContentBlock, Conversation, Message, Role};
use operative_core::provider::{RequestInfo, ResponseInfo};
use operative_core::tool::ToolResult;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use crate::dispatcher::{INTERRUPTED_TOOL_ERROR, make_api_tool_result};
use crate::interrupt::InterruptHandle;
use crate::loop_runner::{LoopOutcome, SamplingLoop};
use crate::observer::LoopObserver;

pub struct Session {
    sampling: SamplingLoop,
    conversation: Conversation,
    tool_outputs: Mutex<HashMap<String, ToolResult>>,
    in_sampling_loop: bool,
}

impl Session {
    pub fn new(sampling: SamplingLoop) -> Self {
        Self {
            sampling,
            conversation: Conversation::new(),
            tool_outputs: Mutex::new(HashMap::new()),
            in_sampling_loop: false,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// A handle that stops the running loop at its next checkpoint.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.sampling.interrupt_handle()
    }

    /// Whether a run was started and has not returned.
    ///
    /// Stays set if the run's future was dropped part-way.
    pub fn in_sampling_loop(&self) -> bool {
        self.in_sampling_loop
    }

    /// The recorded result of a tool call.
    pub fn tool_output(&self, tool_use_id: &str) -> Option<ToolResult> {
        self.tool_outputs
            .lock()
            .ok()
            .and_then(|outputs| outputs.get(tool_use_id).cloned())
    }

    fn record(&self, tool_use_id: &str, result: &ToolResult) {
        if let Ok(mut outputs) = self.tool_outputs.lock() {
            outputs.insert(tool_use_id.to_string(), result.clone());
        }
    }

    /// Append user input as a new turn.
    ///
    /// Tool calls left unanswered by an interrupted run are answered with
    /// [`INTERRUPTED_TOOL_ERROR`] results placed ahead of the text in the
    /// same turn. Returns how many results were synthesized.
    pub fn submit_user_input(&mut self, text: &str) -> usize {
        let unresolved = self.conversation.unresolved_tool_uses();
        if self.in_sampling_loop || !unresolved.is_empty() {
            info!(
                unresolved = unresolved.len(),
                "Resuming after an interrupted run"
            );
        }

        let mut blocks = Vec::with_capacity(unresolved.len() + 1);
        for id in &unresolved {
            let result = ToolResult::error(INTERRUPTED_TOOL_ERROR);
            self.record(id, &result);
            blocks.push(make_api_tool_result(&result, id));
        }
        blocks.push(ContentBlock::text(text));

        let role = if unresolved.is_empty() {
            Role::User
        } else {
            self.sampling.params().tool_result_role
        };
        self.conversation.push(Message::with_blocks(role, blocks));
        self.in_sampling_loop = false;
        self.sampling.interrupt_handle().reset();
        unresolved.len()
    }

    /// Run the loop over this session's history.
    pub async fn run(&mut self, observer: &dyn LoopObserver) -> LoopOutcome {
        self.in_sampling_loop = true;
        let recorder = Recorder {
            inner: observer,
            outputs: &self.tool_outputs,
        };
        let outcome = self.sampling.run(&mut self.conversation, &recorder).await;
        if !matches!(outcome, LoopOutcome::Interrupted) {
            self.in_sampling_loop = false;
        }
        outcome
    }

    /// Forget the conversation and everything recorded about it.
    pub fn reset(&mut self) {
        self.conversation = Conversation::new();
        if let Ok(mut outputs) = self.tool_outputs.lock() {
            outputs.clear();
        }
        self.in_sampling_loop = false;
        self.sampling.interrupt_handle().reset();
    }
}

/// Records tool outputs on their way to the caller's observer.
struct Recorder<'a> {
    inner: &'a dyn LoopObserver,
    outputs: &'a Mutex<HashMap<String, ToolResult>>,
}

impl LoopObserver for Recorder<'_> {
    fn on_output(&self, block: &ContentBlock) {
        self.inner.on_output(block);
    }

    fn on_tool_output(&self, result: &ToolResult, tool_use_id: &str) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.insert(tool_use_id.to_string(), result.clone());
        }
        self.inner.on_tool_output(result, tool_use_id);
    }

    fn on_api_exchange(
        &self,
        request: Option<&RequestInfo>,
        response: Option<&ResponseInfo>,
        error: Option<&ProviderError>,
    ) {
        self.inner.on_api_exchange(request, response, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_runner::LoopParams;
    use crate::test_helpers::{RecordingObserver, Script, ScriptedProvider, TestTools, events};
    use operative_core::tool::ToolVersion;
    use std::sync::Arc;

    fn session(scripts: Vec<Script>) -> Session {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        Session::new(SamplingLoop::new(
            provider,
            Arc::new(TestTools::default()),
            LoopParams::new("claude-test", ToolVersion::ComputerUse20250124),
        ))
    }

    #[tokio::test]
    async fn interrupted_tool_uses_are_answered_before_new_input() {
        let mut session = session(vec![]);
        session.conversation.push(Message::assistant(vec![
            ContentBlock::tool_use("a1", "echo", serde_json::json!({"text": "x"})),
            ContentBlock::tool_use("a2", "echo", serde_json::json!({"text": "y"})),
        ]));
        session.in_sampling_loop = true;

        let synthesized = session.submit_user_input("stop");

        assert_eq!(synthesized, 2);
        let last = session.conversation().last().unwrap();
        assert_eq!(
            last.blocks(),
            &[
                ContentBlock::tool_error("a1", INTERRUPTED_TOOL_ERROR),
                ContentBlock::tool_error("a2", INTERRUPTED_TOOL_ERROR),
                ContentBlock::text("stop"),
            ]
        );
        assert!(session.conversation().unresolved_tool_uses().is_empty());
        assert!(!session.in_sampling_loop());
        assert!(session.tool_output("a1").unwrap().is_error());
    }

    #[tokio::test]
    async fn plain_input_is_a_single_user_turn() {
        let mut session = session(vec![]);
        assert_eq!(session.submit_user_input("hello"), 0);
        assert_eq!(session.conversation().len(), 1);
        assert_eq!(session.conversation().messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn run_records_tool_outputs_and_clears_the_flag() {
        let mut session = session(vec![
            Script::Events(events::tool_reply(None, &[("toolu_1", "echo", r#"{"text": "hi"}"#)])),
            Script::Events(events::text_reply(&["done"])),
        ]);
        session.submit_user_input("say hi");

        let observer = RecordingObserver::default();
        let outcome = session.run(&observer).await;

        assert!(outcome.is_terminated());
        assert!(!session.in_sampling_loop());
        assert_eq!(
            session.tool_output("toolu_1").unwrap().output.as_deref(),
            Some("hi")
        );
        assert_eq!(observer.tool_outputs().len(), 1);
    }

    #[tokio::test]
    async fn interrupt_then_resume_keeps_pairing() {
        let mut session = session(vec![
            Script::Events(events::text_reply(&["next"])),
        ]);
        session.submit_user_input("first");
        session.interrupt_handle().interrupt();
        let outcome = session.run(&RecordingObserver::default()).await;
        assert!(matches!(outcome, LoopOutcome::Interrupted));
        assert!(session.in_sampling_loop());

        session.submit_user_input("second");
        let outcome = session.run(&RecordingObserver::default()).await;
        assert!(outcome.is_terminated());
        assert_eq!(session.conversation().len(), 3);
    }

    #[tokio::test]
    async fn breakpoints_stay_bounded_after_interrupted_dispatch() {
        let interrupt = InterruptHandle::new();
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Events(events::text_reply(&["one"])),
            Script::Events(events::text_reply(&["two"])),
            Script::Events(events::tool_reply(None, &[("toolu_stop", "interrupt", "{}")])),
            Script::Events(events::text_reply(&["four"])),
        ]));
        let sampling = SamplingLoop::new(
            provider.clone(),
            Arc::new(TestTools::with_interrupt(interrupt.clone())),
            LoopParams::new("claude-test", ToolVersion::ComputerUse20250124),
        )
        .with_interrupt(interrupt);
        let mut session = Session::new(sampling);

        for text in ["u1", "u2", "u3"] {
            session.submit_user_input(text);
            session.run(&RecordingObserver::default()).await;
        }
        // The tool-result turn was appended, then the loop stopped.
        assert!(session.in_sampling_loop());

        session.submit_user_input("u4");
        let outcome = session.run(&RecordingObserver::default()).await;
        assert!(outcome.is_terminated());

        let requests = provider.requests();
        let last = requests.last().unwrap();
        let marked: Vec<usize> = last
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.blocks().iter().any(|b| b.cache_control().is_some()))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(marked, vec![4, 6, 7]);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut session = session(vec![]);
        session.submit_user_input("hello");
        session.record("toolu_1", &ToolResult::output("x"));
        session.reset();
        assert!(session.conversation().is_empty());
        assert!(session.tool_output("toolu_1").is_none());
    }
}
