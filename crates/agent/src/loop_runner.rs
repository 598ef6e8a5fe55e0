//! The sampling loop implementation.

use operative_config::AppConfig;
use operative_core::error::ProviderError;
use operative_core::message::{CacheControl, Conversation, Message, Role};
use operative_core::provider::{
    Provider, ProviderCapabilities, ProviderRequest, RequestInfo, ResponseInfo, StreamResponse,
    SystemBlock, ThinkingConfig,
};
use operative_core::tool::{ToolGroup, ToolSource, ToolVersion};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::interpreter::StreamInterpreter;
use crate::interrupt::InterruptHandle;
use crate::observer::LoopObserver;
use crate::{cache, dispatcher, prompt, retention};

pub const TOKEN_EFFICIENT_TOOLS_BETA: &str = "token-efficient-tools-2025-02-19";
pub const OUTPUT_128K_BETA: &str = "output-128k-2025-02-19";
pub const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// Per-run settings of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopParams {
    pub model: String,
    pub system_prompt_suffix: Option<String>,
    /// `None` keeps every image.
    pub only_n_most_recent_images: Option<usize>,
    /// Removal batch size; defaults to the keep count.
    pub image_removal_batch: Option<usize>,
    pub max_tokens: u32,
    pub tool_version: ToolVersion,
    pub thinking_budget: Option<u32>,
    pub token_efficient_tools_beta: bool,
    /// Role of the turn that carries tool results.
    pub tool_result_role: Role,
}

impl LoopParams {
    pub fn new(model: impl Into<String>, tool_version: ToolVersion) -> Self {
        Self {
            model: model.into(),
            system_prompt_suffix: None,
            only_n_most_recent_images: None,
            image_removal_batch: None,
            max_tokens: 4096,
            tool_version,
            thinking_budget: None,
            token_efficient_tools_beta: false,
            tool_result_role: Role::User,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model().to_string(),
            system_prompt_suffix: Some(config.system_prompt_suffix.clone())
                .filter(|s| !s.is_empty()),
            only_n_most_recent_images: config.image_limit(),
            image_removal_batch: config.image_removal_batch,
            max_tokens: config.output_tokens(),
            tool_version: config.tool_version(),
            thinking_budget: config.effective_thinking_budget(),
            token_efficient_tools_beta: config.token_efficient_tools_beta,
            tool_result_role: config.tool_result_role.role(),
        }
    }

    /// Beta flags for `group` on a provider with `capabilities`.
    pub fn betas(&self, group: &ToolGroup, capabilities: ProviderCapabilities) -> Vec<String> {
        if !capabilities.supports_beta_headers {
            return Vec::new();
        }
        let mut betas = Vec::new();
        if let Some(flag) = &group.beta_flag {
            betas.push(flag.clone());
        }
        if self.token_efficient_tools_beta {
            betas.push(TOKEN_EFFICIENT_TOOLS_BETA.to_string());
        }
        betas.push(OUTPUT_128K_BETA.to_string());
        if capabilities.supports_prompt_caching {
            betas.push(PROMPT_CACHING_BETA.to_string());
        }
        betas
    }
}

/// States of one loop run. Every run moves forward through them without
/// backtracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    BuildRequest,
    Streaming,
    Interpreting,
    DispatchingTools,
    Terminated,
    Failed,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuildRequest => "build_request",
            Self::Streaming => "streaming",
            Self::Interpreting => "interpreting",
            Self::DispatchingTools => "dispatching_tools",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended. History is valid and inspectable in every case.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    /// The model finished without requesting tools.
    Terminated,
    /// A provider exchange failed; the error was already reported.
    Failed { error: ProviderError },
    /// The interrupt flag stopped the run at a checkpoint.
    Interrupted,
}

impl LoopOutcome {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Drives the model/tool conversation until the model stops asking for tools.
pub struct SamplingLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolSource>,
    params: LoopParams,
    interrupt: InterruptHandle,
}

impl SamplingLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolSource>, params: LoopParams) -> Self {
        Self {
            provider,
            tools,
            params,
            interrupt: InterruptHandle::new(),
        }
    }

    /// Share an existing interrupt handle.
    pub fn with_interrupt(mut self, interrupt: InterruptHandle) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn params(&self) -> &LoopParams {
        &self.params
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Adjust history and assemble the request for the next exchange.
    fn build_request(
        &self,
        conversation: &mut Conversation,
        group: &ToolGroup,
        capabilities: ProviderCapabilities,
    ) -> ProviderRequest {
        let mut system =
            SystemBlock::text(prompt::current_system_prompt(self.params.system_prompt_suffix.as_deref()));

        if capabilities.supports_prompt_caching {
            cache::inject_prompt_caching(conversation);
            system.cache_control = Some(CacheControl::Ephemeral);
        } else {
            conversation.clear_stale_breakpoints(0);
            let keep = self.params.only_n_most_recent_images;
            let batch = self
                .params
                .image_removal_batch
                .or(keep)
                .unwrap_or_default();
            let removed = retention::filter_to_n_most_recent_images(conversation, keep, batch);
            if removed > 0 {
                debug!(removed, "Dropped old screenshots");
            }
        }

        ProviderRequest {
            model: self.params.model.clone(),
            messages: conversation.messages.clone(),
            system: vec![system],
            tools: group.tools.to_params(),
            betas: self.params.betas(group, capabilities),
            max_tokens: self.params.max_tokens,
            thinking: self
                .params
                .thinking_budget
                .map(|budget_tokens| ThinkingConfig::Enabled { budget_tokens }),
        }
    }

    fn fail(
        &self,
        observer: &dyn LoopObserver,
        request: Option<&RequestInfo>,
        response: Option<&ResponseInfo>,
        error: ProviderError,
    ) -> LoopOutcome {
        warn!(error = %error, "Provider exchange failed");
        enter(LoopState::Failed);
        observer.on_api_exchange(request, response, Some(&error));
        LoopOutcome::Failed { error }
    }

    /// Run until the model stops requesting tools, the exchange fails, or
    /// the interrupt flag is raised.
    ///
    /// `conversation` is updated in place and stays consistent: every
    /// appended tool-use block is answered before the next request.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        observer: &dyn LoopObserver,
    ) -> LoopOutcome {
        let capabilities = self.provider.capabilities();
        let group = self.tools.group(self.params.tool_version);
        let mut iteration: u32 = 0;

        info!(
            conversation_id = %conversation.id,
            provider = self.provider.name(),
            model = %self.params.model,
            tool_version = %self.params.tool_version,
            "Starting sampling loop"
        );

        loop {
            if self.interrupt.is_interrupted() {
                info!(iteration, "Sampling loop interrupted");
                return LoopOutcome::Interrupted;
            }
            iteration += 1;

            enter(LoopState::BuildRequest);
            let request = self.build_request(conversation, &group, capabilities);

            enter(LoopState::Streaming);
            let StreamResponse {
                request,
                response,
                mut events,
            } = match self.provider.stream(request).await {
                Ok(stream) => stream,
                Err(failure) => {
                    return self.fail(
                        observer,
                        failure.request.as_ref(),
                        failure.response.as_ref(),
                        failure.error,
                    );
                }
            };
            observer.on_api_exchange(Some(&request), Some(&response), None);

            let mut interpreter = StreamInterpreter::new();
            let stream_error = loop {
                let next = tokio::select! {
                    biased;
                    _ = self.interrupt.interrupted() => {
                        info!(iteration, "Sampling loop interrupted while streaming");
                        return LoopOutcome::Interrupted;
                    }
                    next = events.recv() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        interpreter.apply(event, observer);
                        if interpreter.is_complete() {
                            break None;
                        }
                    }
                    Some(Err(error)) => break Some(error),
                    None => {
                        break Some(ProviderError::StreamInterrupted(
                            "stream ended before message_stop".into(),
                        ));
                    }
                }
            };
            if let Some(error) = stream_error {
                return self.fail(observer, Some(&request), Some(&response), error);
            }

            enter(LoopState::Interpreting);
            let message = interpreter.finish();
            let tool_count = message.tool_use_count();
            info!(
                iteration,
                blocks = message.blocks.len(),
                tool_count,
                stop_reason = message.stop_reason.as_deref().unwrap_or("none"),
                input_tokens = message.usage.input_tokens,
                output_tokens = message.usage.output_tokens,
                "Assistant turn complete"
            );
            conversation.push(Message::assistant(message.blocks));

            enter(LoopState::DispatchingTools);
            if tool_count == 0 {
                enter(LoopState::Terminated);
                return LoopOutcome::Terminated;
            }

            let turn = conversation.messages.len() - 1;
            let results = dispatcher::dispatch(
                &group.tools,
                conversation.messages[turn].blocks(),
                observer,
                &self.interrupt,
            )
            .await;
            conversation.push(Message::with_blocks(self.params.tool_result_role, results));
        }
    }
}

fn enter(state: LoopState) {
    debug!(state = %state, "Loop state");
}
