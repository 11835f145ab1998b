//! The task execution loop.
//!
//! A task runs as a small state machine:
//!
//! ```text
//! Thinking ──tool call──▶ ActionDispatch ──observation──▶ Thinking
//!    │  └──parse error (observation)──▶ Thinking
//!    ├──final answer──▶ Completed
//!    ├──provider error / cancelled──▶ Failed
//!    └──budget spent──▶ IterationLimitReached
//! ```
//!
//! Every Thinking cycle counts against `max_iterations`, so a task never
//! makes more model calls than its budget. Tool failures and unparseable
//! model output are fed back as observations and never end the task.

use std::sync::Arc;
use std::time::Instant;
use stepwise_core::error::{ConfigError, ProviderError};
use stepwise_core::event::{Event, EventBus, EventPayload};
use stepwise_core::message::Message;
use stepwise_core::mode::{ModeProfile, resolve_mode};
use stepwise_core::provider::{CompletionRequest, Provider, Usage};
use stepwise_core::step::{StepAction, StepRecord};
use stepwise_core::task::{
    CancellationToken, FailureKind, TaskConfig, TaskFailure, TaskId, TaskResult, TaskStatus,
};
use stepwise_core::tool::{Tool, ToolCall, ToolRegistry, ToolSource};
use tracing::{debug, info, warn};

use crate::action::{ParsedAction, parse_action};
use crate::compaction::{ModelSummarizer, Summarizer};
use crate::context::{WorkingMemory, estimate_messages_tokens};
use crate::prompt::{build_messages, new_messages, render_prompt, system_prompt};

/// States of the loop. Terminal states produce the [`TaskResult`].
#[derive(Debug)]
enum LoopState {
    Thinking,
    ActionDispatch(PendingCall),
    Completed(String),
    Failed(TaskFailure),
    IterationLimitReached,
}

/// A parsed tool call waiting to be dispatched.
#[derive(Debug)]
struct PendingCall {
    step: usize,
    prompt: String,
    model_output: String,
    thought: String,
    call: ToolCall,
}

/// Counters carried across the loop.
#[derive(Debug, Default)]
struct Progress {
    iterations: usize,
    tool_calls: usize,
    usage: Usage,
    last_output: String,
}

/// Runs tasks against one provider with a fixed tool set.
pub struct TaskEngine {
    provider: Arc<dyn Provider>,
    /// Bare model name sent with each request.
    model: String,
    config: TaskConfig,
    profile: ModeProfile,
    registry: ToolRegistry,
    system_prompt: String,
    bus: Arc<EventBus>,
    summarizer: Arc<dyn Summarizer>,
    cancel: CancellationToken,
}

/// Collects the engine's collaborators; [`build`](Self::build) resolves the
/// mode and assembles the tool registry.
pub struct TaskEngineBuilder {
    provider: Arc<dyn Provider>,
    config: TaskConfig,
    model: Option<String>,
    sources: Vec<Box<dyn ToolSource>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    bus: Arc<EventBus>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl TaskEngineBuilder {
    /// Add the tools a source offers for the resolved mode.
    pub fn tools(mut self, source: impl ToolSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Add a single tool. It is only registered if the mode enables its category.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Replace the model-backed summarizer used for compaction.
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Bare model name for requests. Defaults to `config.model`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The bus events will be published on.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn build(self) -> Result<TaskEngine, ConfigError> {
        validate(&self.config)?;
        let profile = resolve_mode(&self.config.mode, self.config.vision_model.is_some())?;

        let mut registry = ToolRegistry::new();
        let offered = self
            .sources
            .iter()
            .flat_map(|source| source.tools_for(&profile))
            .chain(self.extra_tools);
        for tool in offered {
            let category = tool.descriptor().category;
            if !profile.allows(category) {
                debug!(tool = tool.name(), mode = %profile.mode, "Tool not enabled by mode, skipped");
                continue;
            }
            registry.register(tool)?;
        }

        let model = self.model.unwrap_or_else(|| self.config.model.clone());
        let summarizer = self.summarizer.unwrap_or_else(|| {
            Arc::new(ModelSummarizer::new(Arc::clone(&self.provider), model.clone()))
        });

        info!(
            mode = %profile.mode,
            model = %model,
            tools = ?registry.names(),
            "Task engine ready"
        );

        Ok(TaskEngine {
            provider: self.provider,
            model,
            system_prompt: system_prompt(&registry),
            config: self.config,
            profile,
            registry,
            bus: self.bus,
            summarizer,
            cancel: CancellationToken::new(),
        })
    }
}

fn validate(config: &TaskConfig) -> Result<(), ConfigError> {
    if config.max_iterations == 0 {
        return Err(ConfigError::Invalid("max_iterations must be at least 1".into()));
    }
    if config.compact_every == Some(0) {
        return Err(ConfigError::Invalid("compact_every must be at least 1".into()));
    }
    if let Some(t) = config.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(ConfigError::Invalid(format!(
            "temperature must be between 0 and 2, got {t}"
        )));
    }
    Ok(())
}

impl TaskEngine {
    pub fn builder(provider: Arc<dyn Provider>, config: TaskConfig) -> TaskEngineBuilder {
        TaskEngineBuilder {
            provider,
            config,
            model: None,
            sources: Vec::new(),
            extra_tools: Vec::new(),
            bus: Arc::new(EventBus::new()),
            summarizer: None,
        }
    }

    /// A handle that stops the loop at the next Thinking cycle.
    ///
    /// Cancellation is sticky: later runs fail immediately until the token
    /// is reset.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn profile(&self) -> &ModeProfile {
        &self.profile
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Run one task to a terminal state.
    ///
    /// Takes `&mut self` so that one engine never runs two tasks at once.
    pub async fn run(&mut self, task: &str) -> TaskResult {
        let task_id = TaskId::new();
        let max_iterations = self.config.max_iterations;
        let mut memory = WorkingMemory::for_task(&self.config);
        let mut progress = Progress::default();
        let mut state = LoopState::Thinking;
        let mut sent: Vec<Message> = Vec::new();
        let started = Instant::now();

        info!(
            %task_id,
            model = %self.model,
            mode = %self.profile.mode,
            max_iter = max_iterations,
            "Task loop starting"
        );

        loop {
            state = match state {
                LoopState::Thinking => {
                    if self.cancel.is_cancelled() {
                        LoopState::Failed(TaskFailure::new(
                            FailureKind::Cancelled,
                            "task was cancelled",
                        ))
                    } else if progress.iterations >= max_iterations {
                        LoopState::IterationLimitReached
                    } else {
                        progress.iterations += 1;
                        let step = progress.iterations;
                        self.emit(task_id, EventPayload::StepStarted { step, max_iterations });

                        // ── Call the model ──
                        let messages = build_messages(&self.system_prompt, task, memory.snapshot());
                        debug!(
                            step,
                            entries = memory.len(),
                            prompt_tokens = estimate_messages_tokens(&messages),
                            "Thinking"
                        );
                        let prompt = render_prompt(new_messages(&sent, &messages));
                        sent.clone_from(&messages);
                        let request = self.request(messages);

                        self.emit(task_id, EventPayload::ThinkingStarted { step });
                        let reply = self.think(task_id, step, request).await;
                        self.emit(task_id, EventPayload::ThinkingEnded { step });

                        match reply {
                            Err(e) => {
                                warn!(step, "Model call failed: {e}");
                                LoopState::Failed(TaskFailure::new(
                                    FailureKind::Provider,
                                    e.to_string(),
                                ))
                            }
                            Ok((output, usage)) => {
                                if let Some(usage) = usage {
                                    progress.usage.accumulate(&usage);
                                }
                                progress.last_output = output.clone();

                                // ── Parse the action ──
                                match parse_action(&output) {
                                    Ok(action) => {
                                        let thought = action.thought().to_string();
                                        match action {
                                            ParsedAction::FinalAnswer { answer, .. } => {
                                                memory.append(StepRecord {
                                                    index: step,
                                                    prompt,
                                                    model_output: output,
                                                    thought,
                                                    action: StepAction::FinalAnswer {
                                                        answer: answer.clone(),
                                                    },
                                                    observation: None,
                                                });
                                                LoopState::Completed(answer)
                                            }
                                            ParsedAction::ToolCall { call, .. } => {
                                                LoopState::ActionDispatch(PendingCall {
                                                    step,
                                                    prompt,
                                                    model_output: output,
                                                    thought,
                                                    call,
                                                })
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        warn!(step, "Model output has no valid action: {e}");
                                        memory.append(StepRecord {
                                            index: step,
                                            prompt,
                                            model_output: output,
                                            thought: String::new(),
                                            action: StepAction::ParseError {
                                                message: e.to_string(),
                                            },
                                            observation: Some(e.to_observation()),
                                        });
                                        self.maybe_compact(&mut memory).await;
                                        LoopState::Thinking
                                    }
                                }
                            }
                        }
                    }
                }

                LoopState::ActionDispatch(pending) => {
                    let PendingCall {
                        step,
                        prompt,
                        model_output,
                        thought,
                        call,
                    } = pending;

                    self.emit(
                        task_id,
                        EventPayload::ToolStarted {
                            step,
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    );

                    let tool_start = Instant::now();
                    let outcome = self.registry.dispatch(&call).await;
                    let duration_ms = tool_start.elapsed().as_millis() as u64;
                    progress.tool_calls += 1;

                    if outcome.success {
                        debug!(step, tool = %call.name, duration_ms, "Tool finished");
                    } else {
                        warn!(step, tool = %call.name, duration_ms, "Tool failed: {}", outcome.output);
                    }

                    self.emit(
                        task_id,
                        EventPayload::ToolEnded {
                            step,
                            tool: call.name.clone(),
                            success: outcome.success,
                            duration_ms,
                            output: outcome.output.clone(),
                        },
                    );

                    memory.append(StepRecord {
                        index: step,
                        prompt,
                        model_output,
                        thought,
                        action: StepAction::ToolCall(call),
                        observation: Some(outcome.output),
                    });
                    self.maybe_compact(&mut memory).await;
                    LoopState::Thinking
                }

                LoopState::Completed(answer) => {
                    info!(
                        %task_id,
                        iterations = progress.iterations,
                        tool_calls = progress.tool_calls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Task completed"
                    );
                    self.emit(
                        task_id,
                        EventPayload::TaskCompleted {
                            answer: answer.clone(),
                            iterations: progress.iterations,
                        },
                    );
                    return progress.finish(task_id, TaskStatus::Completed, answer, None, memory);
                }

                LoopState::Failed(failure) => {
                    warn!(%task_id, kind = %failure.kind, "Task failed: {}", failure.message);
                    self.emit(
                        task_id,
                        EventPayload::TaskFailed {
                            kind: failure.kind,
                            message: failure.message.clone(),
                        },
                    );
                    return progress.finish(
                        task_id,
                        TaskStatus::Failed,
                        String::new(),
                        Some(failure),
                        memory,
                    );
                }

                LoopState::IterationLimitReached => {
                    warn!(%task_id, max_iterations, "Iteration limit reached");
                    let answer = if progress.last_output.trim().is_empty() {
                        format!(
                            "No final answer was produced within the budget of {max_iterations} iterations."
                        )
                    } else {
                        progress.last_output.clone()
                    };
                    return progress.finish(
                        task_id,
                        TaskStatus::IterationLimit,
                        answer,
                        None,
                        memory,
                    );
                }
            };
        }
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), messages);
        request.temperature = self
            .config
            .temperature
            .unwrap_or(self.profile.parameters.temperature);
        request.max_tokens = self.profile.parameters.max_tokens;
        request.stream = self.config.stream;
        request
    }

    /// One model call. Streamed fragments are published as they arrive.
    async fn think(
        &self,
        task_id: TaskId,
        step: usize,
        request: CompletionRequest,
    ) -> Result<(String, Option<Usage>), ProviderError> {
        if !self.config.stream {
            let response = self.provider.complete(request).await?;
            return Ok((response.content, response.usage));
        }

        let mut rx = self.provider.stream(request).await?;
        let mut output = String::new();
        let mut usage = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                output.push_str(&content);
                self.emit(task_id, EventPayload::StreamFragment { step, content });
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok((output, usage))
    }

    async fn maybe_compact(&self, memory: &mut WorkingMemory) {
        if !memory.should_compact() {
            return;
        }
        if let Some(report) = memory.compact(self.summarizer.as_ref()).await {
            info!(
                folded = report.entries_folded,
                tokens_freed = report.tokens_freed(),
                fallback = report.used_fallback,
                "Compacted working memory"
            );
        }
    }

    fn emit(&self, task_id: TaskId, payload: EventPayload) {
        self.bus.emit(&Event::new(task_id, payload));
    }
}

impl Progress {
    fn finish(
        self,
        task_id: TaskId,
        status: TaskStatus,
        answer: String,
        error: Option<TaskFailure>,
        memory: WorkingMemory,
    ) -> TaskResult {
        TaskResult {
            task_id,
            status,
            answer,
            error,
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            usage: self.usage,
            steps: memory.into_entries(),
        }
    }
}

/// Build an engine and run one task.
///
/// Setup errors (unknown mode, duplicate tools, invalid limits) do not
/// escape: they become a `Failed` result and a `TaskFailed` event on the
/// builder's bus.
pub async fn run_task<F>(
    task: &str,
    config: TaskConfig,
    provider: Arc<dyn Provider>,
    setup: F,
) -> TaskResult
where
    F: FnOnce(TaskEngineBuilder) -> TaskEngineBuilder,
{
    let builder = setup(TaskEngine::builder(provider, config));
    let bus = builder.bus();

    match builder.build() {
        Ok(mut engine) => engine.run(task).await,
        Err(e) => {
            let task_id = TaskId::new();
            warn!(%task_id, "Task setup failed: {e}");
            let failure = TaskFailure::new(FailureKind::Configuration, e.to_string());
            bus.emit(&Event::new(
                task_id,
                EventPayload::TaskFailed {
                    kind: failure.kind,
                    message: failure.message.clone(),
                },
            ));
            TaskResult::setup_failure(task_id, failure)
        }
    }
}
