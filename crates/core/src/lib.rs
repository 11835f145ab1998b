//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the stepwise
//! task-execution engine. This crate does no I/O of its own. It defines
//! the contracts the engine, the tools, and the providers implement.
//!
//! ## Layout
//!
//! - [`tool`]: the tool contract, typed arguments, and the registry
//! - [`event`]: the synchronous event bus that decouples the loop from presentation
//! - [`mode`]: the mode resolver mapping a mode name to a tool bundle
//! - [`provider`]: the language-model completion interface
//! - [`step`]: step records and working-memory entries
//! - [`task`]: task configuration and results

pub mod error;
pub mod event;
pub mod message;
pub mod mode;
pub mod provider;
pub mod step;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ActionParseError, ConfigError, Error, ProviderError, Result, ToolError};
pub use event::{Event, EventBus, EventHandler, EventKind, EventPayload, HandlerError, SubscriptionId};
pub use message::{Message, Role};
pub use mode::{AgentMode, ModeProfile, ModelParameters, resolve_mode};
pub use provider::{ChunkReceiver, CompletionRequest, CompletionResponse, Provider, StreamChunk, Usage};
pub use step::{MemoryEntry, StepAction, StepRecord, StepSummary};
pub use task::{
    CancellationToken, FailureKind, TaskConfig, TaskFailure, TaskId, TaskResult, TaskStatus,
};
pub use tool::{
    ArgType, ArgValue, Tool, ToolArgument, ToolArguments, ToolCall, ToolCategory, ToolDescriptor,
    ToolOutcome, ToolRegistry, ToolSource,
};
