//! Task configuration, outcomes, and cancellation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::provider::Usage;
use crate::step::MemoryEntry;

/// Unique identifier for a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine configuration for one task. Read-only for the loop's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Operating mode name, resolved before the loop starts
    pub mode: String,

    /// Model identifier, e.g. "openrouter/deepseek/deepseek-chat"
    pub model: String,

    /// Optional vision model identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Maximum Thinking cycles before the loop stops
    pub max_iterations: usize,

    /// Compact working memory every N steps (defaults to `max_iterations`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact_every: Option<usize>,

    /// Compact working memory when its token estimate exceeds this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_working_memory_tokens: Option<usize>,

    /// Publish model output as stream fragments while it is generated
    pub stream: bool,

    /// Overrides the mode's default temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Steps kept verbatim by compaction
    pub preserve_recent: usize,
}

pub const DEFAULT_MAX_ITERATIONS: usize = 30;
pub const DEFAULT_PRESERVE_RECENT: usize = 3;

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            mode: "basic".into(),
            model: "openai/gpt-4o-mini".into(),
            vision_model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            compact_every: None,
            max_working_memory_tokens: None,
            stream: true,
            temperature: None,
            preserve_recent: DEFAULT_PRESERVE_RECENT,
        }
    }
}

impl TaskConfig {
    pub fn effective_compact_every(&self) -> usize {
        self.compact_every.unwrap_or(self.max_iterations).max(1)
    }

    /// Preserve count with the floor of two applied.
    pub fn effective_preserve_recent(&self) -> usize {
        self.preserve_recent.max(2)
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Completed,
    Failed,
    IterationLimit,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::IterationLimit => "iteration-limit",
        })
    }
}

/// Category of a fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Provider,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Provider => "provider",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Detail attached to a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// The result of running one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,

    /// Final answer, or the best partial answer on iteration limit.
    /// Empty when the task failed.
    pub answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,

    /// Thinking cycles performed
    pub iterations: usize,

    /// Tool invocations dispatched (including failed ones)
    pub tool_calls: usize,

    /// Token usage accumulated across model calls
    #[serde(default)]
    pub usage: Usage,

    /// Working memory as it stood when the task ended
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<MemoryEntry>,
}

impl TaskResult {
    /// A failed result for a task that never entered the loop.
    pub fn setup_failure(task_id: TaskId, failure: TaskFailure) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            answer: String::new(),
            error: Some(failure),
            iterations: 0,
            tool_calls: 0,
            usage: Usage::default(),
            steps: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Cooperative cancellation flag, checked at the top of each Thinking cycle.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the engine can run another task.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
