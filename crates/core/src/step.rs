//! Step records: the artifacts of one loop iteration.
//!
//! Working memory is an ordered sequence of [`MemoryEntry`] values: verbatim
//! steps, optionally preceded by one summary standing in for older steps.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// What the model decided to do in a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke a tool.
    ToolCall(ToolCall),
    /// Stop with this answer.
    FinalAnswer { answer: String },
    /// The output could not be interpreted as an action.
    ParseError { message: String },
}

/// One Thinking (+ optional ActionDispatch) cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based, strictly increasing within a task.
    pub index: usize,

    /// The messages this step added to the prompt, rendered as text.
    ///
    /// Messages already sent for the previous step are not repeated, so the
    /// full prompt of step `n` is the concatenation of steps `1..=n` up to
    /// the latest compaction.
    pub prompt: String,

    /// Raw model output, fully assembled.
    pub model_output: String,

    /// Reasoning the model wrote outside its action block.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thought: String,

    pub action: StepAction,

    /// Tool result or error observation fed back to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

impl StepRecord {
    /// The text fragments that count against the memory budget.
    pub fn sized_text(&self) -> [&str; 2] {
        [
            self.model_output.as_str(),
            self.observation.as_deref().unwrap_or(""),
        ]
    }
}

/// A condensed stand-in for a run of earlier steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Index of the first step folded into this summary.
    pub first_step: usize,
    /// Index of the last step folded into this summary.
    pub last_step: usize,
    pub text: String,
}

/// An element of working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum MemoryEntry {
    Summary(StepSummary),
    Step(StepRecord),
}

impl MemoryEntry {
    pub fn as_step(&self) -> Option<&StepRecord> {
        match self {
            Self::Step(step) => Some(step),
            Self::Summary(_) => None,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, Self::Summary(_))
    }
}
