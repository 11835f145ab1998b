//! Summarizers used when working memory is compacted.
//!
//! A [`Summarizer`] turns a run of older memory entries into one short text.
//! [`ModelSummarizer`] asks the task's own model; [`TruncatingSummarizer`]
//! builds a digest locally and is also the fallback when the model call
//! fails.

use async_trait::async_trait;
use std::sync::Arc;
use stepwise_core::error::ProviderError;
use stepwise_core::message::Message;
use stepwise_core::provider::{CompletionRequest, Provider};
use stepwise_core::step::{MemoryEntry, StepAction};
use tracing::debug;

use crate::context::token::truncate_to_tokens;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// System prompt for folding older steps into a summary.
const STEP_SUMMARY_PROMPT: &str = "\
Summarize the earlier steps of this task concisely. Focus on:
- What has been tried and which tool calls were made
- Facts and intermediate results that were discovered
- Errors encountered and what remains to be done

Provide a clear, factual summary in 1-2 paragraphs. The summary will replace \
the earlier steps while the most recent steps are preserved verbatim.";

/// Default cap on the summary the model is asked to produce.
const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 1024;

/// Per-field cap when steps are rendered for the summarizer.
const TRANSCRIPT_FIELD_TOKENS: usize = 500;

/// Per-field cap for the local digest.
const DIGEST_FIELD_TOKENS: usize = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Summarizer
// ─────────────────────────────────────────────────────────────────────────────

/// Folds a run of memory entries into one summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String, ProviderError>;
}

/// Summarizes with a language model.
pub struct ModelSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_summary_tokens: u32,
    summary_prompt: Option<String>,
}

impl ModelSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            summary_prompt: None,
        }
    }

    pub fn with_max_summary_tokens(mut self, max: u32) -> Self {
        self.max_summary_tokens = max;
        self
    }

    /// Replace the default summary instructions.
    pub fn with_summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summary_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String, ProviderError> {
        let prompt = self
            .summary_prompt
            .as_deref()
            .unwrap_or(STEP_SUMMARY_PROMPT);

        let transcript = render_transcript(entries, TRANSCRIPT_FIELD_TOKENS);
        debug!(entries = entries.len(), model = %self.model, "Summarizing steps");

        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(prompt), Message::user(transcript)],
        );
        request.temperature = 0.3;
        request.max_tokens = Some(self.max_summary_tokens);

        let response = self.provider.complete(request).await?;
        Ok(response.content.trim().to_string())
    }
}

/// Builds a digest locally without calling a model. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingSummarizer;

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, entries: &[MemoryEntry]) -> Result<String, ProviderError> {
        Ok(truncation_digest(entries))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

/// One line per step: the action taken and the head of its observation.
pub fn truncation_digest(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| match entry {
            MemoryEntry::Summary(summary) => truncate_to_tokens(&summary.text, DIGEST_FIELD_TOKENS * 2),
            MemoryEntry::Step(step) => {
                let action = describe_action(&step.action);
                match &step.observation {
                    Some(obs) => format!(
                        "Step {}: {action} -> {}",
                        step.index,
                        truncate_to_tokens(obs.trim(), DIGEST_FIELD_TOKENS)
                    ),
                    None => format!("Step {}: {action}", step.index),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render entries as a plain transcript, capping each long field.
pub fn render_transcript(entries: &[MemoryEntry], field_tokens: usize) -> String {
    entries
        .iter()
        .map(|entry| match entry {
            MemoryEntry::Summary(summary) => format!(
                "Summary of steps {}-{}:\n{}",
                summary.first_step, summary.last_step, summary.text
            ),
            MemoryEntry::Step(step) => {
                let mut parts = vec![
                    format!("Step {}", step.index),
                    format!(
                        "Model: {}",
                        truncate_to_tokens(step.model_output.trim(), field_tokens)
                    ),
                ];
                if let Some(obs) = &step.observation {
                    parts.push(format!(
                        "Observation: {}",
                        truncate_to_tokens(obs.trim(), field_tokens)
                    ));
                }
                parts.join("\n")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn describe_action(action: &StepAction) -> String {
    match action {
        StepAction::ToolCall(call) => format!("called {}({})", call.name, call.arguments),
        StepAction::FinalAnswer { .. } => "gave the final answer".to_string(),
        StepAction::ParseError { .. } => "produced no valid action".to_string(),
    }
}
