//! Working memory, the ordered step history of a single task.
//!
//! Entries are appended one per loop iteration. Compaction folds every
//! entry older than the last `preserve_recent` steps (a previous summary
//! included) into one [`StepSummary`], so after a compaction the memory
//! holds at most `preserve_recent + 1` entries. When a token budget is set
//! and the folded memory is still too large, the summary is truncated
//! first and the long fields of the preserved steps after that.

use serde::Serialize;
use stepwise_core::step::{MemoryEntry, StepRecord, StepSummary};
use stepwise_core::task::TaskConfig;
use tracing::{debug, warn};

use super::token::{estimate_tokens, truncate_to_tokens};
use crate::compaction::{Summarizer, truncation_digest};

// ── Data Structures ───────────────────────────────────────────────────────

/// The step history of one task.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingMemory {
    entries: Vec<MemoryEntry>,

    /// Steps kept verbatim by compaction.
    preserve_recent: usize,

    /// Compact after this many appended steps.
    compact_every: usize,

    /// Compact whenever the estimated size exceeds this.
    max_tokens: Option<usize>,

    /// Steps appended since the last compaction.
    steps_since_compaction: usize,
}

/// Statistics from one compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    /// Entries folded into the summary (0 when only truncation ran).
    pub entries_folded: usize,
    /// Estimated tokens before compaction.
    pub tokens_before: usize,
    /// Estimated tokens after compaction.
    pub tokens_after: usize,
    /// Whether the summarizer failed and the local digest was used.
    pub used_fallback: bool,
    /// Whether fields were cut to honor the token budget.
    pub truncated: bool,
}

impl CompactionReport {
    pub fn tokens_freed(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

// ── Core Operations ───────────────────────────────────────────────────────

impl WorkingMemory {
    pub fn new(preserve_recent: usize, compact_every: usize, max_tokens: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            preserve_recent: preserve_recent.max(2),
            compact_every: compact_every.max(1),
            max_tokens,
            steps_since_compaction: 0,
        }
    }

    /// Memory configured from a task's settings.
    pub fn for_task(config: &TaskConfig) -> Self {
        Self::new(
            config.effective_preserve_recent(),
            config.effective_compact_every(),
            config.max_working_memory_tokens,
        )
    }

    pub fn append(&mut self, step: StepRecord) {
        self.entries.push(MemoryEntry::Step(step));
        self.steps_since_compaction += 1;
    }

    /// Read-only view of the current entries, oldest first.
    pub fn snapshot(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MemoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn steps_since_compaction(&self) -> usize {
        self.steps_since_compaction
    }

    /// Estimated size of everything the model will see from this memory.
    pub fn token_size(&self) -> usize {
        self.entries.iter().map(entry_tokens).sum()
    }

    /// Whether the cadence or the token budget calls for a compaction.
    pub fn should_compact(&self) -> bool {
        if self.steps_since_compaction >= self.compact_every {
            return true;
        }
        self.max_tokens.is_some_and(|max| self.token_size() > max)
    }

    /// Fold older entries into a summary and enforce the token budget.
    ///
    /// Returns `None` when there was nothing to do, which makes a repeated
    /// call without intervening appends a no-op.
    pub async fn compact(&mut self, summarizer: &dyn Summarizer) -> Option<CompactionReport> {
        self.steps_since_compaction = 0;
        let tokens_before = self.token_size();

        let (entries_folded, used_fallback) = self.fold(summarizer).await;
        let truncated = self.enforce_budget();

        if entries_folded == 0 && !truncated {
            return None;
        }

        let report = CompactionReport {
            entries_folded,
            tokens_before,
            tokens_after: self.token_size(),
            used_fallback,
            truncated,
        };
        debug!(
            folded = report.entries_folded,
            tokens_before = report.tokens_before,
            tokens_after = report.tokens_after,
            "Working memory compacted"
        );
        Some(report)
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Index of the first entry kept verbatim.
    fn split_point(&self) -> usize {
        let mut kept = 0;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if entry.as_step().is_some() {
                kept += 1;
                if kept == self.preserve_recent {
                    return i;
                }
            }
        }
        0
    }

    async fn fold(&mut self, summarizer: &dyn Summarizer) -> (usize, bool) {
        let split = self.split_point();
        let older = &self.entries[..split];

        // A lone summary is already folded.
        if older.is_empty() || (older.len() == 1 && older[0].is_summary()) {
            return (0, false);
        }

        let Some((first_step, last_step)) = step_range(older) else {
            return (0, false);
        };

        let (text, used_fallback) = match summarizer.summarize(older).await {
            Ok(text) if !text.trim().is_empty() => (text, false),
            Ok(_) => {
                warn!("Summarizer returned an empty summary, using digest");
                (truncation_digest(older), true)
            }
            Err(e) => {
                warn!("Summarizer failed, using digest: {e}");
                (truncation_digest(older), true)
            }
        };

        let folded = split;
        let recent = self.entries.split_off(split);
        self.entries = Vec::with_capacity(recent.len() + 1);
        self.entries.push(MemoryEntry::Summary(StepSummary {
            first_step,
            last_step,
            text,
        }));
        self.entries.extend(recent);
        (folded, used_fallback)
    }

    /// Cut the summary, then the preserved steps, until the budget holds.
    fn enforce_budget(&mut self) -> bool {
        let Some(max) = self.max_tokens else {
            return false;
        };
        if self.token_size() <= max {
            return false;
        }

        let step_tokens: usize = self
            .entries
            .iter()
            .filter(|e| !e.is_summary())
            .map(entry_tokens)
            .sum();

        for entry in &mut self.entries {
            if let MemoryEntry::Summary(summary) = entry {
                summary.text = truncate_to_tokens(&summary.text, max.saturating_sub(step_tokens));
            }
        }

        let summary_tokens = self.token_size() - step_tokens;
        let steps = self.entries.iter().filter(|e| !e.is_summary()).count();
        if step_tokens + summary_tokens > max && steps > 0 {
            let per_field = max.saturating_sub(summary_tokens) / (steps * 2);
            for entry in &mut self.entries {
                if let MemoryEntry::Step(step) = entry {
                    step.model_output = truncate_to_tokens(&step.model_output, per_field);
                    if let Some(obs) = &step.observation {
                        step.observation = Some(truncate_to_tokens(obs, per_field));
                    }
                }
            }
        }
        true
    }
}

fn entry_tokens(entry: &MemoryEntry) -> usize {
    match entry {
        MemoryEntry::Summary(summary) => estimate_tokens(&summary.text),
        MemoryEntry::Step(step) => step.sized_text().iter().map(|t| estimate_tokens(t)).sum(),
    }
}

fn step_range(entries: &[MemoryEntry]) -> Option<(usize, usize)> {
    let first = entries.iter().find_map(|e| match e {
        MemoryEntry::Summary(s) => Some(s.first_step),
        MemoryEntry::Step(s) => Some(s.index),
    })?;
    let last = entries.iter().rev().find_map(|e| match e {
        MemoryEntry::Summary(s) => Some(s.last_step),
        MemoryEntry::Step(s) => Some(s.index),
    })?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::TruncatingSummarizer;
    use async_trait::async_trait;
    use serde_json::json;
    use stepwise_core::error::ProviderError;
    use stepwise_core::step::StepAction;
    use stepwise_core::tool::ToolCall;

    fn step(index: usize, observation: &str) -> StepRecord {
        StepRecord {
            index,
            prompt: format!("prompt {index}"),
            model_output: format!("output {index}"),
            thought: String::new(),
            action: StepAction::ToolCall(ToolCall::new("list_directory", json!({}))),
            observation: Some(observation.to_string()),
        }
    }

    fn indices(memory: &WorkingMemory) -> Vec<Option<usize>> {
        memory
            .snapshot()
            .iter()
            .map(|e| e.as_step().map(|s| s.index))
            .collect()
    }

    struct FixedSummarizer(String);

    fn fixed(text: &str) -> FixedSummarizer {
        FixedSummarizer(text.to_string())
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _entries: &[MemoryEntry]) -> Result<String, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _entries: &[MemoryEntry]) -> Result<String, ProviderError> {
            Err(ProviderError::Network("down".into()))
        }
    }

    #[test]
    fn append_preserves_order() {
        let mut memory = WorkingMemory::new(3, 10, None);
        for i in 1..=4 {
            memory.append(step(i, "ok"));
        }
        assert_eq!(indices(&memory), vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(memory.steps_since_compaction(), 4);
    }

    #[test]
    fn cadence_triggers_compaction() {
        let mut memory = WorkingMemory::new(2, 3, None);
        memory.append(step(1, "a"));
        memory.append(step(2, "b"));
        assert!(!memory.should_compact());
        memory.append(step(3, "c"));
        assert!(memory.should_compact());
    }

    #[test]
    fn budget_triggers_compaction() {
        let mut memory = WorkingMemory::new(2, 100, Some(50));
        memory.append(step(1, &"x".repeat(400)));
        assert!(memory.should_compact());
    }

    #[tokio::test]
    async fn compaction_keeps_last_steps_verbatim() {
        let mut memory = WorkingMemory::new(3, 5, None);
        for i in 1..=5 {
            memory.append(step(i, &format!("observation {i}")));
        }
        let before: Vec<StepRecord> = memory
            .snapshot()
            .iter()
            .filter_map(|e| e.as_step().cloned())
            .collect();

        let report = memory.compact(&fixed("did 1 and 2")).await.unwrap();
        assert_eq!(report.entries_folded, 2);
        assert!(!report.used_fallback);

        assert_eq!(indices(&memory), vec![None, Some(3), Some(4), Some(5)]);
        let MemoryEntry::Summary(summary) = &memory.snapshot()[0] else {
            panic!("expected summary first");
        };
        assert_eq!((summary.first_step, summary.last_step), (1, 2));
        assert_eq!(summary.text, "did 1 and 2");

        let kept: Vec<&StepRecord> = memory.snapshot().iter().filter_map(|e| e.as_step()).collect();
        assert_eq!(kept, before[2..].iter().collect::<Vec<_>>());
        assert_eq!(memory.steps_since_compaction(), 0);
    }

    #[tokio::test]
    async fn repeated_compaction_is_a_no_op() {
        let mut memory = WorkingMemory::new(2, 3, Some(10_000));
        for i in 1..=6 {
            memory.append(step(i, "ok"));
        }
        assert!(memory.compact(&TruncatingSummarizer).await.is_some());
        let once = memory.snapshot().to_vec();

        assert!(memory.compact(&TruncatingSummarizer).await.is_none());
        assert_eq!(memory.snapshot(), once.as_slice());
    }

    #[tokio::test]
    async fn previous_summary_is_folded_again() {
        let mut memory = WorkingMemory::new(2, 2, None);
        for i in 1..=4 {
            memory.append(step(i, "ok"));
        }
        memory.compact(&fixed("first")).await;
        for i in 5..=6 {
            memory.append(step(i, "ok"));
        }
        memory.compact(&fixed("second")).await;

        assert_eq!(indices(&memory), vec![None, Some(5), Some(6)]);
        let MemoryEntry::Summary(summary) = &memory.snapshot()[0] else {
            panic!("expected summary first");
        };
        assert_eq!((summary.first_step, summary.last_step), (1, 4));
        assert_eq!(summary.text, "second");
    }

    #[tokio::test]
    async fn fewer_steps_than_preserved_is_left_alone() {
        let mut memory = WorkingMemory::new(3, 1, None);
        memory.append(step(1, "ok"));
        memory.append(step(2, "ok"));
        assert!(memory.compact(&fixed("unused")).await.is_none());
        assert_eq!(indices(&memory), vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_digest() {
        let mut memory = WorkingMemory::new(2, 3, None);
        for i in 1..=3 {
            memory.append(step(i, &format!("observation {i}")));
        }
        let report = memory.compact(&BrokenSummarizer).await.unwrap();
        assert!(report.used_fallback);

        let MemoryEntry::Summary(summary) = &memory.snapshot()[0] else {
            panic!("expected summary first");
        };
        assert!(summary.text.contains("Step 1: called list_directory"));
        assert!(summary.text.contains("observation 1"));
    }

    #[tokio::test]
    async fn budget_truncates_summary_before_steps() {
        let mut memory = WorkingMemory::new(2, 100, Some(40));
        for i in 1..=4 {
            memory.append(step(i, "short"));
        }
        let report = memory
            .compact(&FixedSummarizer("s".repeat(2_000)))
            .await
            .unwrap();

        assert!(report.truncated);
        assert!(memory.token_size() <= 40);
        assert_eq!(memory.snapshot()[1].as_step().unwrap().observation.as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn budget_truncates_preserved_steps_when_needed() {
        let mut memory = WorkingMemory::new(2, 100, Some(30));
        for i in 1..=3 {
            memory.append(step(i, &"o".repeat(1_000)));
        }
        memory.compact(&TruncatingSummarizer).await.unwrap();

        assert!(memory.token_size() <= 30, "size {}", memory.token_size());
        assert!(memory.len() <= 3);
        assert!(memory.compact(&TruncatingSummarizer).await.is_none());
    }
}
