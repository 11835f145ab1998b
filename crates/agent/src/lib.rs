//! The task loop, the heart of stepwise.
//!
//! The engine follows a **Think → Act → Observe** cycle:
//!
//! 1. **Build a prompt** from the task, the mode's tools, and working memory
//! 2. **Think**: send it to the model, streaming fragments onto the event bus
//! 3. **Parse** exactly one action from the response
//! 4. **If tool call**: dispatch it and record the observation, then loop
//! 5. **If final answer**: return it
//!
//! The loop ends on a final answer, a provider failure, cancellation, or
//! when the iteration budget is spent.

pub mod action;
pub mod compaction;
pub mod context;
pub mod engine;
pub mod prompt;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{ParsedAction, parse_action};
pub use compaction::{ModelSummarizer, Summarizer, TruncatingSummarizer};
pub use context::{CompactionReport, WorkingMemory, estimate_tokens};
pub use engine::{TaskEngine, TaskEngineBuilder, run_task};
