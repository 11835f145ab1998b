//! Per-task working memory and its size accounting.
//!
//! Working memory holds the ordered step records of one task. Once it grows
//! past the compaction cadence or the token budget, older steps are folded
//! into a single summary entry while the most recent steps stay verbatim.
//!
//! | Entry | Source | Trim Strategy |
//! |-------|--------|---------------|
//! | Summary | Compaction of older steps | Truncated first |
//! | Recent steps | Loop iterations | Long fields truncated last |

pub mod token;
pub mod working_memory;

pub use token::{estimate_messages_tokens, estimate_tokens, truncate_to_tokens};
pub use working_memory::{CompactionReport, WorkingMemory};
