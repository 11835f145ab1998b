//! Prompt construction for one thinking cycle.
//!
//! The system message states the action format and lists the tools of the
//! active mode. The task follows as the first user message, then working
//! memory is replayed: a summary as a user message, each step as the
//! model's own output followed by its observation.

use std::fmt::Write;
use stepwise_core::message::{Message, Role};
use stepwise_core::step::MemoryEntry;
use stepwise_core::tool::ToolRegistry;

const SYSTEM_PREAMBLE: &str = "\
You are a task-solving agent. Work towards the task one step at a time. \
In every response, reason briefly about what to do next, then choose exactly ONE action.

To call a tool, respond with:
<tool_call>
{\"name\": \"<tool name>\", \"arguments\": {\"<argument>\": <value>}}
</tool_call>

When you can answer the task, respond with:
<final_answer>
<your answer>
</final_answer>

Rules:
- Never put a <tool_call> and a <final_answer> in the same response.
- Never make more than one tool call per response.
- After a tool call you receive its result as an observation. Errors are observations too; read them and adjust.";

const NO_TOOLS: &str = "No tools are available. Answer from your own knowledge.";

/// Render the system message for the given tools.
pub fn system_prompt(tools: &ToolRegistry) -> String {
    let mut out = String::from(SYSTEM_PREAMBLE);
    out.push_str("\n\n## Available tools\n\n");
    if tools.is_empty() {
        out.push_str(NO_TOOLS);
        return out;
    }
    for descriptor in tools.list() {
        out.push_str(&descriptor.render());
        out.push('\n');
    }
    out.truncate(out.trim_end().len());
    out
}

/// The messages for the next thinking cycle.
pub fn build_messages(system: &str, task: &str, memory: &[MemoryEntry]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 + memory.len() * 2);
    messages.push(Message::system(system));
    messages.push(Message::user(format!("## Task\n{}", task.trim())));

    for entry in memory {
        match entry {
            MemoryEntry::Summary(summary) => messages.push(Message::user(format!(
                "## Summary of steps {}-{}\n{}",
                summary.first_step, summary.last_step, summary.text
            ))),
            MemoryEntry::Step(step) => {
                messages.push(Message::assistant(step.model_output.clone()));
                if let Some(observation) = &step.observation {
                    messages.push(Message::user(format!(
                        "## Observation (step {})\n{observation}",
                        step.index
                    )));
                }
            }
        }
    }
    messages
}

/// The tail of `current` that was not already sent as part of `previous`.
///
/// After compaction the shared prefix shrinks to the system and task
/// messages, so the summary and the preserved steps count as new.
pub fn new_messages<'a>(previous: &[Message], current: &'a [Message]) -> &'a [Message] {
    let shared = previous
        .iter()
        .zip(current)
        .take_while(|(before, now)| before == now)
        .count();
    &current[shared..]
}

/// Flatten messages into the text kept on a step record.
pub fn render_prompt(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let _ = writeln!(out, "[{role}]\n{}\n", message.content);
    }
    out.truncate(out.trim_end().len());
    out
}
