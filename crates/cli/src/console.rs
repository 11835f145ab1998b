//! Console presentation of engine events.
//!
//! Stream fragments go to stdout as they arrive; everything else is a
//! status line on stderr so the answer can be piped cleanly.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use stepwise_core::event::{Event, EventHandler, EventPayload, HandlerError};

const PREVIEW_CHARS: usize = 200;

pub struct ConsoleSink {
    verbose: bool,
    /// A fragment was printed without a trailing newline.
    mid_line: AtomicBool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            mid_line: AtomicBool::new(false),
        }
    }
}

impl EventHandler for ConsoleSink {
    fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if let EventPayload::StreamFragment { content, .. } = &event.payload {
            let mut out = std::io::stdout().lock();
            out.write_all(content.as_bytes())?;
            out.flush()?;
            self.mid_line.store(!content.ends_with('\n'), Ordering::Relaxed);
            return Ok(());
        }

        if self.mid_line.swap(false, Ordering::Relaxed) {
            println!();
        }
        if let Some(line) = status_line(&event.payload, self.verbose) {
            eprintln!("{line}");
        }
        Ok(())
    }
}

/// The stderr line for an event, if it gets one.
pub fn status_line(payload: &EventPayload, verbose: bool) -> Option<String> {
    match payload {
        EventPayload::StepStarted {
            step,
            max_iterations,
        } => Some(format!("── step {step}/{max_iterations} ──")),
        EventPayload::ThinkingStarted { .. } => Some("  thinking...".into()),
        EventPayload::ToolStarted {
            tool, arguments, ..
        } => Some(format!("  → {tool} {arguments}")),
        EventPayload::ToolEnded {
            tool,
            success,
            duration_ms,
            output,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            let mut line = format!("  ← {tool} {status} ({duration_ms} ms)");
            if verbose || !success {
                line.push_str("\n    ");
                line.push_str(&preview(output));
            }
            Some(line)
        }
        EventPayload::TaskFailed { kind, message } => Some(format!("✗ {kind} error: {message}")),
        EventPayload::ThinkingEnded { .. }
        | EventPayload::StreamFragment { .. }
        | EventPayload::TaskCompleted { .. } => None,
    }
}

fn preview(output: &str) -> String {
    let flat = output.trim().replace('\n', " ⏎ ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::task::FailureKind;

    #[test]
    fn step_and_tool_lines() {
        let started = EventPayload::StepStarted {
            step: 2,
            max_iterations: 30,
        };
        assert_eq!(status_line(&started, false).unwrap(), "── step 2/30 ──");

        let tool = EventPayload::ToolStarted {
            step: 2,
            tool: "read_file".into(),
            arguments: json!({"path": "a.txt"}),
        };
        assert_eq!(
            status_line(&tool, false).unwrap(),
            r#"  → read_file {"path":"a.txt"}"#
        );
    }

    #[test]
    fn tool_output_shown_on_failure_or_verbose() {
        let ended = |success| EventPayload::ToolEnded {
            step: 1,
            tool: "shell_execute".into(),
            success,
            duration_ms: 12,
            output: "line one\nline two".into(),
        };
        assert_eq!(
            status_line(&ended(true), false).unwrap(),
            "  ← shell_execute ok (12 ms)"
        );
        assert!(status_line(&ended(true), true).unwrap().contains("line one ⏎ line two"));
        assert!(status_line(&ended(false), false).unwrap().contains("failed"));
    }

    #[test]
    fn fragments_and_completion_have_no_status_line() {
        let fragment = EventPayload::StreamFragment {
            step: 1,
            content: "x".into(),
        };
        assert!(status_line(&fragment, true).is_none());

        let failed = EventPayload::TaskFailed {
            kind: FailureKind::Provider,
            message: "rate limited".into(),
        };
        assert_eq!(
            status_line(&failed, false).unwrap(),
            "✗ provider error: rate limited"
        );
    }

    #[test]
    fn preview_is_bounded() {
        let long = "y".repeat(1_000);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
    }
}
