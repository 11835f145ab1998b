//! Shared subprocess runner for the execution tools.

use std::time::Duration;
use stepwise_core::error::ToolError;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::truncate_chars;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Upper bound accepted for the `timeout_secs` argument.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Default cap on each of stdout and stderr, in characters.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;

/// Run `program args...`, capture output, and render it as an observation.
///
/// A non-zero exit is not an error: the exit code and stderr go into the
/// returned text so the model can react to them. Spawn failures and
/// timeouts are errors. Each stream is cut to `max_chars` characters.
pub async fn run(
    tool: &str,
    program: &str,
    args: &[&str],
    timeout_secs: u64,
    max_chars: usize,
) -> Result<String, ToolError> {
    let timeout_secs = timeout_secs.clamp(1, MAX_TIMEOUT_SECS);
    debug!(tool, program, timeout_secs, "Spawning process");

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::ExecutionFailed {
                tool: tool.to_string(),
                reason: format!("failed to start {program}: {e}"),
            });
        }
        Err(_) => {
            warn!(tool, timeout_secs, "Process timed out");
            return Err(ToolError::Timeout {
                tool: tool.to_string(),
                timeout_secs,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        warn!(tool, exit_code = code, "Process exited with failure");
    }

    let mut text = format!("[exit code: {code}]");
    if !stdout.trim().is_empty() {
        text.push_str("\n[stdout]\n");
        text.push_str(&truncate_chars(stdout.trim_end(), max_chars));
    }
    if !stderr.trim().is_empty() {
        text.push_str("\n[stderr]\n");
        text.push_str(&truncate_chars(stderr.trim_end(), max_chars));
    }
    Ok(text)
}

/// Read the `timeout_secs` argument, falling back to the default.
pub fn timeout_arg(arguments: &stepwise_core::ToolArguments) -> u64 {
    arguments
        .int("timeout_secs")
        .and_then(|t| u64::try_from(t).ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

/// Read the `max_chars` argument, falling back to the default.
pub fn max_chars_arg(arguments: &stepwise_core::ToolArguments) -> usize {
    arguments
        .int("max_chars")
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(DEFAULT_MAX_OUTPUT_CHARS)
        .max(1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn long_output_is_capped() {
        let text = run("shell_execute", "sh", &["-c", "head -c 300000 /dev/zero | tr '\\0' a"], 10, 1_000)
            .await
            .unwrap();
        assert!(text.len() < 1_100);
        assert!(text.contains("[truncated: 300000 chars total]"));
    }

    #[tokio::test]
    async fn short_output_is_untouched() {
        let text = run("shell_execute", "sh", &["-c", "echo hi; echo err >&2"], 10, 1_000)
            .await
            .unwrap();
        assert_eq!(text, "[exit code: 0]\n[stdout]\nhi\n[stderr]\nerr");
    }
}
