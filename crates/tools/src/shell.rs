//! Shell tool: execute a command through `sh -c`.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};

use crate::process;

pub struct ShellTool {
    descriptor: ToolDescriptor,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "shell_execute",
                "Execute a shell command and return its exit code, stdout and stderr.",
                ToolCategory::Execution,
            )
            .argument(ToolArgument::required(
                "command",
                ArgType::String,
                "The shell command to execute",
            ))
            .argument(
                ToolArgument::optional("timeout_secs", ArgType::Int, "Seconds before the command is killed")
                    .with_default(process::DEFAULT_TIMEOUT_SECS as i64),
            )
            .argument(
                ToolArgument::optional("max_chars", ArgType::Int, "Cap on stdout and stderr, in characters each")
                    .with_default(process::DEFAULT_MAX_OUTPUT_CHARS as i64),
            ),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let command = arguments.require_str("command")?;
        let (program, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        process::run(
            self.name(),
            program,
            &[flag, command],
            process::timeout_arg(arguments),
            process::max_chars_arg(arguments),
        )
        .await
    }
}
