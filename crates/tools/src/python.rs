//! Python tool: run a snippet with `python3 -c`.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};

use crate::process;

pub struct PythonTool {
    descriptor: ToolDescriptor,
    interpreter: String,
}

impl PythonTool {
    pub fn new() -> Self {
        Self::with_interpreter("python3")
    }

    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "python_execute",
                "Run a Python 3 script and return its exit code, stdout and stderr. \
                 Print the values you need to see.",
                ToolCategory::Execution,
            )
            .argument(ToolArgument::required("code", ArgType::String, "Python source to run"))
            .argument(
                ToolArgument::optional("timeout_secs", ArgType::Int, "Seconds before the script is killed")
                    .with_default(process::DEFAULT_TIMEOUT_SECS as i64),
            )
            .argument(
                ToolArgument::optional("max_chars", ArgType::Int, "Cap on stdout and stderr, in characters each")
                    .with_default(process::DEFAULT_MAX_OUTPUT_CHARS as i64),
            ),
            interpreter: interpreter.into(),
        }
    }
}

impl Default for PythonTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let code = arguments.require_str("code")?;
        process::run(
            self.name(),
            &self.interpreter,
            &["-c", code],
            process::timeout_arg(arguments),
            process::max_chars_arg(arguments),
        )
        .await
    }
}
