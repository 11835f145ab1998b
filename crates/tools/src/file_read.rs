//! File read tool: read a text file.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};

use crate::truncate_chars;

const DEFAULT_MAX_CHARS: i64 = 50_000;

pub struct FileReadTool {
    descriptor: ToolDescriptor,
}

impl FileReadTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "read_file",
                "Read the contents of a text file at the given path.",
                ToolCategory::Filesystem,
            )
            .argument(ToolArgument::required("path", ArgType::String, "The file path to read"))
            .argument(
                ToolArgument::optional("max_chars", ArgType::Int, "Truncate the content after this many characters")
                    .with_default(DEFAULT_MAX_CHARS),
            ),
        }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let path = arguments.require_str("path")?;
        let max_chars = arguments.int("max_chars").unwrap_or(DEFAULT_MAX_CHARS).max(1) as usize;

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: self.name().to_string(),
                reason: format!("failed to read {path}: {e}"),
            })?;

        Ok(truncate_chars(&content, max_chars))
    }
}
