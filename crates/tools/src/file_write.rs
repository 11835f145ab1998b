//! File write tool: create, overwrite, or append to a file.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};
use tokio::io::AsyncWriteExt;

pub struct FileWriteTool {
    descriptor: ToolDescriptor,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "write_file",
                "Write text to a file, creating parent directories as needed.",
                ToolCategory::Filesystem,
            )
            .argument(ToolArgument::required("path", ArgType::String, "The file path to write"))
            .argument(ToolArgument::required("content", ArgType::String, "The text to write"))
            .argument(
                ToolArgument::optional("append", ArgType::Bool, "Append instead of overwriting")
                    .with_default(false),
            ),
        }
    }

    fn failed(&self, reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool: self.descriptor.name.clone(),
            reason,
        }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let path = std::path::Path::new(arguments.require_str("path")?);
        let content = arguments.require_str("content")?;
        let append = arguments.bool("append").unwrap_or(false);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.failed(format!("failed to create {}: {e}", parent.display())))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(|e| self.failed(format!("failed to open {}: {e}", path.display())))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| self.failed(format!("failed to write {}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| self.failed(format!("failed to flush {}: {e}", path.display())))?;

        Ok(format!(
            "{} {} bytes to {}",
            if append { "Appended" } else { "Wrote" },
            content.len(),
            path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.txt");

        let outcome = FileWriteTool::new()
            .call(&json!({"path": path.to_str().unwrap(), "content": "hello"}))
            .await;
        assert!(outcome.success, "{}", outcome.output);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(outcome.output.contains("5 bytes"));
    }

    #[tokio::test]
    async fn overwrite_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let p = path.to_str().unwrap();
        let tool = FileWriteTool::new();

        tool.call(&json!({"path": p, "content": "one"})).await;
        tool.call(&json!({"path": p, "content": "two"})).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        tool.call(&json!({"path": p, "content": "three", "append": true})).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "twothree");
    }

    #[tokio::test]
    async fn missing_content_names_argument() {
        let outcome = FileWriteTool::new().call(&json!({"path": "/tmp/x"})).await;
        assert!(!outcome.success);
        assert!(outcome.output.contains("'content'"));
    }
}
