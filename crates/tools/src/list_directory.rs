//! Directory listing tool (non-recursive, sorted).

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};

pub struct ListDirectoryTool {
    descriptor: ToolDescriptor,
}

impl ListDirectoryTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "list_directory",
                "List the entries of a directory. Directories are shown with a trailing '/'.",
                ToolCategory::Filesystem,
            )
            .argument(
                ToolArgument::optional("path", ArgType::String, "Directory to list").with_default("."),
            ),
        }
    }
}

impl Default for ListDirectoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let path = arguments.str("path").unwrap_or(".");
        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool: self.descriptor.name.clone(),
            reason: format!("failed to list {path}: {e}"),
        };

        let mut reader = tokio::fs::read_dir(path).await.map_err(failed)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(failed)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let outcome = ListDirectoryTool::new()
            .call(&json!({"path": dir.path().to_str().unwrap()}))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ListDirectoryTool::new()
            .call(&json!({"path": dir.path().to_str().unwrap()}))
            .await;
        assert!(outcome.output.ends_with("is empty"));
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let outcome = ListDirectoryTool::new()
            .call(&json!({"path": "/nonexistent/dir"}))
            .await;
        assert!(!outcome.success);
    }
}
