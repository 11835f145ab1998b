//! Built-in tool implementations for stepwise.
//!
//! Tools are grouped by [`ToolCategory`]; a mode enables whole categories.
//!
//! | Category | Tools |
//! |----------|-------|
//! | Interaction | `input_question` |
//! | Filesystem | `read_file`, `write_file`, `list_directory` |
//! | Execution | `shell_execute`, `python_execute` |
//! | Retrieval | `web_search`, `read_url` |
//! | Vision | `describe_image` (needs a vision model) |

pub mod describe_image;
pub mod file_read;
pub mod file_write;
pub mod input_question;
pub mod list_directory;
pub mod process;
pub mod python;
pub mod read_url;
pub mod shell;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;
use stepwise_core::mode::ModeProfile;
use stepwise_core::provider::Provider;
use stepwise_core::tool::{Tool, ToolCategory, ToolSource};

pub use describe_image::DescribeImageTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use input_question::{InputQuestionTool, StdinPrompter, UserPrompter};
pub use list_directory::ListDirectoryTool;
pub use python::PythonTool;
pub use read_url::ReadUrlTool;
pub use shell::ShellTool;
pub use web_search::WebSearchTool;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Builds the built-in tools for a mode.
pub struct ToolCatalog {
    prompter: Arc<dyn UserPrompter>,
    client: reqwest::Client,
    vision: Option<(Arc<dyn Provider>, String)>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(concat!("stepwise/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            prompter: Arc::new(StdinPrompter),
            client,
            vision: None,
        }
    }

    /// Answer `input_question` from somewhere other than stdin.
    pub fn with_prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Enable `describe_image` with the given provider and bare model name.
    pub fn with_vision(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.vision = Some((provider, model.into()));
        self
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some()
    }

    /// All built-in tools of one category, in a fixed order.
    pub fn category(&self, category: ToolCategory) -> Vec<Arc<dyn Tool>> {
        match category {
            ToolCategory::Interaction => {
                vec![Arc::new(InputQuestionTool::new(Arc::clone(&self.prompter)))]
            }
            ToolCategory::Filesystem => vec![
                Arc::new(FileReadTool::new()),
                Arc::new(FileWriteTool::new()),
                Arc::new(ListDirectoryTool::new()),
            ],
            ToolCategory::Execution => vec![Arc::new(ShellTool::new()), Arc::new(PythonTool::new())],
            ToolCategory::Retrieval => vec![
                Arc::new(WebSearchTool::new(self.client.clone())),
                Arc::new(ReadUrlTool::new(self.client.clone())),
            ],
            ToolCategory::Vision => match &self.vision {
                Some((provider, model)) => {
                    vec![Arc::new(DescribeImageTool::new(Arc::clone(provider), model.clone()))]
                }
                None => Vec::new(),
            },
        }
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSource for ToolCatalog {
    fn tools_for(&self, profile: &ModeProfile) -> Vec<Arc<dyn Tool>> {
        profile
            .categories
            .iter()
            .flat_map(|c| self.category(*c))
            .collect()
    }
}

/// Cut `text` to at most `max_chars` characters, noting the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let total = text.chars().count();
            format!("{}\n[truncated: {total} chars total]", &text[..byte_idx])
        }
    }
}
