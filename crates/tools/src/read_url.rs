//! URL reader: fetch a page and return its readable text.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};
use tracing::debug;

use crate::truncate_chars;

const DEFAULT_MAX_CHARS: i64 = 8_000;

pub struct ReadUrlTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
}

impl ReadUrlTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "read_url",
                "Fetch a web page and return its text content with markup removed.",
                ToolCategory::Retrieval,
            )
            .argument(ToolArgument::required("url", ArgType::String, "http(s) URL to fetch"))
            .argument(
                ToolArgument::optional("max_chars", ArgType::Int, "Truncate the text after this many characters")
                    .with_default(DEFAULT_MAX_CHARS),
            ),
            client,
        }
    }

    fn failed(&self, reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool: self.descriptor.name.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Tool for ReadUrlTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let url = arguments.require_str("url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArgument {
                tool: self.descriptor.name.clone(),
                argument: "url".into(),
                expected: "an http(s) URL".into(),
                reason: format!("got '{url}'"),
            });
        }
        let max_chars = arguments.int("max_chars").unwrap_or(DEFAULT_MAX_CHARS).max(1) as usize;

        debug!(url, "Fetching URL");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.failed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!("{url} returned HTTP {status}")));
        }

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));

        let body = response
            .text()
            .await
            .map_err(|e| self.failed(format!("failed to read body: {e}")))?;

        let text = if is_html { html_to_text(&body) } else { body };
        Ok(truncate_chars(&text, max_chars))
    }
}

fn script_style_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>")
            .expect("failed to compile script/style regex")
    });
    &RE
}

fn tag_re() -> &'static Regex {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("failed to compile tag regex"));
    &RE
}

fn blank_lines_re() -> &'static Regex {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("failed to compile blank-line regex"));
    &RE
}

/// Strip markup, decode the common entities, and squeeze whitespace.
pub fn html_to_text(html: &str) -> String {
    let text = script_style_re().replace_all(html, "");
    let text = tag_re().replace_all(&text, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .collect();
    let joined = lines.join("\n");
    blank_lines_re().replace_all(&joined, "\n").trim().to_string()
}
