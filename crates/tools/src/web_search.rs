//! Web search tool backed by the DuckDuckGo instant-answer API.

use async_trait::async_trait;
use serde::Deserialize;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};
use tracing::debug;

const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";
const DEFAULT_MAX_RESULTS: i64 = 5;
const MAX_RESULTS_CAP: usize = 20;

pub struct WebSearchTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, DUCKDUCKGO_API)
    }

    /// Point the tool at a different instant-answer endpoint.
    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "web_search",
                "Search the web. Returns numbered results with a title or snippet and a URL.",
                ToolCategory::Retrieval,
            )
            .argument(ToolArgument::required("query", ArgType::String, "The search query"))
            .argument(
                ToolArgument::optional("max_results", ArgType::Int, "Maximum number of results")
                    .with_default(DEFAULT_MAX_RESULTS),
            ),
            client,
            endpoint: endpoint.into(),
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
impl Tool for WebSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let query = arguments.require_str("query")?;
        let max_results = arguments
            .int("max_results")
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CAP as i64) as usize;

        debug!(query, max_results, "Searching DuckDuckGo");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| self.failed(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self.failed(format!("search returned HTTP {}", response.status())));
        }

        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| self.failed(format!("unreadable search response: {e}")))?;

        let results = answer.results(max_results);
        if results.is_empty() {
            return Ok(format!("No results for: {query}"));
        }

        let mut lines = vec![format!("Results for: {query}")];
        for (i, hit) in results.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, hit.text));
            if !hit.url.is_empty() {
                lines.push(format!("   {}", hit.url));
            }
        }
        Ok(lines.join("\n"))
    }
}

// --- Instant-answer API types (internal) ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a single topic or a named group of topics.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
    Topic {
        #[serde(rename = "Text", default)]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
}

struct Hit {
    text: String,
    url: String,
}

impl InstantAnswer {
    fn results(self, max: usize) -> Vec<Hit> {
        let mut hits = Vec::new();

        if !self.answer.is_empty() {
            hits.push(Hit {
                text: self.answer,
                url: String::new(),
            });
        }
        if !self.abstract_text.is_empty() {
            let text = if self.heading.is_empty() {
                self.abstract_text
            } else {
                format!("{}: {}", self.heading, self.abstract_text)
            };
            hits.push(Hit {
                text,
                url: self.abstract_url,
            });
        }

        let mut stack: Vec<RelatedTopic> = self.related_topics.into_iter().rev().collect();
        while let Some(topic) = stack.pop() {
            match topic {
                RelatedTopic::Topic { text, first_url } if !text.is_empty() => {
                    hits.push(Hit {
                        text,
                        url: first_url,
                    });
                }
                RelatedTopic::Topic { .. } => {}
                RelatedTopic::Group { topics } => stack.extend(topics.into_iter().rev()),
            }
        }

        hits.truncate(max);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> serde_json::Value {
        json!({
            "Heading": "Rust (programming language)",
            "AbstractText": "Rust is a general-purpose programming language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
            "Answer": "",
            "RelatedTopics": [
                {"Text": "Cargo - package manager", "FirstURL": "https://duckduckgo.com/Cargo"},
                {"Name": "See also", "Topics": [
                    {"Text": "Ferris - mascot", "FirstURL": "https://duckduckgo.com/Ferris"}
                ]},
                {"Text": "rustup - toolchain installer", "FirstURL": "https://duckduckgo.com/rustup"}
            ]
        })
    }

    #[test]
    fn flattens_grouped_topics_in_order() {
        let answer: InstantAnswer = serde_json::from_value(sample()).unwrap();
        let hits = answer.results(10);
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts.len(), 4);
        assert!(texts[0].starts_with("Rust (programming language): "));
        assert_eq!(texts[1], "Cargo - package manager");
        assert_eq!(texts[2], "Ferris - mascot");
        assert_eq!(texts[3], "rustup - toolchain installer");
    }

    #[tokio::test]
    async fn search_respects_max_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample()))
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_endpoint(reqwest::Client::new(), server.uri());
        let outcome = tool.call(&json!({"query": "rust", "max_results": 2})).await;
        assert!(outcome.success, "{}", outcome.output);
        assert!(outcome.output.contains("1. Rust (programming language)"));
        assert!(outcome.output.contains("2. Cargo"));
        assert!(!outcome.output.contains("3."));
    }

    #[tokio::test]
    async fn empty_answer_reports_no_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"RelatedTopics": []})))
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_endpoint(reqwest::Client::new(), server.uri());
        let outcome = tool.call(&json!({"query": "zzqx"})).await;
        assert_eq!(outcome.output, "No results for: zzqx");
    }

    #[tokio::test]
    async fn http_error_is_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_endpoint(reqwest::Client::new(), server.uri());
        let outcome = tool.call(&json!({"query": "rust"})).await;
        assert!(!outcome.success);
        assert!(outcome.output.contains("503"));
    }
}
