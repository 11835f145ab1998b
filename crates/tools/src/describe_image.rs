//! Vision tool: ask a vision model about an image.

use async_trait::async_trait;
use std::sync::Arc;
use stepwise_core::error::ToolError;
use stepwise_core::message::Message;
use stepwise_core::provider::{CompletionRequest, Provider};
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};
use tracing::debug;

pub struct DescribeImageTool {
    descriptor: ToolDescriptor,
    provider: Arc<dyn Provider>,
    model: String,
}

impl DescribeImageTool {
    /// `model` is the bare model name the provider expects.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "describe_image",
                "Ask a vision model a question about an image given by URL.",
                ToolCategory::Vision,
            )
            .argument(ToolArgument::required("image_url", ArgType::String, "URL of the image"))
            .argument(
                ToolArgument::optional("question", ArgType::String, "What to ask about the image")
                    .with_default("Describe this image in detail."),
            ),
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Tool for DescribeImageTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let image_url = arguments.require_str("image_url")?;
        let question = arguments
            .str("question")
            .unwrap_or("Describe this image in detail.");

        debug!(model = %self.model, image_url, "Querying vision model");

        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::user(question).with_image(image_url)],
        );
        request.temperature = 0.2;

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: self.descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use stepwise_core::error::ProviderError;
    use stepwise_core::provider::CompletionResponse;

    #[derive(Default)]
    struct CapturingProvider {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl Provider for CapturingProvider {
        fn name(&self) -> &str {
            "capture"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            let model = request.model.clone();
            self.seen.lock().unwrap().push(request);
            Ok(CompletionResponse {
                content: "A cat on a mat.".into(),
                model,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn sends_image_to_vision_model() {
        let provider = Arc::new(CapturingProvider::default());
        let tool = DescribeImageTool::new(provider.clone(), "gpt-4o");

        let outcome = tool
            .call(&json!({"image_url": "https://img.example/cat.png"}))
            .await;
        assert_eq!(outcome.output, "A cat on a mat.");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model, "gpt-4o");
        assert_eq!(seen[0].messages[0].images, vec!["https://img.example/cat.png"]);
        assert_eq!(seen[0].messages[0].content, "Describe this image in detail.");
    }
}
