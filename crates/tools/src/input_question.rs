//! User interaction tool: ask the person running the task a question.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::sync::Arc;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ArgType, Tool, ToolArgument, ToolArguments, ToolCategory, ToolDescriptor};

/// Source of answers for [`InputQuestionTool`].
#[async_trait]
pub trait UserPrompter: Send + Sync {
    async fn ask(&self, question: &str) -> std::io::Result<String>;
}

/// Prompts on stderr and reads one line from stdin.
pub struct StdinPrompter;

#[async_trait]
impl UserPrompter for StdinPrompter {
    async fn ask(&self, question: &str) -> std::io::Result<String> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr().lock();
            write!(stderr, "\n? {question}\n> ")?;
            stderr.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

pub struct InputQuestionTool {
    descriptor: ToolDescriptor,
    prompter: Arc<dyn UserPrompter>,
}

impl InputQuestionTool {
    pub fn new(prompter: Arc<dyn UserPrompter>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "input_question",
                "Ask the user a question and return their answer.",
                ToolCategory::Interaction,
            )
            .argument(ToolArgument::required("question", ArgType::String, "The question to ask"))
            .argument(ToolArgument::optional(
                "default",
                ArgType::String,
                "Answer used when the user enters nothing",
            )),
            prompter,
        }
    }
}

#[async_trait]
impl Tool for InputQuestionTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        let question = arguments.require_str("question")?;
        let default = arguments.str("default");

        let prompt = match default {
            Some(d) => format!("{question} [{d}]"),
            None => question.to_string(),
        };

        let answer = self
            .prompter
            .ask(&prompt)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: self.descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        match (answer.trim().is_empty(), default) {
            (true, Some(d)) => Ok(d.to_string()),
            _ => Ok(answer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedPrompter {
        answer: String,
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserPrompter for ScriptedPrompter {
        async fn ask(&self, question: &str) -> std::io::Result<String> {
            self.asked.lock().unwrap().push(question.to_string());
            Ok(self.answer.clone())
        }
    }

    fn tool(answer: &str) -> (InputQuestionTool, Arc<ScriptedPrompter>) {
        let prompter = Arc::new(ScriptedPrompter {
            answer: answer.into(),
            asked: Mutex::new(Vec::new()),
        });
        (InputQuestionTool::new(prompter.clone()), prompter)
    }

    #[tokio::test]
    async fn returns_user_answer() {
        let (tool, prompter) = tool("Paris");
        let outcome = tool.call(&json!({"question": "Capital?"})).await;
        assert_eq!(outcome.output, "Paris");
        assert_eq!(prompter.asked.lock().unwrap()[0], "Capital?");
    }

    #[tokio::test]
    async fn empty_answer_uses_default() {
        let (tool, prompter) = tool("");
        let outcome = tool
            .call(&json!({"question": "Proceed?", "default": "yes"}))
            .await;
        assert_eq!(outcome.output, "yes");
        assert_eq!(prompter.asked.lock().unwrap()[0], "Proceed? [yes]");
    }
}
