//! Action encoding: how the model names its next move.
//!
//! Each model response must contain exactly one action block:
//!
//! ```text
//! <tool_call>
//! {"name": "read_file", "arguments": {"path": "notes.txt"}}
//! </tool_call>
//! ```
//!
//! or
//!
//! ```text
//! <final_answer>
//! The file lists three open issues.
//! </final_answer>
//! ```
//!
//! Text outside the block is the step's thought. Parsing is pure: the same
//! text always yields the same result.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use stepwise_core::error::ActionParseError;
use stepwise_core::tool::ToolCall;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const FINAL_ANSWER_OPEN: &str = "<final_answer>";

/// The action chosen by one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAction {
    ToolCall { thought: String, call: ToolCall },
    FinalAnswer { thought: String, answer: String },
}

impl ParsedAction {
    pub fn thought(&self) -> &str {
        match self {
            Self::ToolCall { thought, .. } | Self::FinalAnswer { thought, .. } => thought,
        }
    }
}

/// Regex for matching a `<tool_call>...</tool_call>` block.
fn tool_call_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("failed to compile tool_call regex")
    });
    &RE
}

/// Regex for matching a `<final_answer>...</final_answer>` block.
fn final_answer_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<final_answer>(.*?)</final_answer>")
            .expect("failed to compile final_answer regex")
    });
    &RE
}

/// Regex for a fenced code block wrapped around the tool call JSON.
fn code_fence_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("failed to compile code fence regex")
    });
    &RE
}

/// Parse one model response into its action.
pub fn parse_action(text: &str) -> Result<ParsedAction, ActionParseError> {
    let tool_calls = text.matches(TOOL_CALL_OPEN).count();
    let final_answers = text.matches(FINAL_ANSWER_OPEN).count();

    match (tool_calls, final_answers) {
        (0, 0) => Err(ActionParseError::NoAction),
        (1, 0) => parse_tool_call(text),
        (n, 0) => Err(ActionParseError::MultipleToolCalls(n)),
        (0, _) => parse_final_answer(text),
        _ => Err(ActionParseError::Ambiguous),
    }
}

fn parse_tool_call(text: &str) -> Result<ParsedAction, ActionParseError> {
    let caps = tool_call_re()
        .captures(text)
        .ok_or(ActionParseError::Unterminated("tool_call"))?;
    let body = caps.get(1).map_or("", |m| m.as_str()).trim();
    let body = code_fence_re()
        .captures(body)
        .and_then(|c| c.get(1))
        .map_or(body, |m| m.as_str());

    let value: Value =
        serde_json::from_str(body).map_err(|e| ActionParseError::InvalidJson(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ActionParseError::InvalidJson(format!(
            "expected an object, got {}",
            json_type(&value)
        )));
    };

    let name = match object.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(ActionParseError::MissingName),
    };

    let arguments = match object.remove("arguments") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(args @ Value::Object(_)) => args,
        Some(other) => return Err(ActionParseError::InvalidArguments(json_type(&other).into())),
    };

    Ok(ParsedAction::ToolCall {
        thought: thought_outside(text, tool_call_re()),
        call: ToolCall::new(name, arguments),
    })
}

fn parse_final_answer(text: &str) -> Result<ParsedAction, ActionParseError> {
    let caps = final_answer_re()
        .captures(text)
        .ok_or(ActionParseError::Unterminated("final_answer"))?;
    let answer = caps.get(1).map_or("", |m| m.as_str()).trim();
    if answer.is_empty() {
        return Err(ActionParseError::EmptyAnswer);
    }

    Ok(ParsedAction::FinalAnswer {
        thought: thought_outside(text, final_answer_re()),
        answer: answer.to_string(),
    })
}

fn thought_outside(text: &str, block: &Regex) -> String {
    block.replace_all(text, "").trim().to_string()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
