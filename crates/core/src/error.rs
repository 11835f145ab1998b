//! Error types for the stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the engine decides which
//! of them are fatal and which are converted into observations.

use thiserror::Error;

/// The top-level error type for all stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Setup errors ---
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Model output errors ---
    #[error("Action parse error: {0}")]
    ActionParse(#[from] ActionParseError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Misconfiguration detected before the loop starts. Always fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown mode '{mode}' (supported: {supported})")]
    UnknownMode { mode: String, supported: String },

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures surfaced by tool lookup, argument validation, or execution.
///
/// None of these abort a task: the engine renders them with
/// [`ToolError::to_observation`] and feeds the text back to the model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool '{name}'. Available tools: {}", available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Tool '{tool}' is missing required argument '{argument}'")]
    MissingArgument { tool: String, argument: String },

    #[error("Tool '{tool}' argument '{argument}' must be {expected}: {reason}")]
    InvalidArgument {
        tool: String,
        argument: String,
        expected: String,
        reason: String,
    },

    #[error("Tool '{tool}' does not accept argument '{argument}'")]
    UnexpectedArgument { tool: String, argument: String },

    #[error("Tool execution failed: {tool}: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Tool timed out: {tool} after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },
}

impl ToolError {
    /// Whether this error comes from argument validation (as opposed to
    /// lookup or execution).
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. } | Self::UnexpectedArgument { .. }
        )
    }

    /// Render the error as an observation the model can react to.
    pub fn to_observation(&self) -> String {
        let label = match self {
            Self::UnknownTool { .. } => "UnknownToolError",
            Self::MissingArgument { .. }
            | Self::InvalidArgument { .. }
            | Self::UnexpectedArgument { .. } => "ToolArgumentError",
            Self::ExecutionFailed { .. } | Self::Timeout { .. } => "ToolExecutionError",
        };
        format!("{label}: {self}")
    }
}

/// Malformed model output. Recoverable: consumes one iteration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("no <tool_call> or <final_answer> block found")]
    NoAction,

    #[error("response contains both a <tool_call> and a <final_answer> block")]
    Ambiguous,

    #[error("response contains {0} <tool_call> blocks; exactly one is allowed per step")]
    MultipleToolCalls(usize),

    #[error("<{0}> block is not terminated")]
    Unterminated(&'static str),

    #[error("tool call is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("tool call has no string 'name' field")]
    MissingName,

    #[error("tool call 'arguments' must be a JSON object, got {0}")]
    InvalidArguments(String),

    #[error("<final_answer> block is empty")]
    EmptyAnswer,
}

impl ActionParseError {
    /// Render the error as an observation, restating the expected format.
    pub fn to_observation(&self) -> String {
        format!(
            "ActionParseError: {self}. Respond with exactly one \
             <tool_call>{{\"name\": ..., \"arguments\": {{...}}}}</tool_call> block \
             or one <final_answer>...</final_answer> block."
        )
    }
}
