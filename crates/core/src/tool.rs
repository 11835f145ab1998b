//! Tool contract: the abstraction over the engine's capabilities.
//!
//! A tool is a named function with a typed argument specification. The
//! model proposes a [`ToolCall`] with raw JSON arguments; the registry
//! validates them against the tool's [`ToolDescriptor`] and only then runs
//! the tool. Lookup, validation, and execution failures all come back as a
//! [`ToolOutcome`] whose text is fed to the model as the observation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigError, ToolError};
use crate::mode::ModeProfile;

/// The bundle a tool belongs to. Modes select tools by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Talking to the user
    Interaction,
    /// Reading and writing local files
    Filesystem,
    /// Running code or commands
    Execution,
    /// Fetching information from the network
    Retrieval,
    /// Asking a vision model about images
    Vision,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 5] = [
        Self::Interaction,
        Self::Filesystem,
        Self::Execution,
        Self::Retrieval,
        Self::Vision,
    ];
}

/// Semantic type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Int,
    Float,
    Bool,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// Coerce a raw JSON value into this type.
    fn coerce(&self, raw: &Value) -> Option<ArgValue> {
        match (self, raw) {
            (Self::String, Value::String(s)) => Some(ArgValue::String(s.clone())),
            (Self::String, Value::Number(n)) => Some(ArgValue::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(ArgValue::String(b.to_string())),
            (Self::Int, Value::Number(n)) => n.as_i64().map(ArgValue::Int),
            (Self::Int, Value::String(s)) => s.trim().parse().ok().map(ArgValue::Int),
            (Self::Float, Value::Number(n)) => n.as_f64().map(ArgValue::Float),
            (Self::Float, Value::String(s)) => s.trim().parse().ok().map(ArgValue::Float),
            (Self::Bool, Value::Bool(b)) => Some(ArgValue::Bool(*b)),
            (Self::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(ArgValue::Bool(true)),
                "false" => Some(ArgValue::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for ArgValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Specification of a single tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    pub arg_type: ArgType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArgValue>,
}

impl ToolArgument {
    /// A required argument.
    pub fn required(name: impl Into<String>, arg_type: ArgType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// An optional argument with no default.
    pub fn optional(name: impl Into<String>, arg_type: ArgType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, arg_type, description)
        }
    }

    /// Set the value used when the argument is omitted.
    pub fn with_default(mut self, value: impl Into<ArgValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Name, description, and argument specification of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub arguments: Vec<ToolArgument>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            arguments: Vec::new(),
        }
    }

    /// Append an argument specification (builder style).
    pub fn argument(mut self, argument: ToolArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Validate raw JSON arguments against this descriptor.
    ///
    /// Unknown keys, missing required arguments, and values that cannot be
    /// coerced to the declared type are contract violations. Optional
    /// arguments that are omitted (or `null`) take their default, if any.
    pub fn validate(&self, raw: &Value) -> Result<ToolArguments, ToolError> {
        let empty = serde_json::Map::new();
        let object = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::InvalidArgument {
                    tool: self.name.clone(),
                    argument: "arguments".into(),
                    expected: "an object".into(),
                    reason: format!("got {other}"),
                });
            }
        };

        if let Some(extra) = object
            .keys()
            .find(|key| !self.arguments.iter().any(|a| &a.name == *key))
        {
            return Err(ToolError::UnexpectedArgument {
                tool: self.name.clone(),
                argument: extra.clone(),
            });
        }

        let mut values = BTreeMap::new();
        for declared in &self.arguments {
            match object.get(&declared.name).filter(|v| !v.is_null()) {
                Some(raw_value) => {
                    let value = declared.arg_type.coerce(raw_value).ok_or_else(|| {
                        ToolError::InvalidArgument {
                            tool: self.name.clone(),
                            argument: declared.name.clone(),
                            expected: format!("of type {}", declared.arg_type),
                            reason: format!("got {raw_value}"),
                        }
                    })?;
                    values.insert(declared.name.clone(), value);
                }
                None => match (&declared.default, declared.required) {
                    (Some(default), _) => {
                        values.insert(declared.name.clone(), default.clone());
                    }
                    (None, true) => {
                        return Err(ToolError::MissingArgument {
                            tool: self.name.clone(),
                            argument: declared.name.clone(),
                        });
                    }
                    (None, false) => {}
                },
            }
        }

        Ok(ToolArguments {
            tool: self.name.clone(),
            values,
        })
    }

    /// Render this descriptor as a prompt section.
    pub fn render(&self) -> String {
        let mut out = format!("### {}\n{}\n", self.name, self.description);
        if self.arguments.is_empty() {
            out.push_str("Arguments: none\n");
            return out;
        }
        out.push_str("Arguments:\n");
        for arg in &self.arguments {
            let req = if arg.required { "required" } else { "optional" };
            let _ = write!(out, "- {} ({}, {})", arg.name, arg.arg_type, req);
            if let Some(default) = &arg.default {
                let _ = write!(out, " [default: {default}]");
            }
            let _ = writeln!(out, ": {}", arg.description);
        }
        out
    }
}

/// Arguments that passed descriptor validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    tool: String,
    values: BTreeMap<String, ArgValue>,
}

impl ToolArguments {
    /// Build arguments directly (for tools invoked outside the registry).
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Float(x)) => Some(*x),
            Some(ArgValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ArgValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// A string argument that must be present.
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str(name).ok_or_else(|| ToolError::MissingArgument {
            tool: self.tool.clone(),
            argument: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A tool invocation proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Raw arguments as a JSON object
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The observation produced by dispatching a [`ToolCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Whether the tool ran and returned normally
    pub success: bool,

    /// The text fed back to the model
    pub output: String,

    /// The failure, when there was one
    pub error: Option<ToolError>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: ToolError) -> Self {
        Self {
            success: false,
            output: error.to_observation(),
            error: Some(error),
        }
    }
}

/// The core Tool trait.
///
/// Implementations only see arguments that already passed
/// [`ToolDescriptor::validate`]. Side effects (printing, rendering) are the
/// tool's own business; the returned text is the sole observation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description, category, and argument specification.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with validated arguments.
    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError>;

    /// The unique name of this tool.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Validate raw arguments and execute. Never fails: errors become the
    /// outcome's observation text.
    async fn call(&self, raw_arguments: &Value) -> ToolOutcome {
        let arguments = match self.descriptor().validate(raw_arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::failed(e),
        };
        match self.execute(&arguments).await {
            Ok(output) => ToolOutcome::ok(output),
            Err(e) => ToolOutcome::failed(e),
        }
    }
}

/// Supplies the tools a mode may use.
///
/// Implementations return only tools whose category the profile allows.
pub trait ToolSource: Send + Sync {
    fn tools_for(&self, profile: &ModeProfile) -> Vec<Arc<dyn Tool>>;
}

/// The set of tools available to one engine instance.
///
/// Lookup is by name; [`ToolRegistry::list`] preserves registration order so
/// the prompt's tool section is stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ConfigError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ConfigError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Tool>, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
                available: self.names().into_iter().map(String::from).collect(),
            })
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve and run a tool call, converting every failure into an outcome.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let tool = match self.resolve(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                debug!(tool = %call.name, "Dispatch to unregistered tool");
                return ToolOutcome::failed(e);
            }
        };
        tool.call(&call.arguments).await
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
