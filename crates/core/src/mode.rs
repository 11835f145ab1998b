//! Mode resolver: maps an operating mode to a tool bundle and model defaults.
//!
//! Resolution is a pure function of the mode name (and whether a vision
//! model is configured). It runs once, before any model call, and its
//! result is fixed for the lifetime of a task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::tool::ToolCategory;

/// Supported operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    /// User interaction only
    Basic,
    /// Interaction plus filesystem access
    CodeBasic,
    /// Interaction, filesystem, and code execution
    Code,
    /// Interaction and code execution
    Interpreter,
    /// Retrieval tools only
    Search,
    /// Retrieval with interaction and filesystem
    SearchFull,
    /// Everything available
    Full,
}

impl AgentMode {
    pub const ALL: [AgentMode; 7] = [
        Self::Basic,
        Self::CodeBasic,
        Self::Code,
        Self::Interpreter,
        Self::Search,
        Self::SearchFull,
        Self::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::CodeBasic => "code-basic",
            Self::Code => "code",
            Self::Interpreter => "interpreter",
            Self::Search => "search",
            Self::SearchFull => "search-full",
            Self::Full => "full",
        }
    }

    fn supported() -> String {
        Self::ALL
            .iter()
            .map(AgentMode::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownMode {
                mode: s.to_string(),
                supported: Self::supported(),
            })
    }
}

/// Default sampling parameters for a mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// The resolved configuration for a mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub mode: AgentMode,
    /// Tool categories the mode enables, in catalog order
    pub categories: Vec<ToolCategory>,
    pub parameters: ModelParameters,
}

impl ModeProfile {
    pub fn allows(&self, category: ToolCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Resolve a mode name to its tool categories and model defaults.
///
/// `has_vision` enables the vision category in `full` mode; other modes
/// never include it.
pub fn resolve_mode(mode: &str, has_vision: bool) -> Result<ModeProfile, ConfigError> {
    use ToolCategory::*;

    let mode: AgentMode = mode.parse()?;
    let (categories, temperature) = match mode {
        AgentMode::Basic => (vec![Interaction], 0.7),
        AgentMode::CodeBasic => (vec![Interaction, Filesystem], 0.2),
        AgentMode::Code => (vec![Interaction, Filesystem, Execution], 0.2),
        AgentMode::Interpreter => (vec![Interaction, Execution], 0.2),
        AgentMode::Search => (vec![Retrieval], 0.3),
        AgentMode::SearchFull => (vec![Interaction, Filesystem, Retrieval], 0.3),
        AgentMode::Full => {
            let categories = ToolCategory::ALL
                .into_iter()
                .filter(|c| has_vision || *c != Vision)
                .collect();
            (categories, 0.5)
        }
    };

    Ok(ModeProfile {
        mode,
        categories,
        parameters: ModelParameters {
            temperature,
            max_tokens: None,
        },
    })
}
