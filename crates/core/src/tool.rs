//! Tool trait: the abstraction over computer-use capabilities.
//!
//! Tools are what give the agent the ability to act on the machine:
//! run shell commands, look at and drive the display, edit files.
//! They are grouped by [`ToolVersion`]; each version fixes the set of tools
//! sent to the model and the beta flag that enables them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ToolError;

/// The outcome of one tool run.
///
/// `error` and the other fields are not mutually exclusive: a failed
/// command may still report partial output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Base64-encoded PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,

    /// Note for the model about the tool itself (e.g. "tool was restarted").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ToolResult {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn image(base64_image: impl Into<String>) -> Self {
        Self {
            base64_image: Some(base64_image.into()),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_image(mut self, base64_image: impl Into<String>) -> Self {
        self.base64_image = Some(base64_image.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_none()
            && self.error.is_none()
            && self.base64_image.is_none()
            && self.system.is_none()
    }
}

/// The core Tool trait.
///
/// `run` reports expected failures (bad arguments, non-zero exit, missing
/// file) as `Ok(ToolResult::error(..))`. An `Err` means the tool itself
/// malfunctioned; the dispatcher turns it into an error result as well.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The name the model calls the tool by (e.g. "bash", "computer").
    fn name(&self) -> &str;

    /// The provider-side tool type (e.g. "bash_20250124").
    fn api_type(&self) -> &str;

    /// The tool definition sent to the provider.
    fn to_params(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.api_type(),
            "name": self.name(),
        })
    }

    /// Execute the tool with the given input.
    async fn run(&self, input: serde_json::Value) -> Result<ToolResult, ToolError>;
}

/// An ordered set of tools, addressable by name.
pub struct ToolCollection {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolCollection {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&i| self.tools[i].as_ref())
    }

    /// Tool definitions in registration order.
    pub fn to_params(&self) -> Vec<serde_json::Value> {
        self.tools.iter().map(|t| t.to_params()).collect()
    }

    /// Run a tool by name. Unknown names yield an error result.
    pub async fn run(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        match self.get(name) {
            Some(tool) => tool.run(input).await,
            None => Ok(ToolResult::error(format!("Tool {name} is invalid"))),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Selector for a versioned set of computer-use tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolVersion {
    #[serde(rename = "computer_use_20241022")]
    ComputerUse20241022,
    #[serde(rename = "computer_use_20250124")]
    ComputerUse20250124,
}

impl ToolVersion {
    pub const ALL: [ToolVersion; 2] = [Self::ComputerUse20241022, Self::ComputerUse20250124];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ComputerUse20241022 => "computer_use_20241022",
            Self::ComputerUse20250124 => "computer_use_20250124",
        }
    }

    /// The beta flag that enables this tool group on the provider.
    pub fn beta_flag(self) -> &'static str {
        match self {
            Self::ComputerUse20241022 => "computer-use-2024-10-22",
            Self::ComputerUse20250124 => "computer-use-2025-01-24",
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown tool version '{s}'"))
    }
}

/// The tools for one version plus the beta flag they need.
pub struct ToolGroup {
    pub version: ToolVersion,
    pub tools: ToolCollection,
    pub beta_flag: Option<String>,
}

/// Builds the tool group for a version selector.
pub trait ToolSource: Send + Sync {
    fn group(&self, version: ToolVersion) -> ToolGroup;
}
