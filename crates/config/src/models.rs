//! Per-model defaults.

use operative_core::tool::ToolVersion;
use serde::{Deserialize, Serialize};

/// Defaults that depend on the model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub tool_version: ToolVersion,
    pub max_output_tokens: u32,
    pub default_output_tokens: u32,
    pub has_thinking: bool,
}

/// Claude 3.5 Sonnet (new) and anything unrecognised.
pub const SONNET_3_5_NEW: ModelProfile = ModelProfile {
    tool_version: ToolVersion::ComputerUse20241022,
    max_output_tokens: 8192,
    default_output_tokens: 4096,
    has_thinking: false,
};

pub const SONNET_3_7: ModelProfile = ModelProfile {
    tool_version: ToolVersion::ComputerUse20250124,
    max_output_tokens: 128_000,
    default_output_tokens: 128_000,
    has_thinking: true,
};

impl ModelProfile {
    /// Pick the profile for a model id across provider naming schemes.
    pub fn for_model(model: &str) -> Self {
        if model.contains("3-7") {
            SONNET_3_7
        } else {
            SONNET_3_5_NEW
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_profile_by_model_family() {
        assert_eq!(
            ModelProfile::for_model("claude-3-7-sonnet-20250219"),
            SONNET_3_7
        );
        assert_eq!(
            ModelProfile::for_model("us.anthropic.claude-3-7-sonnet-20250219-v1:0"),
            SONNET_3_7
        );
        assert_eq!(
            ModelProfile::for_model("claude-3-5-sonnet-v2@20241022"),
            SONNET_3_5_NEW
        );
    }
}
