//! Built-in computer-use tools for Operative.
//!
//! Tools give the agent its hands on the machine: a persistent bash
//! session, a file editor and the display. They come in versioned groups;
//! each version fixes the provider tool types and the beta flag.

pub mod bash;
pub mod computer;
pub mod edit;
pub mod process;

use operative_config::DisplayConfig;
use operative_core::tool::{Tool, ToolCollection, ToolGroup, ToolSource, ToolVersion};

pub use bash::{BashTool, SharedSession};
pub use computer::{ComputerTool, Screen};
pub use edit::{EditHistory, EditTool};

/// The built-in tool groups.
///
/// Every group built from the same `BuiltinTools` shares one bash session
/// and one edit history, so state survives across loop runs.
#[derive(Clone)]
pub struct BuiltinTools {
    screen: Screen,
    bash: SharedSession,
    history: EditHistory,
}

impl BuiltinTools {
    pub fn new(display: &DisplayConfig) -> Self {
        Self {
            screen: Screen {
                width: display.width,
                height: display.height,
                display_num: display.display_num,
            },
            bash: SharedSession::new(),
            history: EditHistory::new(),
        }
    }
}

impl ToolSource for BuiltinTools {
    fn group(&self, version: ToolVersion) -> ToolGroup {
        let (bash_type, editor_type) = match version {
            ToolVersion::ComputerUse20241022 => ("bash_20241022", "text_editor_20241022"),
            ToolVersion::ComputerUse20250124 => ("bash_20250124", "text_editor_20250124"),
        };
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ComputerTool::new(version, self.screen)),
            Box::new(EditTool::new(editor_type, self.history.clone())),
            Box::new(BashTool::new(bash_type, self.bash.clone())),
        ];
        ToolGroup {
            version,
            tools: ToolCollection::new(tools),
            beta_flag: Some(version.beta_flag().to_string()),
        }
    }
}
