//! Tool risk categories and the static tool-name classification

use serde::{Deserialize, Serialize};

/// Risk bucket a tool falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Read-only inspection of files, search, fetch
    Read,
    /// Creates, modifies or deletes files
    Edit,
    /// Runs processes on the host
    Execute,
    /// External tools (MCP servers) and anything unrecognized
    Mcp,
}

impl ToolCategory {
    /// All categories, in increasing order of risk
    pub const ALL: [ToolCategory; 4] = [
        ToolCategory::Read,
        ToolCategory::Edit,
        ToolCategory::Execute,
        ToolCategory::Mcp,
    ];

    /// Lowercase name used in config files and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Edit => "edit",
            ToolCategory::Execute => "execute",
            ToolCategory::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ToolCategory::Read),
            "edit" => Ok(ToolCategory::Edit),
            "execute" => Ok(ToolCategory::Execute),
            "mcp" => Ok(ToolCategory::Mcp),
            other => Err(format!("unknown tool category: {}", other)),
        }
    }
}

/// Tools that never need approval and skip categorization entirely
pub const ALWAYS_ALLOW_TOOLS: [&str; 5] = [
    "ask_user",
    "task_write",
    "task_check",
    "submit_plan",
    "request_sandbox_access",
];

/// Whether the tool bypasses every permission check
pub fn is_always_allowed(tool_name: &str) -> bool {
    ALWAYS_ALLOW_TOOLS.contains(&tool_name)
}

/// Classify a tool name.
///
/// Returns `None` for always-allow tools, which signals that no further
/// checks apply. Names that are not built-in tools land in [`ToolCategory::Mcp`].
pub fn get_tool_category(tool_name: &str) -> Option<ToolCategory> {
    if is_always_allowed(tool_name) {
        return None;
    }

    let category = match tool_name {
        "view" | "read_file" | "list_files" | "grep" | "glob" | "find_files"
        | "search_content" | "web_search" | "web_fetch" => ToolCategory::Read,

        "write_file" | "edit_file" | "string_replace" | "multi_edit" | "apply_patch"
        | "delete_file" | "create_directory" => ToolCategory::Edit,

        "execute_command" | "run_process" | "kill_process" => ToolCategory::Execute,

        unknown => unknown_tool_category(unknown),
    };

    Some(category)
}

/// Unknown tools (third-party MCP servers, typos) get the most restrictive bucket
fn unknown_tool_category(tool_name: &str) -> ToolCategory {
    tracing::trace!("Unmapped tool '{}' classified as mcp", tool_name);
    ToolCategory::Mcp
}
