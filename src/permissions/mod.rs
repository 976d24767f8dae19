//! Permission system for tool execution
//!
//! Every tool call is classified into a risk category and resolved to
//! `allow`, `ask` or `deny` with a fixed precedence:
//!
//! - **Always-allow tools** (`ask_user`, `task_write`, ...) skip all checks
//! - **Tool overrides** in [`PermissionRules::tools`] win over everything else
//! - **Session grants** recorded when a user picks "allow for this session"
//! - **Category policy** in [`PermissionRules::categories`]
//! - **Built-in defaults**: `read` allows, `edit`/`execute`/`mcp` ask
//!
//! Unknown tool names are classified as `mcp`, the riskiest bucket.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_gate::permissions::{PermissionGate, PermissionRules, ApprovalRequest};
//!
//! let mut gate = PermissionGate::new(PermissionRules::default());
//!
//! // Inside the agent loop, before running a tool
//! let request = ApprovalRequest::new("execute_command", "Run tests", "cargo test");
//! match gate.authorize(request, registry.contains("execute_command"), &approver).await {
//!     Ok(()) => { /* execute */ }
//!     Err(e) => { /* report rejection to the model */ }
//! }
//! ```

mod category;
mod manager;
mod policy;

pub use category::{get_tool_category, is_always_allowed, ToolCategory, ALWAYS_ALLOW_TOOLS};
pub use manager::{ApprovalRequest, Approver, PermissionGate, UserDecision};
pub use policy::{
    resolve_approval, ApprovalDecision, PermissionPolicy, PermissionRules, SessionGrants,
};
