//! Gate error types

use thiserror::Error;

use crate::permissions::ToolCategory;

/// Errors surfaced by the permission gate, the memory controller and the
/// persistence helpers
#[derive(Error, Debug)]
pub enum GateError {
    /// Tool call rejected by configured policy
    #[error("Tool '{tool}' blocked by policy ({category} tools are denied)")]
    PolicyDenied {
        /// Tool that was rejected
        tool: String,
        /// Category the tool resolved to
        category: ToolCategory,
    },

    /// Tool call rejected by a tool-level override
    #[error("Tool '{0}' blocked by policy")]
    ToolDenied(String),

    /// No executor exists for the requested tool
    #[error("No handler registered for tool '{0}'")]
    NoHandler(String),

    /// The human declined the pending tool call
    #[error("User denied tool '{0}'")]
    UserDenied(String),

    /// Approval was required but nobody can be asked
    #[error("Tool '{0}' requires approval but no interactive approver is available")]
    ApprovalUnavailable(String),

    /// Thread has no memory state (never opened or already closed)
    #[error("Unknown thread: {0}")]
    UnknownThread(String),

    /// Store key that cannot be mapped to a location
    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GateError {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        GateError::InvalidConfig(msg.into())
    }

    /// Whether this rejection came from policy rather than a missing tool
    /// or a human decision
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, GateError::PolicyDenied { .. } | GateError::ToolDenied(_))
    }
}

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;
