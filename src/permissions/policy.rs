//! Permission rules, session grants and approval resolution
//!
//! Resolution is a pure function of the tool name, the configured rules and
//! the session's grants. First match wins:
//!
//! 1. Always-allow tool
//! 2. Tool-level override in `rules.tools`
//! 3. Session grant for the tool or its category
//! 4. Category policy in `rules.categories`
//! 5. Built-in default for the category

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::category::{get_tool_category, ToolCategory};

/// Configured policy for a tool or category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    Allow,
    Ask,
    Deny,
}

impl PermissionPolicy {
    /// Built-in policy used when a category has no configured entry
    pub fn default_for(category: ToolCategory) -> Self {
        match category {
            ToolCategory::Read => PermissionPolicy::Allow,
            ToolCategory::Edit | ToolCategory::Execute | ToolCategory::Mcp => {
                PermissionPolicy::Ask
            }
        }
    }
}

/// Outcome of resolving a tool call against the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Run the tool
    Allow,
    /// Suspend until a human decides
    Ask,
    /// Reject without asking
    Deny,
}

impl From<PermissionPolicy> for ApprovalDecision {
    fn from(policy: PermissionPolicy) -> Self {
        match policy {
            PermissionPolicy::Allow => ApprovalDecision::Allow,
            PermissionPolicy::Ask => ApprovalDecision::Ask,
            PermissionPolicy::Deny => ApprovalDecision::Deny,
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalDecision::Allow => write!(f, "allow"),
            ApprovalDecision::Ask => write!(f, "ask"),
            ApprovalDecision::Deny => write!(f, "deny"),
        }
    }
}

/// Per-session permission configuration
///
/// Both maps are partial. Tool-level entries always win over category entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRules {
    /// Category-level policy
    #[serde(default)]
    pub categories: BTreeMap<ToolCategory, PermissionPolicy>,

    /// Per-tool overrides
    #[serde(default)]
    pub tools: BTreeMap<String, PermissionPolicy>,
}

impl PermissionRules {
    /// Create empty rules (all categories use built-in defaults)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy for a whole category
    pub fn with_category(mut self, category: ToolCategory, policy: PermissionPolicy) -> Self {
        self.categories.insert(category, policy);
        self
    }

    /// Override the policy for a single tool
    pub fn with_tool(mut self, tool_name: impl Into<String>, policy: PermissionPolicy) -> Self {
        self.tools.insert(tool_name.into(), policy);
        self
    }

    /// Effective category policy (configured or built-in)
    pub fn category_policy(&self, category: ToolCategory) -> PermissionPolicy {
        self.categories
            .get(&category)
            .copied()
            .unwrap_or_else(|| PermissionPolicy::default_for(category))
    }
}

/// "Allow for this session" grants
///
/// Grows only through explicit user action and is cleared when the session
/// ends. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionGrants {
    granted_categories: BTreeSet<ToolCategory>,
    granted_tools: BTreeSet<String>,
}

impl SessionGrants {
    /// Create an empty grant set
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a whole category for the rest of the session
    pub fn allow_category(&mut self, category: ToolCategory) {
        if self.granted_categories.insert(category) {
            tracing::info!("Granted {} tools for this session", category);
        }
    }

    /// Grant a single tool for the rest of the session
    pub fn allow_tool(&mut self, tool_name: impl Into<String>) {
        let tool_name = tool_name.into();
        if !self.granted_tools.contains(&tool_name) {
            tracing::info!("Granted tool {} for this session", tool_name);
            self.granted_tools.insert(tool_name);
        }
    }

    /// True if either the tool or its category was granted
    pub fn is_granted(&self, tool_name: &str, category: ToolCategory) -> bool {
        self.granted_tools.contains(tool_name) || self.granted_categories.contains(&category)
    }

    /// Granted categories
    pub fn categories(&self) -> impl Iterator<Item = ToolCategory> + '_ {
        self.granted_categories.iter().copied()
    }

    /// Granted tool names
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.granted_tools.iter().map(String::as_str)
    }

    /// Whether nothing has been granted
    pub fn is_empty(&self) -> bool {
        self.granted_categories.is_empty() && self.granted_tools.is_empty()
    }

    /// Drop every grant (new session)
    pub fn reset(&mut self) {
        self.granted_categories.clear();
        self.granted_tools.clear();
    }
}

/// Resolve whether a tool call may run.
///
/// Never fails: unknown tools resolve through the `mcp` category.
pub fn resolve_approval(
    tool_name: &str,
    rules: &PermissionRules,
    grants: &SessionGrants,
) -> ApprovalDecision {
    let Some(category) = get_tool_category(tool_name) else {
        return ApprovalDecision::Allow;
    };

    if let Some(policy) = rules.tools.get(tool_name) {
        return (*policy).into();
    }

    if grants.is_granted(tool_name, category) {
        return ApprovalDecision::Allow;
    }

    rules.category_policy(category).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::ALWAYS_ALLOW_TOOLS;

    fn locked_down() -> PermissionRules {
        let mut rules = PermissionRules::new();
        for cat in ToolCategory::ALL {
            rules = rules.with_category(cat, PermissionPolicy::Deny);
        }
        rules
    }

    #[test]
    fn test_always_allow_ignores_rules_and_grants() {
        let mut rules = locked_down();
        for tool in ALWAYS_ALLOW_TOOLS {
            rules = rules.with_tool(tool, PermissionPolicy::Deny);
        }
        let grants = SessionGrants::new();

        for tool in ALWAYS_ALLOW_TOOLS {
            assert_eq!(
                resolve_approval(tool, &rules, &grants),
                ApprovalDecision::Allow,
                "{}",
                tool
            );
        }
    }

    #[test]
    fn test_tool_override_beats_category_and_grants() {
        let rules = PermissionRules::new()
            .with_category(ToolCategory::Read, PermissionPolicy::Allow)
            .with_tool("view", PermissionPolicy::Deny)
            .with_tool("execute_command", PermissionPolicy::Ask);

        let mut grants = SessionGrants::new();
        grants.allow_category(ToolCategory::Read);
        grants.allow_tool("execute_command");

        assert_eq!(resolve_approval("view", &rules, &grants), ApprovalDecision::Deny);
        assert_eq!(
            resolve_approval("execute_command", &rules, &grants),
            ApprovalDecision::Ask
        );
    }

    #[test]
    fn test_category_deny_applies_without_override() {
        let rules = PermissionRules::new().with_category(ToolCategory::Edit, PermissionPolicy::Deny);
        let grants = SessionGrants::new();
        assert_eq!(
            resolve_approval("write_file", &rules, &grants),
            ApprovalDecision::Deny
        );

        let rules = rules.with_tool("write_file", PermissionPolicy::Allow);
        assert_eq!(
            resolve_approval("write_file", &rules, &grants),
            ApprovalDecision::Allow
        );
    }

    #[test]
    fn test_session_grant_beats_category_policy() {
        let rules = PermissionRules::new().with_category(ToolCategory::Edit, PermissionPolicy::Deny);
        let mut grants = SessionGrants::new();
        grants.allow_tool("write_file");

        assert_eq!(
            resolve_approval("write_file", &rules, &grants),
            ApprovalDecision::Allow
        );
        // Grant is tool-scoped; the rest of the category stays denied
        assert_eq!(
            resolve_approval("edit_file", &rules, &grants),
            ApprovalDecision::Deny
        );
    }

    #[test]
    fn test_builtin_defaults() {
        let rules = PermissionRules::new();
        let grants = SessionGrants::new();

        assert_eq!(resolve_approval("view", &rules, &grants), ApprovalDecision::Allow);
        assert_eq!(resolve_approval("edit_file", &rules, &grants), ApprovalDecision::Ask);
        assert_eq!(
            resolve_approval("execute_command", &rules, &grants),
            ApprovalDecision::Ask
        );
        assert_eq!(
            resolve_approval("some_server__tool", &rules, &grants),
            ApprovalDecision::Ask
        );
    }

    #[test]
    fn test_execute_ask_then_category_grant() {
        let rules = PermissionRules::new();
        let mut grants = SessionGrants::new();

        assert_eq!(
            resolve_approval("execute_command", &rules, &grants),
            ApprovalDecision::Ask
        );

        grants.allow_category(ToolCategory::Execute);
        assert_eq!(
            resolve_approval("execute_command", &rules, &grants),
            ApprovalDecision::Allow
        );
    }

    #[test]
    fn test_grants_are_idempotent() {
        let mut once = SessionGrants::new();
        once.allow_tool("write_file");

        let mut twice = SessionGrants::new();
        twice.allow_tool("write_file");
        twice.allow_tool("write_file");

        assert_eq!(once, twice);
        assert!(twice.is_granted("write_file", ToolCategory::Edit));
        assert!(twice.is_granted("write_file", ToolCategory::Edit));
        assert_eq!(twice.tools().count(), 1);
    }

    #[test]
    fn test_grants_reset() {
        let mut grants = SessionGrants::new();
        grants.allow_tool("write_file");
        grants.allow_category(ToolCategory::Execute);
        assert!(!grants.is_empty());

        grants.reset();
        assert!(grants.is_empty());
        assert!(!grants.is_granted("write_file", ToolCategory::Edit));
        assert!(!grants.is_granted("execute_command", ToolCategory::Execute));
    }

    #[test]
    fn test_deny_is_not_cached() {
        let mut rules = PermissionRules::new().with_tool("write_file", PermissionPolicy::Deny);
        let grants = SessionGrants::new();
        assert_eq!(
            resolve_approval("write_file", &rules, &grants),
            ApprovalDecision::Deny
        );

        rules.tools.remove("write_file");
        assert_eq!(
            resolve_approval("write_file", &rules, &grants),
            ApprovalDecision::Ask
        );
    }

    #[test]
    fn test_rules_deserialize_partial() {
        let rules: PermissionRules =
            serde_json::from_str(r#"{"categories":{"edit":"deny"}}"#).unwrap();
        assert_eq!(rules.category_policy(ToolCategory::Edit), PermissionPolicy::Deny);
        assert_eq!(rules.category_policy(ToolCategory::Read), PermissionPolicy::Allow);
        assert!(rules.tools.is_empty());
    }
}
