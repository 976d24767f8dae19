//! Per-session permission gate
//!
//! Owns the session's rules and grants, and mediates the human-approval
//! round trip when a tool call resolves to `ask`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::category::{get_tool_category, ToolCategory};
use super::policy::{resolve_approval, ApprovalDecision, PermissionRules, SessionGrants};
use crate::core::{GateError, GateResult};

/// A pending tool call presented to a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Name of the tool
    pub tool_name: String,
    /// Category the tool resolved to (`None` for always-allow tools)
    pub category: Option<ToolCategory>,
    /// Human-readable description of the action
    pub action_description: String,
    /// The actual input/command
    pub input: String,
}

impl ApprovalRequest {
    /// Create a new approval request
    pub fn new(
        tool_name: impl Into<String>,
        action_description: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            category: get_tool_category(&tool_name),
            tool_name,
            action_description: action_description.into(),
            input: input.into(),
        }
    }
}

/// The human's answer to an [`ApprovalRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    /// Run this call once
    Approve,
    /// Reject this call
    Deny,
    /// Run, and stop asking about this tool for the session
    AllowToolForSession,
    /// Run, and stop asking about the tool's whole category for the session
    AllowCategoryForSession,
}

/// Presents pending tool calls to a human
#[async_trait]
pub trait Approver: Send + Sync {
    /// Suspend until the human answers
    async fn request_approval(&self, request: ApprovalRequest) -> UserDecision;
}

/// Permission state for one session
#[derive(Debug, Clone)]
pub struct PermissionGate {
    rules: PermissionRules,
    grants: SessionGrants,
    /// Whether a human can be prompted (false for background agents)
    interactive: bool,
}

impl PermissionGate {
    /// Create a gate with the given rules and no grants
    pub fn new(rules: PermissionRules) -> Self {
        Self {
            rules,
            grants: SessionGrants::new(),
            interactive: true,
        }
    }

    /// Set interactive mode
    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Check if running in interactive mode
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Resolve a tool call against rules and grants
    pub fn check(&self, tool_name: &str) -> ApprovalDecision {
        let decision = resolve_approval(tool_name, &self.rules, &self.grants);
        tracing::debug!(tool = tool_name, %decision, "Resolved tool permission");
        decision
    }

    /// Apply the human's answer, recording session grants when asked to.
    ///
    /// Returns whether the call should run.
    pub fn apply_user_decision(&mut self, tool_name: &str, decision: UserDecision) -> bool {
        match decision {
            UserDecision::Approve => true,
            UserDecision::Deny => false,
            UserDecision::AllowToolForSession => {
                self.grants.allow_tool(tool_name);
                true
            }
            UserDecision::AllowCategoryForSession => {
                match get_tool_category(tool_name) {
                    Some(category) => self.grants.allow_category(category),
                    None => tracing::debug!(
                        "{} is always allowed; no category grant recorded",
                        tool_name
                    ),
                }
                true
            }
        }
    }

    /// Gate a tool call before execution.
    ///
    /// `has_handler` reports whether the agent loop has an executor for the
    /// tool; a missing handler is reported separately from a policy denial.
    pub async fn authorize(
        &mut self,
        request: ApprovalRequest,
        has_handler: bool,
        approver: &dyn Approver,
    ) -> GateResult<()> {
        let tool_name = request.tool_name.clone();

        if !has_handler {
            return Err(GateError::NoHandler(tool_name));
        }

        match self.check(&tool_name) {
            ApprovalDecision::Allow => Ok(()),
            ApprovalDecision::Deny => Err(self.policy_denial(tool_name)),
            ApprovalDecision::Ask => {
                if !self.interactive {
                    tracing::warn!("{} needs approval but gate is non-interactive", tool_name);
                    return Err(GateError::ApprovalUnavailable(tool_name));
                }

                let decision = approver.request_approval(request).await;
                tracing::info!(tool = %tool_name, ?decision, "User answered approval request");

                if self.apply_user_decision(&tool_name, decision) {
                    Ok(())
                } else {
                    Err(GateError::UserDenied(tool_name))
                }
            }
        }
    }

    fn policy_denial(&self, tool_name: String) -> GateError {
        if self.rules.tools.contains_key(&tool_name) {
            return GateError::ToolDenied(tool_name);
        }
        match get_tool_category(&tool_name) {
            Some(category) => GateError::PolicyDenied {
                tool: tool_name,
                category,
            },
            None => GateError::ToolDenied(tool_name),
        }
    }

    /// Current rules
    pub fn rules(&self) -> &PermissionRules {
        &self.rules
    }

    /// Replace the rules (e.g. after reloading config); grants survive
    pub fn set_rules(&mut self, rules: PermissionRules) {
        self.rules = rules;
    }

    /// Current session grants
    pub fn grants(&self) -> &SessionGrants {
        &self.grants
    }

    /// Mutable access to session grants
    pub fn grants_mut(&mut self) -> &mut SessionGrants {
        &mut self.grants
    }

    /// Start a new session: grants are dropped, rules are kept
    pub fn reset_session(&mut self) {
        tracing::info!("Resetting session grants");
        self.grants.reset();
    }
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new(PermissionRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionPolicy;
    use std::sync::Mutex;

    /// Answers every request with a fixed decision and records what it saw
    struct ScriptedApprover {
        decision: UserDecision,
        seen: Mutex<Vec<ApprovalRequest>>,
    }

    impl ScriptedApprover {
        fn new(decision: UserDecision) -> Self {
            Self {
                decision,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Approver for ScriptedApprover {
        async fn request_approval(&self, request: ApprovalRequest) -> UserDecision {
            self.seen.lock().unwrap().push(request);
            self.decision
        }
    }

    fn request(tool: &str) -> ApprovalRequest {
        ApprovalRequest::new(tool, format!("run {}", tool), "{}")
    }

    #[test]
    fn test_request_carries_category() {
        assert_eq!(
            request("execute_command").category,
            Some(ToolCategory::Execute)
        );
        assert_eq!(request("ask_user").category, None);
    }

    #[tokio::test]
    async fn test_allowed_tool_skips_approver() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::Deny);

        gate.authorize(request("view"), true, &approver).await.unwrap();
        assert_eq!(approver.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_is_not_policy() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::Approve);

        let err = gate
            .authorize(request("view"), false, &approver)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NoHandler(ref t) if t == "view"));
        assert!(!err.is_policy_denial());
    }

    #[tokio::test]
    async fn test_policy_denial() {
        let rules = PermissionRules::new()
            .with_category(ToolCategory::Edit, PermissionPolicy::Deny)
            .with_tool("execute_command", PermissionPolicy::Deny);
        let mut gate = PermissionGate::new(rules);
        let approver = ScriptedApprover::new(UserDecision::Approve);

        let err = gate
            .authorize(request("write_file"), true, &approver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::PolicyDenied {
                category: ToolCategory::Edit,
                ..
            }
        ));

        let err = gate
            .authorize(request("execute_command"), true, &approver)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ToolDenied(_)));
        assert_eq!(approver.calls(), 0);
    }

    #[tokio::test]
    async fn test_ask_then_user_denies() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::Deny);

        let err = gate
            .authorize(request("execute_command"), true, &approver)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::UserDenied(_)));
        assert_eq!(approver.calls(), 1);
        assert!(gate.grants().is_empty());
    }

    #[tokio::test]
    async fn test_one_time_approve_asks_again() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::Approve);

        gate.authorize(request("edit_file"), true, &approver).await.unwrap();
        gate.authorize(request("edit_file"), true, &approver).await.unwrap();
        assert_eq!(approver.calls(), 2);
    }

    #[tokio::test]
    async fn test_allow_category_for_session() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::AllowCategoryForSession);

        assert_eq!(gate.check("execute_command"), ApprovalDecision::Ask);
        gate.authorize(request("execute_command"), true, &approver)
            .await
            .unwrap();
        assert_eq!(gate.check("execute_command"), ApprovalDecision::Allow);
        assert_eq!(gate.check("run_process"), ApprovalDecision::Allow);

        gate.authorize(request("run_process"), true, &approver)
            .await
            .unwrap();
        assert_eq!(approver.calls(), 1);
    }

    #[tokio::test]
    async fn test_allow_tool_for_session_then_reset() {
        let mut gate = PermissionGate::default();
        let approver = ScriptedApprover::new(UserDecision::AllowToolForSession);

        gate.authorize(request("write_file"), true, &approver)
            .await
            .unwrap();
        assert_eq!(gate.check("write_file"), ApprovalDecision::Allow);
        assert_eq!(gate.check("edit_file"), ApprovalDecision::Ask);

        gate.reset_session();
        assert_eq!(gate.check("write_file"), ApprovalDecision::Ask);
    }

    #[tokio::test]
    async fn test_non_interactive_cannot_ask() {
        let mut gate = PermissionGate::default();
        gate.set_interactive(false);
        let approver = ScriptedApprover::new(UserDecision::Approve);

        let err = gate
            .authorize(request("github__create_issue"), true, &approver)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ApprovalUnavailable(_)));
        assert_eq!(approver.calls(), 0);
    }

    #[test]
    fn test_set_rules_keeps_grants() {
        let mut gate = PermissionGate::default();
        gate.apply_user_decision("write_file", UserDecision::AllowToolForSession);

        gate.set_rules(PermissionRules::new().with_category(ToolCategory::Edit, PermissionPolicy::Deny));
        assert_eq!(gate.check("write_file"), ApprovalDecision::Allow);
        assert_eq!(gate.check("edit_file"), ApprovalDecision::Deny);
    }
}
