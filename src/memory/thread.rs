//! Records kept per conversation thread

use serde::{Deserialize, Serialize};

/// A message that has not been folded into an observation yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Speaker (`user`, `assistant`, `tool`, ...)
    pub role: String,
    /// Rendered message text
    pub content: String,
    /// Token count as reported by the agent loop
    pub tokens: u64,
}

impl MessageRecord {
    pub fn new(role: impl Into<String>, content: impl Into<String>, tokens: u64) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tokens,
        }
    }

    pub fn user(content: impl Into<String>, tokens: u64) -> Self {
        Self::new("user", content, tokens)
    }

    pub fn assistant(content: impl Into<String>, tokens: u64) -> Self {
        Self::new("assistant", content, tokens)
    }

    pub fn tool(content: impl Into<String>, tokens: u64) -> Self {
        Self::new("tool", content, tokens)
    }
}

/// One entry of the observation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationEntry {
    pub text: String,
    pub tokens: u64,
    /// `tokens` is a heuristic count, not model-reported usage
    #[serde(default)]
    pub estimated: bool,
}

impl ObservationEntry {
    pub fn new(text: impl Into<String>, tokens: u64) -> Self {
        Self {
            text: text.into(),
            tokens,
            estimated: false,
        }
    }
}

/// Persistable thread contents
///
/// Counters are not stored: they are recomputed from the records on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub threshold: u64,
    pub reflection_threshold: u64,
    #[serde(default)]
    pub pending_messages: Vec<MessageRecord>,
    #[serde(default)]
    pub observations: Vec<ObservationEntry>,
}

impl ThreadSnapshot {
    /// Sum of unobserved message tokens
    pub fn pending_tokens(&self) -> u64 {
        self.pending_messages.iter().map(|m| m.tokens).sum()
    }

    /// Sum of observation log tokens
    pub fn observation_tokens(&self) -> u64 {
        self.observations.iter().map(|o| o.tokens).sum()
    }
}

/// Render messages as summarizer input
pub(crate) fn format_messages<'a>(messages: impl Iterator<Item = &'a MessageRecord>) -> String {
    messages
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
