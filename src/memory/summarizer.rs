//! Model-invocation seam for observations and reflections
//!
//! The controller never talks to a provider directly. It builds a
//! [`SummaryRequest`] and hands it to a [`Summarizer`], which may be backed by
//! any model (usually a cheaper one than the main agent's).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::config::ModelConfig;
use super::progress::OperationKind;

/// System prompt for the observation stage
pub const OBSERVER_SYSTEM_PROMPT: &str = r#"You are the memory observer for a coding agent. You will receive the most recent, not yet observed part of a conversation between a user, the agent and its tools.

Write a dense observation log of what happened:
- The user's goals, requests and stated preferences
- Decisions made and the reasons given
- Files, commands and tool results that matter for future work
- Open questions and unfinished tasks

Use short dated bullet points. Drop greetings, repetition and raw tool output that has no lasting value.

Respond with ONLY the observation log."#;

/// System prompt for the reflection stage
pub const REFLECTOR_SYSTEM_PROMPT: &str = r#"You are the memory reflector for a coding agent. You will receive the agent's accumulated observation log.

Condense it into a shorter log that preserves everything still relevant:
- Current goals and the plan being followed
- Durable facts about the user, the codebase and the environment
- Outstanding work and unresolved problems

Merge duplicates, drop superseded details and keep the bullet format.

Respond with ONLY the condensed log."#;

/// One compression call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Thread the request belongs to
    pub thread_id: String,
    /// Which stage is running
    pub operation: OperationKind,
    /// Model settings for this stage
    pub model: ModelConfig,
    /// Stage instructions
    pub system_prompt: String,
    /// Text to compress
    pub input: String,
}

/// Result of a compression call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Compressed text
    pub text: String,
    /// Output size reported by the model, when available
    pub output_tokens: Option<u64>,
}

impl Summary {
    /// Summary with a model-reported token count
    pub fn new(text: impl Into<String>, output_tokens: u64) -> Self {
        Self {
            text: text.into(),
            output_tokens: Some(output_tokens),
        }
    }

    /// Summary without usage data
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            output_tokens: None,
        }
    }
}

/// Performs the actual compression (an LLM call)
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: SummaryRequest) -> Result<Summary>;
}

/// Counts tokens when the summarizer reports no usage
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;

    /// Whether counts match the model's tokenizer
    fn is_exact(&self) -> bool {
        false
    }
}

/// Characters-per-token heuristic.
///
/// An approximation only. Counts produced by it are flagged as estimated in
/// progress events.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: u64,
}

impl CharRatioCounter {
    pub fn new(chars_per_token: u64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(self.chars_per_token)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted summarizer used by controller tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Scripted reply for one call
    pub(crate) enum Reply {
        Ok(Summary),
        Err(&'static str),
        /// Never answers (exercises the timeout)
        Hang,
    }

    /// Pops one scripted reply per call from the queue of the requested
    /// operation. When gated, each call waits for
    /// [`ScriptedSummarizer::release`] before answering.
    pub(crate) struct ScriptedSummarizer {
        observations: Mutex<VecDeque<Reply>>,
        reflections: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<SummaryRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSummarizer {
        pub(crate) fn new(observations: Vec<Reply>) -> Self {
            Self {
                observations: Mutex::new(observations.into()),
                reflections: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        pub(crate) fn gated(observations: Vec<Reply>) -> Self {
            Self {
                gate: Some(Arc::new(Notify::new())),
                ..Self::new(observations)
            }
        }

        pub(crate) fn with_reflections(self, reflections: Vec<Reply>) -> Self {
            Self {
                reflections: Mutex::new(reflections.into()),
                ..self
            }
        }

        /// Let one waiting call answer
        pub(crate) fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_one();
            }
        }

        pub(crate) fn requests(&self) -> Vec<SummaryRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, request: SummaryRequest) -> Result<Summary> {
            let operation = request.operation;
            self.requests.lock().unwrap().push(request);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = match operation {
                OperationKind::Observation => self.observations.lock().unwrap().pop_front(),
                OperationKind::Reflection => self.reflections.lock().unwrap().pop_front(),
            };
            match reply {
                Some(Reply::Ok(summary)) => Ok(summary),
                Some(Reply::Err(msg)) => Err(anyhow::anyhow!(msg)),
                Some(Reply::Hang) => std::future::pending().await,
                None => anyhow::bail!("no scripted reply"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_ratio_rounds_up() {
        let counter = CharRatioCounter::default();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert!(!counter.is_exact());
    }

    #[test]
    fn test_char_ratio_counts_chars_not_bytes() {
        let counter = CharRatioCounter::new(2);
        assert_eq!(counter.count("éé"), 1);
    }

    #[test]
    fn test_zero_ratio_is_clamped() {
        let counter = CharRatioCounter::new(0);
        assert_eq!(counter.count("abc"), 3);
    }
}
