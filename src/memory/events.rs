//! Progress events for display collaborators
//!
//! The controller pushes events onto a broadcast channel; any number of
//! subscribers (status bar, telemetry, logs) can listen. Events sent while
//! nobody is subscribed are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::progress::OperationKind;

/// Default buffer size for the event broadcast channel
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Sender half of the event channel (owned by the controller)
pub type EventSender = broadcast::Sender<ProgressEvent>;

/// Receiver half of the event channel (used by subscribers)
pub type EventReceiver = broadcast::Receiver<ProgressEvent>;

/// Something happened in a thread's memory pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Background compression started
    BufferStarted {
        thread_id: String,
        operation: OperationKind,
        cycle_id: String,
        /// Input size handed to the summarizer
        tokens_to_buffer: u64,
    },

    /// Background compression produced a result (not yet active)
    BufferCompleted {
        thread_id: String,
        operation: OperationKind,
        cycle_id: String,
        tokens_buffered: u64,
        buffered_tokens: u64,
        /// `buffered_tokens` is a heuristic count
        estimated: bool,
        duration_ms: u64,
    },

    /// Background compression failed; the thread keeps its uncompressed context
    BufferFailed {
        thread_id: String,
        operation: OperationKind,
        cycle_id: String,
        error: String,
        attempted_tokens: u64,
        duration_ms: u64,
    },

    /// A completed buffer was committed into the thread
    Activated {
        thread_id: String,
        operation: OperationKind,
        cycle_id: String,
        /// Tokens that left the live context
        tokens_removed: u64,
        observation_tokens: u64,
    },

    /// A result arrived for a closed or reset thread and was dropped
    Discarded {
        thread_id: String,
        operation: OperationKind,
        cycle_id: String,
    },
}

impl ProgressEvent {
    /// Thread the event belongs to
    pub fn thread_id(&self) -> &str {
        match self {
            ProgressEvent::BufferStarted { thread_id, .. }
            | ProgressEvent::BufferCompleted { thread_id, .. }
            | ProgressEvent::BufferFailed { thread_id, .. }
            | ProgressEvent::Activated { thread_id, .. }
            | ProgressEvent::Discarded { thread_id, .. } => thread_id,
        }
    }

    /// Check if this event ends a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::BufferFailed { .. }
                | ProgressEvent::Activated { .. }
                | ProgressEvent::Discarded { .. }
        )
    }
}

/// Create a new event broadcast channel
///
/// Returns the sender. Receivers are created by calling `sender.subscribe()`.
pub fn create_event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    tx
}

/// Send an event, ignoring the "no receivers" case
pub(crate) fn emit(tx: &EventSender, event: ProgressEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("Progress event dropped: no subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(thread: &str) -> ProgressEvent {
        ProgressEvent::BufferStarted {
            thread_id: thread.into(),
            operation: OperationKind::Observation,
            cycle_id: "c1".into(),
            tokens_to_buffer: 10,
        }
    }

    #[tokio::test]
    async fn test_event_broadcast() {
        let tx = create_event_channel();
        let mut rx1 = tx.subscribe();
        let mut rx2 = tx.subscribe();

        emit(&tx, started("t1"));

        assert_eq!(rx1.recv().await.unwrap().thread_id(), "t1");
        assert_eq!(rx2.recv().await.unwrap().thread_id(), "t1");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let tx = create_event_channel();
        // Must not panic
        emit(&tx, started("t1"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(!started("t").is_terminal());
        assert!(ProgressEvent::Discarded {
            thread_id: "t".into(),
            operation: OperationKind::Reflection,
            cycle_id: "c".into(),
        }
        .is_terminal());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(started("t1")).unwrap();
        assert_eq!(json["type"], "buffer_started");
        assert_eq!(json["operation"], "observation");
    }
}
