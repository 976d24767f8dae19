//! Memory threshold controller
//!
//! Tracks token counters per conversation thread and decides when to
//! compress history in the background:
//!
//! - **Observation** folds unobserved messages into a dense note once
//!   `pending_tokens` reaches the observation threshold
//! - **Reflection** condenses the observation log once `observation_tokens`
//!   reaches the reflection threshold
//!
//! Compression happens in two phases. *Buffering* runs the summarizer on a
//! background task; *activation* commits a completed buffer into the thread
//! and only happens at a turn boundary. At most one buffer per operation
//! type is in flight per thread.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_gate::memory::{MemoryConfig, MemoryController, MessageRecord};
//!
//! let mut memory = MemoryController::new(MemoryConfig::default(), summarizer)?;
//! memory.open_thread("thread-1");
//!
//! // After every message
//! memory.record_message("thread-1", MessageRecord::user(text, tokens))?;
//!
//! // Between turns
//! let report = memory.on_turn_boundary("thread-1")?;
//! ```

mod config;
mod controller;
mod events;
mod progress;
mod summarizer;
mod thread;

pub use config::{MemoryConfig, ModelConfig};
pub use controller::{Activation, Completion, MemoryController, TurnReport};
pub use events::{
    create_event_channel, EventReceiver, EventSender, ProgressEvent, EVENT_CHANNEL_SIZE,
};
pub use progress::{
    BufferStatus, BufferedOperation, BufferedState, OperationKind, ProgressSnapshot,
    ProgressState, ProgressStatus,
};
pub use summarizer::{
    CharRatioCounter, Summarizer, Summary, SummaryRequest, TokenCounter, OBSERVER_SYSTEM_PROMPT,
    REFLECTOR_SYSTEM_PROMPT,
};
pub use thread::{MessageRecord, ObservationEntry, ThreadSnapshot};
