//! Per-thread memory progress state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two compression stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Compress raw messages into an observation
    Observation,
    /// Compress accumulated observations
    Reflection,
}

impl OperationKind {
    /// Both stages, in activation order
    pub const ALL: [OperationKind; 2] = [OperationKind::Observation, OperationKind::Reflection];

    /// Thread status while this operation owns it
    pub fn active_status(&self) -> ProgressStatus {
        match self {
            OperationKind::Observation => ProgressStatus::Observing,
            OperationKind::Reflection => ProgressStatus::Reflecting,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Observation => write!(f, "observation"),
            OperationKind::Reflection => write!(f, "reflection"),
        }
    }
}

/// Thread-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Observing,
    Reflecting,
}

/// Status of a background buffering operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStatus {
    #[default]
    Idle,
    Buffering,
    Complete,
    Failed,
}

/// One operation's buffering pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedOperation {
    pub status: BufferStatus,
    /// Cycle this buffer belongs to
    pub cycle_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Input size handed to the summarizer
    pub tokens_buffered: u64,
    /// Output size of the completed buffer
    pub buffered_tokens: u64,
    /// `buffered_tokens` came from a heuristic counter, not the model
    pub buffered_tokens_estimated: bool,
    /// Unobserved message tokens that leave the live context on activation
    pub projected_message_removal: u64,
    /// Last failure, kept until the next attempt starts
    pub error: Option<String>,
}

impl BufferedOperation {
    /// A new cycle of this type may not start
    pub fn blocks_new_cycle(&self) -> bool {
        matches!(self.status, BufferStatus::Buffering | BufferStatus::Complete)
    }
}

/// Buffering state for both operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedState {
    pub observations: BufferedOperation,
    pub reflection: BufferedOperation,
}

impl BufferedState {
    pub fn get(&self, op: OperationKind) -> &BufferedOperation {
        match op {
            OperationKind::Observation => &self.observations,
            OperationKind::Reflection => &self.reflection,
        }
    }

    pub(crate) fn get_mut(&mut self, op: OperationKind) -> &mut BufferedOperation {
        match op {
            OperationKind::Observation => &mut self.observations,
            OperationKind::Reflection => &mut self.reflection,
        }
    }
}

/// Progress of one conversation thread
///
/// Percentages are never stored; they are computed from the counters on
/// every read.
///
/// `status` belongs to the cycle that started while the thread was idle.
/// The other operation type can still be buffering after that cycle ends,
/// so `status` may read `idle` while `buffered.<op>.status` is `buffering`.
/// Read [`BufferedState`] to show in-flight work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressState {
    pub(crate) status: ProgressStatus,
    pub(crate) pending_tokens: u64,
    pub(crate) threshold: u64,
    pub(crate) observation_tokens: u64,
    pub(crate) reflection_threshold: u64,
    pub(crate) buffered: BufferedState,
    pub(crate) cycle_id: Option<String>,
    pub(crate) start_time: Option<DateTime<Utc>>,
}

impl ProgressState {
    /// Fresh state for a new thread
    pub fn new(threshold: u64, reflection_threshold: u64) -> Self {
        Self {
            status: ProgressStatus::Idle,
            pending_tokens: 0,
            threshold,
            observation_tokens: 0,
            reflection_threshold,
            buffered: BufferedState::default(),
            cycle_id: None,
            start_time: None,
        }
    }

    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    /// Tokens accumulated since the last observation
    pub fn pending_tokens(&self) -> u64 {
        self.pending_tokens
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// `pending_tokens / threshold * 100`
    pub fn threshold_percent(&self) -> f64 {
        percent(self.pending_tokens, self.threshold)
    }

    /// Size of the accumulated observation log
    pub fn observation_tokens(&self) -> u64 {
        self.observation_tokens
    }

    pub fn reflection_threshold(&self) -> u64 {
        self.reflection_threshold
    }

    /// `observation_tokens / reflection_threshold * 100`
    pub fn reflection_threshold_percent(&self) -> f64 {
        percent(self.observation_tokens, self.reflection_threshold)
    }

    pub fn buffered(&self) -> &BufferedState {
        &self.buffered
    }

    /// Cycle owning the current status
    pub fn cycle_id(&self) -> Option<&str> {
        self.cycle_id.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Serializable view for display collaborators
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status,
            pending_tokens: self.pending_tokens,
            threshold: self.threshold,
            threshold_percent: self.threshold_percent(),
            observation_tokens: self.observation_tokens,
            reflection_threshold: self.reflection_threshold,
            reflection_threshold_percent: self.reflection_threshold_percent(),
            buffered: self.buffered.clone(),
            cycle_id: self.cycle_id.clone(),
            start_time: self.start_time,
        }
    }

    pub(crate) fn clear_cycle(&mut self) {
        self.status = ProgressStatus::Idle;
        self.cycle_id = None;
        self.start_time = None;
    }

    /// Whether `op` owns the thread status under `cycle_id`
    pub(crate) fn owned_by(&self, op: OperationKind, cycle_id: &str) -> bool {
        self.status == op.active_status() && self.cycle_id.as_deref() == Some(cycle_id)
    }
}

/// Point-in-time copy of [`ProgressState`] with derived percentages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,
    pub pending_tokens: u64,
    pub threshold: u64,
    pub threshold_percent: f64,
    pub observation_tokens: u64,
    pub reflection_threshold: u64,
    pub reflection_threshold_percent: f64,
    pub buffered: BufferedState,
    pub cycle_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

fn percent(value: u64, threshold: u64) -> f64 {
    if threshold == 0 {
        return 0.0;
    }
    value as f64 / threshold as f64 * 100.0
}

/// Whether `value` has reached `activation_percent` of `threshold`
pub(crate) fn crossed(value: u64, threshold: u64, activation_percent: u32) -> bool {
    if threshold == 0 {
        return false;
    }
    (value as u128) * 100 >= (threshold as u128) * (activation_percent as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_percent_is_exact() {
        let mut state = ProgressState::new(30_000, 40_000);
        state.pending_tokens = 15_000;
        assert_eq!(state.threshold_percent(), 50.0);

        state.observation_tokens = 10_000;
        assert_eq!(state.reflection_threshold_percent(), 25.0);
    }

    #[test]
    fn test_percent_tracks_counter_changes() {
        let mut state = ProgressState::new(1_000, 1_000);
        state.pending_tokens = 250;
        assert_eq!(state.threshold_percent(), 25.0);
        state.pending_tokens = 1_500;
        assert_eq!(state.threshold_percent(), 150.0);
        assert_eq!(state.snapshot().threshold_percent, 150.0);
    }

    #[test]
    fn test_zero_threshold_reads_zero() {
        let mut state = ProgressState::new(0, 0);
        state.pending_tokens = 10;
        assert_eq!(state.threshold_percent(), 0.0);
        assert!(!crossed(10, 0, 100));
    }

    #[test]
    fn test_crossed_with_floor() {
        assert!(!crossed(29_999, 30_000, 100));
        assert!(crossed(30_000, 30_000, 100));
        assert!(crossed(24_000, 30_000, 80));
        assert!(!crossed(23_999, 30_000, 80));
        assert!(crossed(u64::MAX, u64::MAX, 100));
    }

    #[test]
    fn test_blocks_new_cycle() {
        let mut op = BufferedOperation::default();
        assert!(!op.blocks_new_cycle());
        op.status = BufferStatus::Buffering;
        assert!(op.blocks_new_cycle());
        op.status = BufferStatus::Complete;
        assert!(op.blocks_new_cycle());
        op.status = BufferStatus::Failed;
        assert!(!op.blocks_new_cycle());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let state = ProgressState::new(100, 200);
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["pendingTokens"], 0);
        assert_eq!(json["status"], "idle");
        assert_eq!(json["buffered"]["observations"]["status"], "idle");
    }
}
