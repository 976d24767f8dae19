//! Memory threshold controller
//!
//! Each thread moves every operation through
//! `idle -> buffering -> {complete | failed} -> (activation) -> idle`.
//!
//! Buffering runs on a spawned task and reports back over a channel; it never
//! touches thread state. The owner of the controller applies results with
//! [`MemoryController::drain_completions`] / [`MemoryController::next_completion`]
//! and commits them with [`MemoryController::activate`], normally through
//! [`MemoryController::on_turn_boundary`] so the model never sees its
//! context change mid-turn.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::config::MemoryConfig;
use super::events::{create_event_channel, emit, EventReceiver, EventSender, ProgressEvent};
use super::progress::{
    crossed, BufferStatus, BufferedOperation, OperationKind, ProgressState, ProgressStatus,
};
use super::summarizer::{
    CharRatioCounter, Summarizer, Summary, SummaryRequest, TokenCounter, OBSERVER_SYSTEM_PROMPT,
    REFLECTOR_SYSTEM_PROMPT,
};
use super::thread::{format_messages, MessageRecord, ObservationEntry, ThreadSnapshot};
use crate::core::{GateError, GateResult};

/// Result of a background compression call, tagged with where it belongs
#[derive(Debug)]
struct BufferOutcome {
    thread_id: String,
    epoch: u64,
    operation: OperationKind,
    cycle_id: String,
    result: Result<Summary, String>,
}

/// Bookkeeping for an in-flight or completed buffer
#[derive(Debug)]
struct BufferJob {
    cycle_id: String,
    /// Messages (observation) or log entries (reflection) fed to the summarizer
    covered: usize,
    started: Instant,
    /// Compressed text, present once complete
    output: Option<String>,
    /// Background summarizer call
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct ThreadMemory {
    /// Changes whenever the thread is (re)opened; stale results carry an old epoch
    epoch: u64,
    state: ProgressState,
    pending: VecDeque<MessageRecord>,
    observations: Vec<ObservationEntry>,
    observation_job: Option<BufferJob>,
    reflection_job: Option<BufferJob>,
}

impl ThreadMemory {
    fn new(epoch: u64, state: ProgressState) -> Self {
        Self {
            epoch,
            state,
            pending: VecDeque::new(),
            observations: Vec::new(),
            observation_job: None,
            reflection_job: None,
        }
    }

    fn job(&self, op: OperationKind) -> Option<&BufferJob> {
        match op {
            OperationKind::Observation => self.observation_job.as_ref(),
            OperationKind::Reflection => self.reflection_job.as_ref(),
        }
    }

    fn job_mut(&mut self, op: OperationKind) -> &mut Option<BufferJob> {
        match op {
            OperationKind::Observation => &mut self.observation_job,
            OperationKind::Reflection => &mut self.reflection_job,
        }
    }

    /// A summarizer call is still running for some operation
    fn is_buffering(&self) -> bool {
        OperationKind::ALL
            .iter()
            .any(|&op| self.job(op).is_some_and(|job| job.output.is_none()))
    }

    /// Cancel running summarizer calls; the thread is being dropped
    fn abort_jobs(&self, thread_id: &str) {
        for job in [&self.observation_job, &self.reflection_job]
            .into_iter()
            .flatten()
        {
            if !job.handle.is_finished() {
                tracing::debug!(thread_id, cycle_id = %job.cycle_id, "Aborting buffer task");
            }
            job.handle.abort();
        }
    }

    fn counter(&self, op: OperationKind) -> (u64, u64) {
        match op {
            OperationKind::Observation => (self.state.pending_tokens, self.state.threshold),
            OperationKind::Reflection => {
                (self.state.observation_tokens, self.state.reflection_threshold)
            }
        }
    }
}

/// How a buffer outcome was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Buffer is complete and waiting for activation
    Completed {
        thread_id: String,
        operation: OperationKind,
    },
    /// Buffer failed; the thread is back to idle for this operation
    Failed {
        thread_id: String,
        operation: OperationKind,
        error: String,
    },
    /// Thread was closed or reset while the call was running
    Discarded {
        thread_id: String,
        operation: OperationKind,
    },
}

/// What an activation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub operation: OperationKind,
    pub cycle_id: String,
    /// Tokens that left the live context
    pub tokens_removed: u64,
    /// Observation log size after activation
    pub observation_tokens: u64,
}

/// Everything [`MemoryController::on_turn_boundary`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    pub completions: Vec<Completion>,
    pub activations: Vec<Activation>,
    pub started: Vec<OperationKind>,
}

/// Decides when to compress conversation threads and runs the compression
/// in the background
pub struct MemoryController {
    config: MemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<dyn TokenCounter>,
    threads: HashMap<String, ThreadMemory>,
    next_epoch: u64,
    events: EventSender,
    completion_tx: mpsc::UnboundedSender<BufferOutcome>,
    completion_rx: mpsc::UnboundedReceiver<BufferOutcome>,
}

impl MemoryController {
    /// Create a controller; fails if the configuration is invalid
    pub fn new(config: MemoryConfig, summarizer: Arc<dyn Summarizer>) -> GateResult<Self> {
        config.validate()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            summarizer,
            counter: Arc::new(CharRatioCounter::default()),
            threads: HashMap::new(),
            next_epoch: 0,
            events: create_event_channel(),
            completion_tx,
            completion_rx,
        })
    }

    /// Use a specific token counter for outputs without reported usage
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Publish progress on an existing channel
    pub fn with_event_sender(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------------

    /// Start tracking a thread. Re-opening an existing thread resets it:
    /// its running buffer tasks are aborted and any result they already
    /// sent is discarded.
    pub fn open_thread(&mut self, thread_id: impl Into<String>) {
        let thread_id = thread_id.into();
        let state = ProgressState::new(
            self.config.observation_threshold,
            self.config.reflection_threshold,
        );
        let memory = self.fresh_thread(state);
        if let Some(old) = self.threads.insert(thread_id.clone(), memory) {
            old.abort_jobs(&thread_id);
            tracing::info!(thread_id = %thread_id, "Reset thread memory");
        } else {
            tracing::debug!(thread_id = %thread_id, "Opened thread memory");
        }
    }

    /// Stop tracking a thread and abort its buffer tasks. Returns whether
    /// it existed.
    pub fn close_thread(&mut self, thread_id: &str) -> bool {
        match self.threads.remove(thread_id) {
            Some(memory) => {
                memory.abort_jobs(thread_id);
                tracing::debug!(thread_id, "Closed thread memory");
                true
            }
            None => false,
        }
    }

    pub fn has_thread(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    fn fresh_thread(&mut self, state: ProgressState) -> ThreadMemory {
        self.next_epoch += 1;
        ThreadMemory::new(self.next_epoch, state)
    }

    fn thread_mut(&mut self, thread_id: &str) -> GateResult<&mut ThreadMemory> {
        self.threads
            .get_mut(thread_id)
            .ok_or_else(|| GateError::UnknownThread(thread_id.to_string()))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Current progress of a thread
    pub fn progress(&self, thread_id: &str) -> Option<&ProgressState> {
        self.threads.get(thread_id).map(|m| &m.state)
    }

    /// The thread's active observation log
    pub fn observations(&self, thread_id: &str) -> Option<&[ObservationEntry]> {
        self.threads.get(thread_id).map(|m| m.observations.as_slice())
    }

    /// Messages not yet folded into an observation
    pub fn pending_messages(&self, thread_id: &str) -> Option<impl Iterator<Item = &MessageRecord>> {
        self.threads.get(thread_id).map(|m| m.pending.iter())
    }

    /// Whether the counter for `op` has reached its activation floor
    pub fn threshold_reached(&self, thread_id: &str, op: OperationKind) -> bool {
        self.threads.get(thread_id).is_some_and(|m| {
            let (value, threshold) = m.counter(op);
            crossed(value, threshold, self.config.activation_percent)
        })
    }

    // ------------------------------------------------------------------------
    // Foreground updates
    // ------------------------------------------------------------------------

    /// Add a message to the thread's unobserved tail
    pub fn record_message(&mut self, thread_id: &str, message: MessageRecord) -> GateResult<()> {
        let memory = self.thread_mut(thread_id)?;
        memory.state.pending_tokens = memory.state.pending_tokens.saturating_add(message.tokens);
        memory.pending.push_back(message);
        Ok(())
    }

    /// Start background compression for `op`.
    ///
    /// Returns `Ok(false)` without doing anything when a buffer of the same
    /// type is still in flight or waiting for activation, or when there is
    /// nothing to compress. Thresholds are not checked here.
    pub fn start_buffer(&mut self, thread_id: &str, op: OperationKind) -> GateResult<bool> {
        let timeout = self.config.buffer_timeout();
        let (model, system_prompt) = match op {
            OperationKind::Observation => (self.config.observer_model.clone(), OBSERVER_SYSTEM_PROMPT),
            OperationKind::Reflection => (self.config.reflector_model.clone(), REFLECTOR_SYSTEM_PROMPT),
        };
        let summarizer = Arc::clone(&self.summarizer);
        let completion_tx = self.completion_tx.clone();
        let events = self.events.clone();

        let memory = self.thread_mut(thread_id)?;

        if memory.state.buffered.get(op).blocks_new_cycle() {
            tracing::debug!(thread_id, operation = %op, "Buffer already in flight, not starting another");
            return Ok(false);
        }

        let (input, covered, tokens_to_buffer, projected_removal) = match op {
            OperationKind::Observation => {
                if memory.pending.is_empty() {
                    return Ok(false);
                }
                let tokens: u64 = memory.pending.iter().map(|m| m.tokens).sum();
                (
                    format_messages(memory.pending.iter()),
                    memory.pending.len(),
                    tokens,
                    tokens,
                )
            }
            OperationKind::Reflection => {
                if memory.observations.is_empty() {
                    return Ok(false);
                }
                let input = memory
                    .observations
                    .iter()
                    .map(|o| o.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (input, memory.observations.len(), memory.state.observation_tokens, 0)
            }
        };

        let cycle_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        *memory.state.buffered.get_mut(op) = BufferedOperation {
            status: BufferStatus::Buffering,
            cycle_id: Some(cycle_id.clone()),
            started_at: Some(now),
            tokens_buffered: tokens_to_buffer,
            projected_message_removal: projected_removal,
            ..Default::default()
        };

        if memory.state.status == ProgressStatus::Idle {
            memory.state.status = op.active_status();
            memory.state.cycle_id = Some(cycle_id.clone());
            memory.state.start_time = Some(now);
        }

        let request = SummaryRequest {
            thread_id: thread_id.to_string(),
            operation: op,
            model,
            system_prompt: system_prompt.to_string(),
            input,
        };
        let epoch = memory.epoch;
        let task_thread_id = thread_id.to_string();
        let task_cycle_id = cycle_id.clone();

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, summarizer.summarize(request)).await {
                Ok(Ok(summary)) => Ok(summary),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
            };
            // Receiver lives as long as the controller; a dropped controller
            // has nobody left to activate into.
            let _ = completion_tx.send(BufferOutcome {
                thread_id: task_thread_id,
                epoch,
                operation: op,
                cycle_id: task_cycle_id,
                result,
            });
        });

        *memory.job_mut(op) = Some(BufferJob {
            cycle_id: cycle_id.clone(),
            covered,
            started,
            output: None,
            handle,
        });

        tracing::info!(
            thread_id,
            operation = %op,
            cycle_id = %cycle_id,
            tokens = tokens_to_buffer,
            "Started buffering"
        );
        emit(
            &events,
            ProgressEvent::BufferStarted {
                thread_id: thread_id.to_string(),
                operation: op,
                cycle_id,
                tokens_to_buffer,
            },
        );

        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Completion handling
    // ------------------------------------------------------------------------

    /// Apply every outcome that has already arrived, without waiting
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        while let Ok(outcome) = self.completion_rx.try_recv() {
            completions.push(self.record_outcome(outcome));
        }
        completions
    }

    /// Wait for the next outcome and apply it.
    ///
    /// Returns `None` right away when nothing has arrived and no thread has
    /// a buffer in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        let outcome = match self.completion_rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) if !self.threads.values().any(ThreadMemory::is_buffering) => return None,
            Err(_) => self.completion_rx.recv().await?,
        };
        Some(self.record_outcome(outcome))
    }

    fn record_outcome(&mut self, outcome: BufferOutcome) -> Completion {
        let BufferOutcome {
            thread_id,
            epoch,
            operation: op,
            cycle_id,
            result,
        } = outcome;
        let counter = Arc::clone(&self.counter);
        let events = self.events.clone();

        let live = self.threads.get_mut(&thread_id).filter(|m| {
            m.epoch == epoch && m.job(op).is_some_and(|job| job.cycle_id == cycle_id)
        });
        let Some(memory) = live else {
            tracing::warn!(
                thread_id = %thread_id,
                operation = %op,
                cycle_id = %cycle_id,
                "Discarding buffer result for closed or reset thread"
            );
            emit(
                &events,
                ProgressEvent::Discarded {
                    thread_id: thread_id.clone(),
                    operation: op,
                    cycle_id,
                },
            );
            return Completion::Discarded {
                thread_id,
                operation: op,
            };
        };

        let duration_ms = memory
            .job(op)
            .map(|job| job.started.elapsed().as_millis() as u64)
            .unwrap_or_default();

        let result = result.and_then(|summary| {
            if summary.text.trim().is_empty() {
                Err("summarizer returned empty output".to_string())
            } else {
                Ok(summary)
            }
        });

        match result {
            Ok(summary) => {
                let (buffered_tokens, estimated) = match summary.output_tokens {
                    Some(tokens) => (tokens, false),
                    None => (counter.count(&summary.text), !counter.is_exact()),
                };

                let buffered = memory.state.buffered.get_mut(op);
                buffered.status = BufferStatus::Complete;
                buffered.buffered_tokens = buffered_tokens;
                buffered.buffered_tokens_estimated = estimated;
                let tokens_buffered = buffered.tokens_buffered;

                if let Some(job) = memory.job_mut(op) {
                    job.output = Some(summary.text);
                }

                tracing::info!(
                    thread_id = %thread_id,
                    operation = %op,
                    cycle_id = %cycle_id,
                    tokens_buffered,
                    buffered_tokens,
                    duration_ms,
                    "Buffer complete"
                );
                emit(
                    &events,
                    ProgressEvent::BufferCompleted {
                        thread_id: thread_id.clone(),
                        operation: op,
                        cycle_id,
                        tokens_buffered,
                        buffered_tokens,
                        estimated,
                        duration_ms,
                    },
                );

                Completion::Completed {
                    thread_id,
                    operation: op,
                }
            }
            Err(error) => {
                let buffered = memory.state.buffered.get_mut(op);
                let attempted_tokens = buffered.tokens_buffered;
                *buffered = BufferedOperation {
                    status: BufferStatus::Failed,
                    tokens_buffered: attempted_tokens,
                    error: Some(error.clone()),
                    ..Default::default()
                };
                *memory.job_mut(op) = None;
                if memory.state.owned_by(op, &cycle_id) {
                    memory.state.clear_cycle();
                }

                tracing::warn!(
                    thread_id = %thread_id,
                    operation = %op,
                    cycle_id = %cycle_id,
                    error = %error,
                    "Buffer failed; continuing with uncompressed context"
                );
                emit(
                    &events,
                    ProgressEvent::BufferFailed {
                        thread_id: thread_id.clone(),
                        operation: op,
                        cycle_id,
                        error: error.clone(),
                        attempted_tokens,
                        duration_ms,
                    },
                );

                Completion::Failed {
                    thread_id,
                    operation: op,
                    error,
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Commit a completed buffer into the thread.
    ///
    /// Only call between turns. Returns `None` (and changes nothing) when the
    /// thread is gone or `op` has no completed buffer, including when the
    /// buffer was already activated.
    pub fn activate(&mut self, thread_id: &str, op: OperationKind) -> Option<Activation> {
        let events = self.events.clone();
        let memory = self.threads.get_mut(thread_id)?;

        if memory.state.buffered.get(op).status != BufferStatus::Complete {
            return None;
        }
        let job = memory.job_mut(op).take()?;
        let output = job.output?;
        let buffered = std::mem::take(memory.state.buffered.get_mut(op));

        let entry = ObservationEntry {
            text: output,
            tokens: buffered.buffered_tokens,
            estimated: buffered.buffered_tokens_estimated,
        };
        if entry.estimated {
            tracing::warn!(
                thread_id,
                operation = %op,
                tokens = entry.tokens,
                "Summarizer reported no usage; observation log size uses an estimated count"
            );
        }

        let tokens_removed = match op {
            OperationKind::Observation => {
                let covered = job.covered.min(memory.pending.len());
                memory.pending.drain(..covered);
                memory.state.pending_tokens = memory
                    .state
                    .pending_tokens
                    .saturating_sub(buffered.projected_message_removal);
                memory.state.observation_tokens =
                    memory.state.observation_tokens.saturating_add(entry.tokens);
                memory.observations.push(entry);
                buffered.projected_message_removal
            }
            OperationKind::Reflection => {
                // Entries appended while reflecting were not part of the input
                let before = memory.state.observation_tokens;
                let covered = job.covered.min(memory.observations.len());
                memory.observations.drain(..covered);
                memory.observations.insert(0, entry);
                memory.state.observation_tokens =
                    memory.observations.iter().map(|o| o.tokens).sum();
                before.saturating_sub(memory.state.observation_tokens)
            }
        };

        if memory.state.owned_by(op, &job.cycle_id) {
            memory.state.clear_cycle();
        }

        let activation = Activation {
            operation: op,
            cycle_id: job.cycle_id,
            tokens_removed,
            observation_tokens: memory.state.observation_tokens,
        };

        tracing::info!(
            thread_id,
            operation = %op,
            cycle_id = %activation.cycle_id,
            tokens_removed,
            observation_tokens = activation.observation_tokens,
            "Activated buffer"
        );
        emit(
            &events,
            ProgressEvent::Activated {
                thread_id: thread_id.to_string(),
                operation: op,
                cycle_id: activation.cycle_id.clone(),
                tokens_removed,
                observation_tokens: activation.observation_tokens,
            },
        );

        Some(activation)
    }

    /// Safe point between agent turns: apply arrived results, activate
    /// completed buffers (observation first), then start buffers whose
    /// thresholds are crossed.
    pub fn on_turn_boundary(&mut self, thread_id: &str) -> GateResult<TurnReport> {
        if !self.has_thread(thread_id) {
            return Err(GateError::UnknownThread(thread_id.to_string()));
        }

        let mut report = TurnReport {
            completions: self.drain_completions(),
            ..Default::default()
        };

        for op in OperationKind::ALL {
            if let Some(activation) = self.activate(thread_id, op) {
                report.activations.push(activation);
            }
        }

        for op in OperationKind::ALL {
            if self.threshold_reached(thread_id, op) && self.start_buffer(thread_id, op)? {
                report.started.push(op);
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Persistable copy of a thread's records
    pub fn snapshot_thread(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        self.threads.get(thread_id).map(|m| ThreadSnapshot {
            threshold: m.state.threshold,
            reflection_threshold: m.state.reflection_threshold,
            pending_messages: m.pending.iter().cloned().collect(),
            observations: m.observations.clone(),
        })
    }

    /// Open (or reset) a thread from a snapshot. Counters are recomputed
    /// from the records; in-flight work is not restored. A zero threshold
    /// in the snapshot is replaced by the configured one.
    pub fn restore_thread(&mut self, thread_id: impl Into<String>, snapshot: ThreadSnapshot) {
        let thread_id = thread_id.into();
        let threshold = nonzero_or(
            snapshot.threshold,
            self.config.observation_threshold,
            &thread_id,
            "threshold",
        );
        let reflection_threshold = nonzero_or(
            snapshot.reflection_threshold,
            self.config.reflection_threshold,
            &thread_id,
            "reflection_threshold",
        );
        let mut state = ProgressState::new(threshold, reflection_threshold);
        state.pending_tokens = snapshot.pending_tokens();
        state.observation_tokens = snapshot.observation_tokens();

        let mut memory = self.fresh_thread(state);
        memory.pending = snapshot.pending_messages.into();
        memory.observations = snapshot.observations;

        tracing::info!(
            thread_id = %thread_id,
            pending_tokens = memory.state.pending_tokens,
            observation_tokens = memory.state.observation_tokens,
            "Restored thread memory"
        );
        if let Some(old) = self.threads.insert(thread_id.clone(), memory) {
            old.abort_jobs(&thread_id);
        }
    }
}

fn nonzero_or(value: u64, fallback: u64, thread_id: &str, field: &str) -> u64 {
    if value == 0 {
        tracing::warn!(thread_id, field, fallback, "Stored threshold is zero; using configured value");
        return fallback;
    }
    value
}
