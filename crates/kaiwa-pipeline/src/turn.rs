//! Shared state for one pipeline turn.
//!
//! One [`TurnContext`] is created per accepted input and shared (via `Arc`)
//! by the controller, the executor, and the sequencer. A stale completion
//! callback from a previous turn holds an `Arc` to the *previous* context,
//! so it can never touch the new turn's queue.

use std::sync::Mutex;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use kaiwa_core::PipelineEvent;

use crate::queue::SynthesisQueue;

/// Per-turn shared state.
///
/// The queue mutex is a `std` mutex on purpose: every critical section is
/// a handful of field updates and is never held across an `.await` point.
pub struct TurnContext {
    /// Single source of truth for task state.
    pub queue: Mutex<SynthesisQueue>,

    /// Wakes the executor when new work is enqueued.
    pub work: Notify,

    /// Wakes the sequencer when a task reaches a terminal state.
    pub ready: Notify,

    /// Cancellation scope shared by every call and timer of this turn.
    pub cancel: CancellationToken,

    /// Event channel to the embedding layer.
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl TurnContext {
    /// Create a fresh context for a new turn.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self {
            queue: Mutex::new(SynthesisQueue::new()),
            work: Notify::new(),
            ready: Notify::new(),
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Emit an event (best-effort — a dropped receiver is logged and ignored).
    pub fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("pipeline event receiver dropped");
        }
    }

    /// Run a closure against the locked queue.
    ///
    /// Panics only if a previous holder panicked; the queue has no
    /// panicking operations, so the lock cannot be poisoned in practice.
    pub fn with_queue<T>(&self, f: impl FnOnce(&mut SynthesisQueue) -> T) -> T {
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut queue)
    }
}
