//! Ordered synthesis task queue.
//!
//! A pure synchronous state machine — no locking, no I/O, no tracing. The
//! executor and sequencer share one instance behind a mutex and are the
//! only writers; all mutation goes through the operations defined here so
//! the queue stays the single source of truth for task state.
//!
//! # Ordering model
//!
//! - `next_order` assigns strictly increasing order values at enqueue.
//! - `next_play_order` is the emission cursor: the order value eligible
//!   for playback next. It only ever advances by one, and only after the
//!   task at the cursor reached a terminal state and was played or
//!   skipped. A failed task still occupies its slot — the sequencer must
//!   skip it explicitly, so a single stuck order can never deadlock the
//!   pipeline.

use kaiwa_core::{PlaybackPayload, SynthesisTask, TaskId, TaskState};

/// Queue of synthesis tasks for one pipeline turn.
#[derive(Debug, Default)]
pub struct SynthesisQueue {
    tasks: Vec<SynthesisTask>,
    next_order: u64,
    next_play_order: u64,
    processing_count: usize,
    all_completed: bool,
    closed: bool,
}

impl SynthesisQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new pending task, assigning the next order value.
    pub fn enqueue(&mut self, text: impl Into<String>) -> TaskId {
        let order = self.next_order;
        self.next_order += 1;

        let id = TaskId(order);
        self.tasks.push(SynthesisTask::new(id, order, text.into()));
        self.all_completed = false;

        id
    }

    /// The lowest-order task still pending, if any. Does not mutate —
    /// callers claim by following up with a [`transition`] to
    /// [`TaskState::Processing`] under the same lock.
    ///
    /// [`transition`]: Self::transition
    #[must_use]
    pub fn claim_next(&self) -> Option<&SynthesisTask> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
            .min_by_key(|t| t.order)
    }

    /// Update a task's state and optional payload/error. Returns `false`
    /// if the id is unknown (e.g. the queue was reset while a synthesis
    /// call was in flight — the stale result is dropped).
    pub fn transition(
        &mut self,
        id: TaskId,
        new_state: TaskState,
        payload: Option<PlaybackPayload>,
        error: Option<String>,
    ) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };

        task.state = new_state;
        if payload.is_some() {
            task.payload = payload;
        }
        if error.is_some() {
            task.error = error;
        }

        self.recompute();
        true
    }

    /// The task at the emission cursor, if and only if it is completed and
    /// carries a payload. A failed task at the cursor is *not* returned —
    /// the sequencer observes it via [`peek_cursor`] and skips it.
    ///
    /// [`peek_cursor`]: Self::peek_cursor
    #[must_use]
    pub fn peek_playable(&self) -> Option<&SynthesisTask> {
        self.peek_cursor()
            .filter(|t| t.state == TaskState::Completed && t.payload.is_some())
    }

    /// The task at the emission cursor regardless of state.
    #[must_use]
    pub fn peek_cursor(&self) -> Option<&SynthesisTask> {
        self.tasks.iter().find(|t| t.order == self.next_play_order)
    }

    /// Advance the emission cursor by one. Called once per task after it
    /// was played or explicitly skipped.
    pub const fn advance_play_cursor(&mut self) {
        self.next_play_order += 1;
    }

    /// Clear all tasks and counters back to zero. Used on cancellation and
    /// when a new turn starts.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.next_order = 0;
        self.next_play_order = 0;
        self.processing_count = 0;
        self.all_completed = false;
        self.closed = false;
    }

    /// Mark that no further tasks will be enqueued this turn (the chat
    /// stream ended and the tail was flushed).
    pub const fn close(&mut self) {
        self.closed = true;
    }

    /// Whether the queue has been closed for this turn.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// True iff the task list is non-empty and every task is terminal.
    #[must_use]
    pub const fn all_completed(&self) -> bool {
        self.all_completed
    }

    /// Number of tasks currently in [`TaskState::Processing`].
    #[must_use]
    pub const fn processing_count(&self) -> usize {
        self.processing_count
    }

    /// True once the cursor has moved past every enqueued task.
    #[must_use]
    pub const fn fully_played(&self) -> bool {
        self.next_play_order >= self.next_order
    }

    /// Number of tasks in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the queue holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn recompute(&mut self) {
        self.processing_count = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Processing)
            .count();
        self.all_completed =
            !self.tasks.is_empty() && self.tasks.iter().all(|t| t.state.is_terminal());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_payload() -> Option<PlaybackPayload> {
        Some(PlaybackPayload::Audio { bytes: vec![0u8; 4] })
    }

    #[test]
    fn enqueue_assigns_increasing_orders() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        let b = queue.enqueue("b");
        assert_eq!(a, TaskId(0));
        assert_eq!(b, TaskId(1));
        assert_eq!(queue.len(), 2);
        assert!(!queue.all_completed());
    }

    #[test]
    fn claim_next_returns_lowest_pending() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        queue.enqueue("b");

        assert_eq!(queue.claim_next().unwrap().id, a);

        queue.transition(a, TaskState::Processing, None, None);
        assert_eq!(queue.claim_next().unwrap().id, TaskId(1));
        assert_eq!(queue.processing_count(), 1);
    }

    #[test]
    fn peek_playable_requires_completed_at_cursor() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        let b = queue.enqueue("b");

        // Out-of-order completion: b finishes first, cursor still at a.
        queue.transition(b, TaskState::Completed, completed_payload(), None);
        assert!(queue.peek_playable().is_none());

        queue.transition(a, TaskState::Completed, completed_payload(), None);
        assert_eq!(queue.peek_playable().unwrap().id, a);

        queue.advance_play_cursor();
        assert_eq!(queue.peek_playable().unwrap().id, b);
    }

    #[test]
    fn failed_task_is_visible_at_cursor_but_not_playable() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        queue.transition(a, TaskState::Failed, None, Some("boom".to_string()));

        assert!(queue.peek_playable().is_none());
        let cursor = queue.peek_cursor().unwrap();
        assert_eq!(cursor.state, TaskState::Failed);
        assert_eq!(cursor.error.as_deref(), Some("boom"));
    }

    #[test]
    fn all_completed_requires_every_task_terminal() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        let b = queue.enqueue("b");

        queue.transition(a, TaskState::Completed, completed_payload(), None);
        assert!(!queue.all_completed());

        queue.transition(b, TaskState::Failed, None, Some("err".to_string()));
        assert!(queue.all_completed());

        // A fresh enqueue clears the flag again.
        queue.enqueue("c");
        assert!(!queue.all_completed());
    }

    #[test]
    fn reset_clears_everything() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        queue.transition(a, TaskState::Processing, None, None);
        queue.advance_play_cursor();
        queue.close();

        queue.reset();

        assert!(queue.is_empty());
        assert_eq!(queue.processing_count(), 0);
        assert!(!queue.is_closed());
        assert_eq!(queue.enqueue("fresh"), TaskId(0));
    }

    #[test]
    fn stale_transition_after_reset_is_dropped() {
        let mut queue = SynthesisQueue::new();
        let a = queue.enqueue("a");
        queue.reset();

        assert!(!queue.transition(a, TaskState::Completed, completed_payload(), None));
        assert!(queue.is_empty());
    }

    #[test]
    fn fully_played_tracks_cursor() {
        let mut queue = SynthesisQueue::new();
        assert!(queue.fully_played());

        queue.enqueue("a");
        assert!(!queue.fully_played());

        queue.advance_play_cursor();
        assert!(queue.fully_played());
    }
}
