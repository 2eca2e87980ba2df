//! Ordered playback sequencer.
//!
//! Watches the queue for the task at the emission cursor and hands ready
//! payloads to the playback sink, strictly in enqueue order, however the
//! executor's completions interleave. A failed task at the cursor is
//! skipped (cursor advanced, nothing played) so it can never block the
//! tasks behind it.
//!
//! The drain logic is an explicit work loop — each wake drains every
//! consecutive resolved task and then parks on the ready notifier — so a
//! long run of back-to-back completions costs iterations, not stack depth.

use std::sync::Arc;

use tokio::sync::watch;

use kaiwa_core::{PipelineEvent, PlaybackPayload, PlaybackSink, TaskState};

use crate::turn::TurnContext;

/// What the sequencer found at the cursor.
enum Step {
    /// A completed payload ready to play.
    Play(u64, PlaybackPayload),
    /// A failed task — skipped, cursor already advanced.
    Skip(u64, String),
    /// Cursor task unresolved (or queue still open) — wait for a wake.
    Wait,
    /// Queue closed and every task played or skipped.
    Drained,
}

/// Sequencer for one turn.
pub struct PlaybackSequencer {
    sink: Arc<dyn PlaybackSink>,
    /// Invoked once, immediately before the first payload is handed to the
    /// sink. The controller uses this for the thinking → speaking
    /// transition that lip-sync mode defers until there is a frame to show.
    on_first_play: Option<Box<dyn FnOnce() + Send>>,
}

impl PlaybackSequencer {
    /// Create a sequencer around a playback sink.
    #[must_use]
    pub fn new(
        sink: Arc<dyn PlaybackSink>,
        on_first_play: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self { sink, on_first_play }
    }

    /// Run until the turn drains or is cancelled. Sets `drained` to `true`
    /// on natural completion; the interrupt path sets it itself.
    pub async fn run(mut self, ctx: Arc<TurnContext>, drained: watch::Sender<bool>) {
        loop {
            // Drain every consecutive resolved task at the cursor.
            loop {
                match next_step(&ctx) {
                    Step::Play(order, payload) => {
                        if !self.play_one(&ctx, order, payload).await {
                            return;
                        }
                    }
                    Step::Skip(order, error) => {
                        tracing::warn!(order, error = %error, "skipping failed segment in playback");
                    }
                    Step::Wait => break,
                    Step::Drained => {
                        tracing::debug!("playback drained naturally");
                        let _ = drained.send(true);
                        return;
                    }
                }
            }

            tokio::select! {
                () = ctx.cancel.cancelled() => return,
                () = ctx.ready.notified() => {}
            }
        }
    }

    /// Play a single payload to completion. Returns `false` if the turn
    /// was cancelled while playing.
    async fn play_one(&mut self, ctx: &TurnContext, order: u64, payload: PlaybackPayload) -> bool {
        if let Some(hook) = self.on_first_play.take() {
            hook();
        }
        ctx.emit(PipelineEvent::PlaybackStarted { order });

        let result = tokio::select! {
            () = ctx.cancel.cancelled() => {
                // stop() was (or is about to be) issued by the interrupt
                // path; do not advance the cursor of a dead turn.
                tracing::debug!(order, "playback interrupted");
                return false;
            }
            result = self.sink.play(payload) => result,
        };

        if ctx.cancel.is_cancelled() {
            return false;
        }

        match result {
            Ok(()) => ctx.emit(PipelineEvent::PlaybackFinished { order }),
            Err(e) => {
                tracing::warn!(order, error = %e, "playback error — continuing with next segment");
            }
        }

        ctx.with_queue(super::queue::SynthesisQueue::advance_play_cursor);
        true
    }
}

/// Inspect the cursor under the queue lock and decide the next step.
/// Skipping advances the cursor inside the same critical section, so the
/// decision and the mutation are atomic.
fn next_step(ctx: &TurnContext) -> Step {
    ctx.with_queue(|queue| {
        let step = match queue.peek_cursor() {
            Some(task) if task.state == TaskState::Completed => {
                // `payload.is_some()` is an invariant of Completed; if it is
                // ever violated, skip rather than wedge the cursor.
                task.payload.clone().map_or_else(
                    || Step::Skip(task.order, "completed task carried no payload".to_string()),
                    |payload| Step::Play(task.order, payload),
                )
            }
            Some(task) if task.state == TaskState::Failed => {
                Step::Skip(task.order, task.error.clone().unwrap_or_default())
            }
            Some(_) => Step::Wait,
            None => {
                if queue.is_closed() && queue.fully_played() {
                    Step::Drained
                } else {
                    Step::Wait
                }
            }
        };

        if matches!(step, Step::Skip(..)) {
            queue.advance_play_cursor();
        }
        step
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use kaiwa_core::{PlaybackError, TaskId};
    use tokio::sync::mpsc;

    /// Sink that records the payload bytes it played, in order.
    struct RecordingSink {
        played: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { played: Mutex::new(Vec::new()) })
        }

        fn played(&self) -> Vec<Vec<u8>> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn play(&self, payload: PlaybackPayload) -> Result<(), PlaybackError> {
            self.played
                .lock()
                .unwrap()
                .push(payload.audio_bytes().to_vec());
            Ok(())
        }

        fn stop(&self) {}

        fn is_playing(&self) -> bool {
            false
        }
    }

    fn context() -> (Arc<TurnContext>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(TurnContext::new(tx)), rx)
    }

    fn completed(ctx: &TurnContext, id: TaskId, byte: u8) {
        ctx.with_queue(|q| {
            q.transition(
                id,
                TaskState::Completed,
                Some(PlaybackPayload::Audio { bytes: vec![byte] }),
                None,
            );
        });
        ctx.ready.notify_one();
    }

    #[tokio::test]
    async fn out_of_order_completion_plays_in_order() {
        let (ctx, _events) = context();
        let sink = RecordingSink::new();

        let (drained_tx, mut drained_rx) = watch::channel(false);
        let sequencer = PlaybackSequencer::new(Arc::clone(&sink) as _, None);
        let run = tokio::spawn(sequencer.run(Arc::clone(&ctx), drained_tx));

        ctx.with_queue(|q| {
            q.enqueue("A");
            q.enqueue("B");
            q.enqueue("C");
            q.close();
        });

        // Complete in order C, A, B.
        for (id, byte) in [(TaskId(2), b'C'), (TaskId(0), b'A'), (TaskId(1), b'B')] {
            completed(&ctx, id, byte);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drained_rx.wait_for(|d| *d).await.unwrap();
        run.await.unwrap();

        assert_eq!(sink.played(), vec![vec![b'A'], vec![b'B'], vec![b'C']]);
    }

    #[tokio::test]
    async fn failed_task_is_skipped_without_blocking() {
        let (ctx, mut events) = context();
        let sink = RecordingSink::new();

        let (drained_tx, mut drained_rx) = watch::channel(false);
        let sequencer = PlaybackSequencer::new(Arc::clone(&sink) as _, None);
        let run = tokio::spawn(sequencer.run(Arc::clone(&ctx), drained_tx));

        ctx.with_queue(|q| {
            q.enqueue("A");
            q.enqueue("B");
            q.close();
            q.transition(TaskId(0), TaskState::Failed, None, Some("tts 500".to_string()));
        });
        completed(&ctx, TaskId(1), b'B');

        drained_rx.wait_for(|d| *d).await.unwrap();
        run.await.unwrap();

        // Only B played; the cursor moved past both orders.
        assert_eq!(sink.played(), vec![vec![b'B']]);
        ctx.with_queue(|q| assert!(q.fully_played()));

        // No PlaybackStarted was emitted for the failed order.
        let mut started = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::PlaybackStarted { order } = event {
                started.push(order);
            }
        }
        assert_eq!(started, vec![1]);
    }

    #[tokio::test]
    async fn first_play_hook_fires_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (ctx, _events) = context();
        let sink = RecordingSink::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let (drained_tx, mut drained_rx) = watch::channel(false);
        let sequencer = PlaybackSequencer::new(
            Arc::clone(&sink) as _,
            Some(Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let run = tokio::spawn(sequencer.run(Arc::clone(&ctx), drained_tx));

        ctx.with_queue(|q| {
            q.enqueue("A");
            q.enqueue("B");
            q.close();
        });
        completed(&ctx, TaskId(0), 1);
        completed(&ctx, TaskId(1), 2);

        drained_rx.wait_for(|d| *d).await.unwrap();
        run.await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sink.played().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_sequencer() {
        let (ctx, _events) = context();
        let sink = RecordingSink::new();

        let (drained_tx, drained_rx) = watch::channel(false);
        let sequencer = PlaybackSequencer::new(Arc::clone(&sink) as _, None);
        let run = tokio::spawn(sequencer.run(Arc::clone(&ctx), drained_tx));

        tokio::time::sleep(Duration::from_millis(5)).await;
        ctx.cancel.cancel();
        run.await.unwrap();

        // Cancelled, not drained.
        assert!(!*drained_rx.borrow());
    }
}
