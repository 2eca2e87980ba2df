//! Bounded concurrent synthesis executor.
//!
//! Pulls pending tasks from the queue up to the concurrency limit, runs
//! one synthesis call per task (plus frame generation in lip-sync mode),
//! and writes results back as queue state. A freed slot is refilled
//! immediately — every task completion re-enters the scheduling loop, so
//! concurrency stays saturated rather than proceeding in batches.
//!
//! Failure policy: a task that errors is marked failed and the sequencer
//! is still notified so the cursor can skip past it. An error caused by
//! the turn's cancellation token freezes the task where it is and stops
//! scheduling — the teardown path owns the queue from that point.

use std::sync::Arc;

use tokio::task::JoinSet;

use kaiwa_core::{
    EngineError, FrameGenerator, PipelineEvent, PlaybackPayload, SpeechSynthesizer, SynthesisTask,
    TaskState,
};

use crate::segment::split_for_budget;
use crate::turn::TurnContext;

/// Executor for one turn's synthesis workload.
pub struct SynthesisExecutor {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    frame_generator: Option<(Arc<dyn FrameGenerator>, String)>,
    concurrency_limit: usize,
    char_budget: usize,
}

impl SynthesisExecutor {
    /// Create an executor. `frame_generator` carries the face reference id
    /// and is `Some` only in lip-sync mode.
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        frame_generator: Option<(Arc<dyn FrameGenerator>, String)>,
        concurrency_limit: usize,
        char_budget: usize,
    ) -> Self {
        Self {
            synthesizer,
            frame_generator,
            concurrency_limit: concurrency_limit.max(1),
            char_budget: char_budget.max(1),
        }
    }

    /// Run until the queue is closed and drained, or the turn is cancelled.
    pub async fn run(self, ctx: Arc<TurnContext>) {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }

            // Fill every free slot before sleeping.
            while in_flight.len() < self.concurrency_limit {
                let Some(task) = self.claim(&ctx) else { break };
                tracing::debug!(order = task.order, len = task.text.len(), "claimed synthesis task");
                in_flight.spawn(synthesize_into_queue(
                    task,
                    Arc::clone(&ctx),
                    Arc::clone(&self.synthesizer),
                    self.frame_generator.clone(),
                    self.char_budget,
                ));
            }

            let drained = ctx.with_queue(|q| q.is_closed() && q.claim_next().is_none());
            if drained && in_flight.is_empty() {
                tracing::debug!("synthesis workload drained");
                break;
            }

            tokio::select! {
                () = ctx.cancel.cancelled() => break,
                () = ctx.work.notified() => {}
                joined = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Some(Err(e)) = joined {
                        tracing::warn!(error = %e, "synthesis task aborted");
                    }
                }
            }
        }

        // On cancellation the in-flight calls observe the token themselves;
        // aborting here just drops their completion handlers sooner.
        in_flight.abort_all();
    }

    /// Claim the lowest-order pending task: read it and mark it processing
    /// under a single lock so no other claimant can observe it pending.
    fn claim(&self, ctx: &TurnContext) -> Option<SynthesisTask> {
        ctx.with_queue(|queue| {
            let task = queue.claim_next().cloned()?;
            queue.transition(task.id, TaskState::Processing, None, None);
            Some(task)
        })
    }
}

/// Synthesize one task and write the result back as queue state. Runs as
/// its own spawned future so the executor loop keeps scheduling while it
/// is in flight.
async fn synthesize_into_queue(
    task: SynthesisTask,
    ctx: Arc<TurnContext>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    frame_generator: Option<(Arc<dyn FrameGenerator>, String)>,
    char_budget: usize,
) {
    let result =
        synthesize_payload(&task.text, char_budget, &synthesizer, frame_generator.as_ref(), &ctx)
            .await;

    // A completion arriving after cancellation must be a no-op.
    if ctx.cancel.is_cancelled() {
        tracing::debug!(order = task.order, "dropping synthesis result after cancellation");
        return;
    }

    match result {
        Ok(payload) => {
            ctx.with_queue(|q| q.transition(task.id, TaskState::Completed, Some(payload), None));
            tracing::debug!(order = task.order, "synthesis completed");
        }
        Err(e) if e.is_cancelled() => {
            // Frozen in place; teardown owns the queue now.
            tracing::debug!(order = task.order, "synthesis cancelled");
            return;
        }
        Err(e) => {
            tracing::warn!(order = task.order, error = %e, "synthesis failed");
            ctx.with_queue(|q| q.transition(task.id, TaskState::Failed, None, Some(e.to_string())));
            ctx.emit(PipelineEvent::SegmentFailed {
                order: task.order,
                error: e.to_string(),
            });
        }
    }

    // Wake the sequencer for both outcomes — a failed task must be
    // skipped promptly or it blocks everything behind it.
    ctx.ready.notify_one();
}

/// Synthesize one task's text into a playback payload.
///
/// Text beyond the per-call character budget is pre-split and the audio of
/// the sub-calls concatenated, so the queue only ever sees whole segments.
async fn synthesize_payload(
    text: &str,
    char_budget: usize,
    synthesizer: &Arc<dyn SpeechSynthesizer>,
    frame_generator: Option<&(Arc<dyn FrameGenerator>, String)>,
    ctx: &TurnContext,
) -> Result<PlaybackPayload, EngineError> {
    let mut audio = Vec::new();
    for piece in split_for_budget(text, char_budget) {
        let bytes = synthesizer.synthesize(&piece, &ctx.cancel).await?;
        audio.extend_from_slice(&bytes);
    }

    match frame_generator {
        Some((generator, face_id)) => {
            let frames = generator.generate(face_id, &audio, &ctx.cancel).await?;
            Ok(PlaybackPayload::Video { audio, frames })
        }
        None => Ok(PlaybackPayload::Audio { bytes: audio }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Synthesizer that tracks the peak number of concurrent calls.
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ConcurrencyProbe {
        async fn synthesize(
            &self,
            text: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>, EngineError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(text.as_bytes().to_vec())
        }
    }

    fn context() -> (Arc<TurnContext>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(TurnContext::new(tx)), rx)
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let (ctx, _rx) = context();
        let probe = Arc::new(ConcurrencyProbe::new());

        ctx.with_queue(|q| {
            for i in 0..12 {
                q.enqueue(format!("sentence {i}"));
            }
            q.close();
        });

        let executor = SynthesisExecutor::new(Arc::clone(&probe) as _, None, 2, 150);
        executor.run(Arc::clone(&ctx)).await;

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
        ctx.with_queue(|q| {
            assert!(q.all_completed());
            assert_eq!(q.processing_count(), 0);
        });
    }

    #[tokio::test]
    async fn failed_synthesis_becomes_queue_state() {
        struct FailSecond;

        #[async_trait]
        impl SpeechSynthesizer for FailSecond {
            async fn synthesize(
                &self,
                text: &str,
                _cancel: &CancellationToken,
            ) -> Result<Vec<u8>, EngineError> {
                if text.contains('1') {
                    Err(EngineError::UpstreamStatus {
                        status: 500,
                        body: "synthesis backend down".to_string(),
                    })
                } else {
                    Ok(vec![7])
                }
            }
        }

        let (ctx, mut rx) = context();
        ctx.with_queue(|q| {
            q.enqueue("sentence 0");
            q.enqueue("sentence 1");
            q.close();
        });

        let executor = SynthesisExecutor::new(Arc::new(FailSecond) as _, None, 2, 150);
        executor.run(Arc::clone(&ctx)).await;

        ctx.with_queue(|q| {
            assert!(q.all_completed());
            assert_eq!(q.peek_cursor().unwrap().state, TaskState::Completed);
        });

        let mut failed_orders = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::SegmentFailed { order, .. } = event {
                failed_orders.push(order);
            }
        }
        assert_eq!(failed_orders, vec![1]);
    }

    #[tokio::test]
    async fn cancellation_freezes_tasks() {
        struct Slow;

        #[async_trait]
        impl SpeechSynthesizer for Slow {
            async fn synthesize(
                &self,
                _text: &str,
                cancel: &CancellationToken,
            ) -> Result<Vec<u8>, EngineError> {
                tokio::select! {
                    () = cancel.cancelled() => Err(EngineError::Cancelled),
                    () = tokio::time::sleep(Duration::from_secs(30)) => Ok(vec![1]),
                }
            }
        }

        let (ctx, _rx) = context();
        ctx.with_queue(|q| {
            q.enqueue("a");
            q.enqueue("b");
            q.enqueue("c");
            q.close();
        });

        let executor = SynthesisExecutor::new(Arc::new(Slow) as _, None, 2, 150);
        let run = tokio::spawn(executor.run(Arc::clone(&ctx)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel.cancel();
        run.await.unwrap();

        // Nothing transitioned to a terminal state after cancellation.
        ctx.with_queue(|q| {
            assert!(!q.all_completed());
            assert_eq!(q.claim_next().unwrap().order, 2);
        });
    }

    #[tokio::test]
    async fn oversized_text_is_presplit_and_concatenated() {
        struct CountCalls(AtomicUsize);

        #[async_trait]
        impl SpeechSynthesizer for CountCalls {
            async fn synthesize(
                &self,
                text: &str,
                _cancel: &CancellationToken,
            ) -> Result<Vec<u8>, EngineError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(vec![u8::try_from(text.chars().count().min(255)).unwrap()])
            }
        }

        let (ctx, _rx) = context();
        let long = "word ".repeat(80); // 400 chars, budget 150 → 3 calls
        ctx.with_queue(|q| {
            q.enqueue(long.trim().to_string());
            q.close();
        });

        let counter = Arc::new(CountCalls(AtomicUsize::new(0)));
        let executor = SynthesisExecutor::new(Arc::clone(&counter) as _, None, 2, 150);
        executor.run(Arc::clone(&ctx)).await;

        assert!(counter.0.load(Ordering::SeqCst) >= 3);
        ctx.with_queue(|q| {
            let task = q.peek_playable().expect("task should be completed");
            // One payload, concatenated from every sub-call.
            match task.payload.as_ref().unwrap() {
                PlaybackPayload::Audio { bytes } => {
                    assert_eq!(bytes.len(), counter.0.load(Ordering::SeqCst));
                }
                PlaybackPayload::Video { .. } => panic!("expected audio payload"),
            }
        });
    }
}
