//! Pipeline controller — orchestrates one conversational turn.
//!
//! ```text
//!   Idle → Thinking → Speaking → Idle
//!    ▲                               │
//!    └───────────────────────────────┘
//!          (interrupt() from any state also returns to Idle)
//! ```
//!
//! A turn accepts user input, streams the reply through the sentence
//! segmenter into the ordered queue, runs the bounded executor and the
//! playback sequencer, and resolves `wait_for_drain` when everything has
//! been played — or immediately, when the turn is interrupted.
//!
//! Only one turn may run at a time; a new submission while the controller
//! is not idle is rejected. The interrupt path is the only way to end a
//! turn early: it cancels the shared scope (propagating to every in-flight
//! collaborator call), stops the sink, clears the queue, and resolves any
//! pending drain waiters.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use kaiwa_core::{
    ChatStream, EngineError, FrameGenerator, PipelineConfig, PipelineEvent, PipelineState,
    PlaybackMode, PlaybackSink, SpeechSynthesizer, Transcriber,
};

use crate::error::PipelineError;
use crate::executor::SynthesisExecutor;
use crate::segment;
use crate::sequencer::PlaybackSequencer;
use crate::turn::TurnContext;

/// External collaborators wired into a controller.
pub struct ControllerDeps {
    /// Streaming chat collaborator.
    pub chat: Arc<dyn ChatStream>,

    /// Speech synthesis collaborator.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,

    /// Playback sink (audio-only or lip-sync variant).
    pub sink: Arc<dyn PlaybackSink>,

    /// Speech-to-text collaborator; required only for `submit_audio`.
    pub transcriber: Option<Arc<dyn Transcriber>>,

    /// Frame generation collaborator; required only in lip-sync mode.
    pub frame_generator: Option<Arc<dyn FrameGenerator>>,
}

/// Handles for the turn currently in flight.
struct ActiveTurn {
    ctx: Arc<TurnContext>,
    drained_tx: watch::Sender<bool>,
}

/// The pipeline controller.
pub struct PipelineController {
    deps: ControllerDeps,
    config: PipelineConfig,
    event_tx: mpsc::UnboundedSender<PipelineEvent>,
    state: Arc<Mutex<PipelineState>>,
    turn: Arc<Mutex<Option<ActiveTurn>>>,
    /// Token for a pre-turn transcription call, so interrupt reaches it too.
    stt_cancel: Mutex<Option<CancellationToken>>,
}

impl PipelineController {
    /// Create a controller and the receiver for its event stream.
    #[must_use]
    pub fn new(
        deps: ControllerDeps,
        config: PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            deps,
            config,
            event_tx,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            turn: Arc::new(Mutex::new(None)),
            stt_cancel: Mutex::new(None),
        };

        (controller, event_rx)
    }

    /// Current turn state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    // ── Input ──────────────────────────────────────────────────────

    /// Run one turn from user text: stream the reply, synthesize each
    /// sentence, and play everything back in order.
    ///
    /// Resolves once the chat stream has ended and every sentence has been
    /// queued — playback may still be draining; use [`wait_for_drain`] to
    /// wait for it.
    ///
    /// [`wait_for_drain`]: Self::wait_for_drain
    pub async fn submit_text(&self, text: &str) -> Result<(), PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let ctx = self.begin_turn()?;
        tracing::info!(len = text.len(), mode = ?self.config.mode, "turn started");

        let mut remainder = String::new();
        let result = self.drive_chat(&ctx, text, &mut remainder).await;

        match result {
            Ok(reply) if reply.trim().is_empty() => {
                self.fail_turn(&ctx, &EngineError::EmptyStream);
                Err(PipelineError::ChatStream(EngineError::EmptyStream))
            }
            Ok(_) => {
                for chunk in segment::flush(&remainder, self.config.flush_max_chars) {
                    self.enqueue_sentence(&ctx, &chunk);
                }
                self.close_queue(&ctx);
                tracing::debug!("chat stream ended, queue closed");
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                // The interrupt path already reset everything.
                tracing::debug!("chat stream cancelled");
                Ok(())
            }
            Err(e) => {
                self.fail_turn(&ctx, &e);
                Err(PipelineError::ChatStream(e))
            }
        }
    }

    /// Run one turn from captured audio: transcribe first, then behave
    /// exactly like [`submit_text`].
    ///
    /// A transcription failure surfaces immediately — no pipeline state is
    /// created for it.
    ///
    /// [`submit_text`]: Self::submit_text
    pub async fn submit_audio(&self, audio: &[u8]) -> Result<(), PipelineError> {
        let transcriber = self
            .deps
            .transcriber
            .clone()
            .ok_or(PipelineError::MissingTranscriber)?;

        if self.state() != PipelineState::Idle {
            return Err(PipelineError::TurnInProgress);
        }

        let token = CancellationToken::new();
        *self.stt_cancel.lock().unwrap() = Some(token.clone());
        let result = transcriber.transcribe(audio, &token).await;
        *self.stt_cancel.lock().unwrap() = None;

        let text = match result {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => {
                tracing::debug!("transcription cancelled");
                return Ok(());
            }
            Err(e) => return Err(PipelineError::Transcription(e)),
        };

        if text.trim().is_empty() {
            tracing::debug!("transcription produced no text");
            return Ok(());
        }

        self.emit(PipelineEvent::Transcript { text: text.clone() });
        self.submit_text(&text).await
    }

    // ── Interrupt / drain ──────────────────────────────────────────

    /// Cancel the active turn from any state.
    ///
    /// Propagates to every in-flight collaborator call, stops the sink,
    /// clears the queue, and resolves pending [`wait_for_drain`] callers
    /// immediately. Idempotent — safe to call from both an unmount path
    /// and an explicit barge-in.
    ///
    /// [`wait_for_drain`]: Self::wait_for_drain
    pub fn interrupt(&self) {
        if let Some(token) = self.stt_cancel.lock().unwrap().take() {
            token.cancel();
        }

        let Some(turn) = self.turn.lock().unwrap().take() else {
            return;
        };

        tracing::info!("interrupting active turn");
        turn.ctx.cancel.cancel();
        self.deps.sink.stop();
        turn.ctx.with_queue(crate::queue::SynthesisQueue::reset);
        let _ = turn.drained_tx.send(true);

        transition_state(&self.state, &self.event_tx, PipelineState::Idle);
        self.emit(PipelineEvent::TurnInterrupted);
    }

    /// Resolve when the current turn has fully drained (natural completion
    /// or interrupt). Resolves immediately when no turn is active.
    pub async fn wait_for_drain(&self) {
        let rx = self
            .turn
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.drained_tx.subscribe());

        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|drained| *drained).await;
        }
    }

    // ── Turn lifecycle ─────────────────────────────────────────────

    /// Accept a new turn: guard against overlap, reset state, and spawn
    /// the executor / sequencer / drain watcher for a fresh context.
    fn begin_turn(&self) -> Result<Arc<TurnContext>, PipelineError> {
        let frame_generator = match self.config.mode {
            PlaybackMode::Audio => None,
            PlaybackMode::LipSync => {
                let generator = self
                    .deps
                    .frame_generator
                    .clone()
                    .ok_or(PipelineError::MissingFrameGenerator)?;
                let face_id = self
                    .config
                    .face_id
                    .clone()
                    .ok_or(PipelineError::MissingFrameGenerator)?;
                Some((generator, face_id))
            }
        };

        // Guard and transition under one lock so two concurrent submissions
        // cannot both observe Idle.
        {
            let mut state = self.state.lock().unwrap();
            if *state != PipelineState::Idle {
                return Err(PipelineError::TurnInProgress);
            }
            *state = PipelineState::Thinking;
        }
        self.emit(PipelineEvent::StateChanged {
            state: PipelineState::Thinking,
        });

        // A previous turn may still be draining after a stream-level error;
        // two turns must never overlap at the sink, so tear it down first.
        if let Some(old) = self.turn.lock().unwrap().take() {
            tracing::debug!("tearing down previous turn still draining");
            old.ctx.cancel.cancel();
            self.deps.sink.stop();
            old.ctx.with_queue(crate::queue::SynthesisQueue::reset);
            let _ = old.drained_tx.send(true);
        }

        let ctx = Arc::new(TurnContext::new(self.event_tx.clone()));
        let (drained_tx, drained_rx) = watch::channel(false);

        let executor = SynthesisExecutor::new(
            Arc::clone(&self.deps.synthesizer),
            frame_generator,
            self.config.effective_concurrency(),
            self.config.synthesis_char_budget,
        );
        tokio::spawn(executor.run(Arc::clone(&ctx)));

        let sequencer = PlaybackSequencer::new(
            Arc::clone(&self.deps.sink),
            Some(self.speaking_hook()),
        );
        tokio::spawn(sequencer.run(Arc::clone(&ctx), drained_tx.clone()));

        self.spawn_drain_watcher(Arc::clone(&ctx), drained_rx);

        *self.turn.lock().unwrap() = Some(ActiveTurn {
            ctx: Arc::clone(&ctx),
            drained_tx,
        });

        Ok(ctx)
    }

    /// Stream the reply into the segmenter, enqueuing each completed
    /// sentence. Returns the full reply text; `remainder` receives the
    /// unterminated tail for the caller to flush.
    async fn drive_chat(
        &self,
        ctx: &Arc<TurnContext>,
        user_text: &str,
        remainder: &mut String,
    ) -> Result<String, EngineError> {
        let min_chars = self.config.min_sentence_chars;
        let abbreviations = self.config.abbreviations.clone();
        let mut buffer = String::new();

        let mut on_chunk = |chunk: &str| {
            buffer.push_str(chunk);
            let extraction = segment::extract(&buffer, min_chars, &abbreviations);
            buffer = extraction.remainder;
            for sentence in extraction.sentences {
                self.enqueue_sentence(ctx, &sentence);
            }
        };

        let reply = self
            .deps
            .chat
            .stream_chat(user_text, &mut on_chunk, &ctx.cancel)
            .await?;

        *remainder = buffer;
        Ok(reply)
    }

    /// Clean one sentence and append it to the queue.
    fn enqueue_sentence(&self, ctx: &TurnContext, raw: &str) {
        let cleaned = segment::clean_markdown(raw);
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return;
        }

        let order = ctx.with_queue(|q| q.enqueue(cleaned).0);
        tracing::debug!(order, len = cleaned.len(), "sentence queued");
        ctx.emit(PipelineEvent::SentenceQueued {
            order,
            text: cleaned.to_string(),
        });
        ctx.work.notify_one();

        // Audio mode speaks as soon as the first sentence is queued; in
        // lip-sync mode the transition waits for the sequencer's first-play
        // hook so a talking pose never appears before there is a frame.
        if self.config.mode == PlaybackMode::Audio {
            transition_state(&self.state, &self.event_tx, PipelineState::Speaking);
        }
    }

    /// Mark the queue complete for this turn and wake both loops.
    fn close_queue(&self, ctx: &TurnContext) {
        ctx.with_queue(crate::queue::SynthesisQueue::close);
        ctx.work.notify_one();
        ctx.ready.notify_one();
    }

    /// Stream-level failure: report it, return to idle, and let whatever
    /// is already queued drain normally.
    fn fail_turn(&self, ctx: &TurnContext, error: &EngineError) {
        tracing::warn!(error = %error, "chat stream failed");
        self.close_queue(ctx);
        self.emit(PipelineEvent::Error {
            message: error.to_string(),
        });
        transition_state(&self.state, &self.event_tx, PipelineState::Error);
        transition_state(&self.state, &self.event_tx, PipelineState::Idle);
    }

    /// The thinking → speaking hook handed to the sequencer.
    fn speaking_hook(&self) -> Box<dyn FnOnce() + Send> {
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        Box::new(move || {
            transition_state(&state, &event_tx, PipelineState::Speaking);
        })
    }

    /// Watch for natural drain: flip to idle, clear the turn slot, and
    /// emit completion. The interrupt path is recognised by its cancelled
    /// token and handled there instead.
    fn spawn_drain_watcher(&self, ctx: Arc<TurnContext>, mut drained_rx: watch::Receiver<bool>) {
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let turn_slot = Arc::clone(&self.turn);

        tokio::spawn(async move {
            if drained_rx.wait_for(|drained| *drained).await.is_err() {
                return;
            }
            if ctx.cancel.is_cancelled() {
                return;
            }

            {
                let mut slot = turn_slot.lock().unwrap();
                if slot.as_ref().is_some_and(|t| Arc::ptr_eq(&t.ctx, &ctx)) {
                    *slot = None;
                }
            }

            tracing::info!("turn completed");
            transition_state(&state, &event_tx, PipelineState::Idle);
            if event_tx.send(PipelineEvent::TurnCompleted).is_err() {
                tracing::warn!("pipeline event receiver dropped");
            }
        });
    }

    /// Emit an event (best-effort — a dropped receiver is logged and ignored).
    fn emit(&self, event: PipelineEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::warn!("pipeline event receiver dropped");
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.interrupt();
    }
}

/// Transition the shared state, emitting a change event only on an actual
/// change. The speaking transition is only taken from `Thinking` — a
/// late first-play hook must not drag an interrupted (idle) turn back to
/// speaking.
fn transition_state(
    state: &Mutex<PipelineState>,
    event_tx: &mpsc::UnboundedSender<PipelineEvent>,
    new_state: PipelineState,
) {
    {
        let mut current = state.lock().unwrap();
        if *current == new_state {
            return;
        }
        if new_state == PipelineState::Speaking && *current != PipelineState::Thinking {
            return;
        }
        tracing::debug!(old = ?*current, new = ?new_state, "pipeline state transition");
        *current = new_state;
    }
    let _ = event_tx.send(PipelineEvent::StateChanged { state: new_state });
}
