//! Port traits for every external collaborator.
//!
//! The pipeline crate depends only on these traits; concrete HTTP clients
//! live in `kaiwa-engines` and concrete sinks in `kaiwa-playback`. Every
//! async operation takes the run's cancellation token and must check it at
//! each suspension point — an abort caused by the token surfaces as
//! [`EngineError::Cancelled`], never as a real failure.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, PlaybackError};
use crate::task::{FrameSet, PlaybackPayload};

/// Callback invoked with each incremental chunk of the streaming reply.
pub type ChatChunkFn<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Streaming chat collaborator.
#[async_trait]
pub trait ChatStream: Send + Sync {
    /// Stream a reply to `user_text`, invoking `on_chunk` for every
    /// incremental piece as it arrives. Returns the full reply text.
    ///
    /// An empty final reply is a stream-level failure
    /// ([`EngineError::EmptyStream`]).
    async fn stream_chat(
        &self,
        user_text: &str,
        on_chunk: ChatChunkFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError>;
}

/// Speech synthesis collaborator.
///
/// Callers guarantee `text` stays within the configured per-call character
/// budget; oversized segments are pre-split before reaching this trait.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one chunk of text into encoded audio bytes.
    async fn synthesize(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError>;
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe captured audio into text.
    async fn transcribe(
        &self,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, EngineError>;
}

/// Lip-sync frame generation collaborator.
///
/// The underlying stream delivers one metadata event, then per-frame events
/// in arbitrary index order, then a completion event; implementations buffer
/// sparsely and return the assembled dense [`FrameSet`].
#[async_trait]
pub trait FrameGenerator: Send + Sync {
    /// Generate the frame sequence for one synthesized audio payload.
    async fn generate(
        &self,
        face_id: &str,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<FrameSet, EngineError>;
}

/// Playback sink — plays one payload start to finish.
///
/// The sequencer serializes calls: a new `play` is never issued while a
/// previous one is unresolved. `stop` is idempotent and releases every
/// resource the sink holds (audio handles, decoded bitmaps, timers).
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play one payload to completion. Resolves when playback finishes,
    /// returns [`PlaybackError::Stopped`] if stopped mid-payload.
    async fn play(&self, payload: PlaybackPayload) -> Result<(), PlaybackError>;

    /// Stop any active playback immediately and release its resources.
    fn stop(&self);

    /// Whether a payload is currently playing.
    fn is_playing(&self) -> bool;
}
