//! Pipeline-level error types.

use kaiwa_core::EngineError;

/// Errors surfaced to the embedding layer by the pipeline controller.
///
/// Task-level synthesis failures never appear here — they become queue
/// state and are skipped during playback. Only stream-level and
/// resource-acquisition failures reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A turn is already in progress; interrupt it before starting another.
    #[error("a turn is already in progress")]
    TurnInProgress,

    /// Lip-sync mode was configured without a frame generator or face id.
    #[error("lip-sync mode requires a frame generator and a face id")]
    MissingFrameGenerator,

    /// No speech-to-text collaborator was configured.
    #[error("no transcriber configured — audio input is unavailable")]
    MissingTranscriber,

    /// Speech-to-text failed before any pipeline state was created.
    #[error("transcription failed: {0}")]
    Transcription(#[source] EngineError),

    /// The chat stream itself errored or returned empty — the whole turn
    /// ends; already-queued tasks are left to drain.
    #[error("chat stream failed: {0}")]
    ChatStream(#[source] EngineError),
}
