//! Domain layer for the kaiwa conversational avatar pipeline.
//!
//! This crate holds the pure vocabulary shared by every other workspace
//! member: segment/task/payload types, the pipeline event enum, the
//! settings struct, the error taxonomy, and the port traits behind which
//! all external collaborators (chat stream, speech synthesis, speech-to-
//! text, frame generation, playback) live. No I/O happens here.

pub mod error;
pub mod events;
pub mod ports;
pub mod settings;
pub mod task;

// Re-export commonly used types for convenience
pub use error::{EngineError, PlaybackError};
pub use events::{PipelineEvent, PipelineState};
pub use ports::{ChatChunkFn, ChatStream, FrameGenerator, PlaybackSink, SpeechSynthesizer, Transcriber};
pub use settings::{
    DEFAULT_CONCURRENCY_LIMIT, DEFAULT_FLUSH_MAX_CHARS, DEFAULT_MIN_SENTENCE_CHARS,
    DEFAULT_SYNTHESIS_CHAR_BUDGET, PipelineConfig, PlaybackMode, default_abbreviations,
};
pub use task::{FrameSet, PlaybackPayload, Segment, SynthesisTask, TaskId, TaskState};
