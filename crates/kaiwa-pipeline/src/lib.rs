//! Ordered concurrent synthesis-and-playback pipeline.
//!
//! The core of kaiwa: an unordered, streaming sequence of reply text is
//! segmented into sentences, synthesized with bounded concurrency, and
//! played back strictly in sentence order — while an interrupt can cancel
//! everything in flight at any moment.
//!
//! ```text
//!   chat stream ──► segmenter ──► queue ──► executor (N parallel calls)
//!                                   │             │
//!                                   └── sequencer ◄┘ (strict order)
//!                                          │
//!                                        sink ──► drain signal
//! ```
//!
//! See [`controller::PipelineController`] for the entry point.

pub mod controller;
pub mod error;
pub mod executor;
pub mod queue;
pub mod segment;
pub mod sequencer;
pub mod turn;

pub use controller::{ControllerDeps, PipelineController};
pub use error::PipelineError;
pub use executor::SynthesisExecutor;
pub use queue::SynthesisQueue;
pub use segment::{Extraction, clean_markdown, extract, flush, split_for_budget};
pub use sequencer::PlaybackSequencer;
pub use turn::TurnContext;
