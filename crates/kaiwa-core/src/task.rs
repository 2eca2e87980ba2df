//! Segment, task, and payload types — the units of work that flow through
//! the ordered synthesis queue.

use serde::{Deserialize, Serialize};

/// A contiguous run of source text identified as one playable unit.
///
/// Created by the sentence segmenter when a boundary is confirmed (or by a
/// forced flush at stream end), consumed exactly once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Emission order, assigned at enqueue. Strictly increasing, never reused.
    pub order: u64,

    /// The raw sentence text.
    pub text: String,
}

/// Identifier for a queued synthesis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a synthesis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Queued, not yet claimed by the executor.
    Pending,

    /// Claimed — a synthesis call is in flight.
    Processing,

    /// Synthesis finished; the payload is ready for playback.
    Completed,

    /// Synthesis failed; the task occupies its order slot until skipped.
    Failed,
}

impl TaskState {
    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A decoded-on-arrival frame sequence for lip-synced playback.
///
/// Frames are dense: index `i` of `frames` is frame number `i`. The frame
/// generation collaborator may deliver frames out of order; the engine
/// client assembles this dense form before the task completes.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    /// Playback rate in frames per second.
    pub fps: f32,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Encoded picture bytes, one entry per frame, in frame order.
    pub frames: Vec<Vec<u8>>,
}

impl FrameSet {
    /// Total number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// A ready-to-play payload derived from a completed task.
///
/// Owned exclusively by the playback sink while playing; every underlying
/// resource is released on completion or stop.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackPayload {
    /// Synthesized audio only.
    Audio {
        /// Encoded audio bytes as returned by the synthesis collaborator.
        bytes: Vec<u8>,
    },

    /// Synthesized audio plus a lip-synced picture sequence.
    Video {
        /// Encoded audio bytes.
        audio: Vec<u8>,
        /// The frame sequence to drive from the audio clock.
        frames: FrameSet,
    },
}

impl PlaybackPayload {
    /// The audio bytes of either variant.
    #[must_use]
    pub fn audio_bytes(&self) -> &[u8] {
        match self {
            Self::Audio { bytes } => bytes,
            Self::Video { audio, .. } => audio,
        }
    }
}

/// The queue's unit of work, one per [`Segment`].
///
/// Mutated only through the queue's transition operation; never removed
/// individually — the whole queue is cleared atomically on reset.
#[derive(Debug, Clone)]
pub struct SynthesisTask {
    /// Unique identifier.
    pub id: TaskId,

    /// Emission order (equals the segment's order).
    pub order: u64,

    /// Source text handed to the synthesis collaborator.
    pub text: String,

    /// Current lifecycle state.
    pub state: TaskState,

    /// Result payload — present iff `state == Completed`.
    pub payload: Option<PlaybackPayload>,

    /// Error detail — present iff `state == Failed`.
    pub error: Option<String>,
}

impl SynthesisTask {
    /// Create a fresh pending task.
    #[must_use]
    pub const fn new(id: TaskId, order: u64, text: String) -> Self {
        Self {
            id,
            order,
            text,
            state: TaskState::Pending,
            payload: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending() {
        let task = SynthesisTask::new(TaskId(0), 0, "hello".to_string());
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.payload.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
    }

    #[test]
    fn payload_audio_bytes_for_both_variants() {
        let audio = PlaybackPayload::Audio { bytes: vec![1, 2, 3] };
        assert_eq!(audio.audio_bytes(), &[1, 2, 3]);

        let video = PlaybackPayload::Video {
            audio: vec![4, 5],
            frames: FrameSet {
                fps: 25.0,
                width: 256,
                height: 256,
                frames: vec![vec![0]],
            },
        };
        assert_eq!(video.audio_bytes(), &[4, 5]);
    }
}
