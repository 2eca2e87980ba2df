//! Events emitted by the pipeline to the embedding application.
//!
//! The controller publishes these over an unbounded channel; the embedding
//! layer bridges them to whatever transport it uses (SSE, websocket, UI
//! callbacks). Sends are best-effort — a dropped receiver is logged and
//! ignored, never an error.

use serde::{Deserialize, Serialize};

/// Current state of a pipeline turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No turn in progress.
    Idle,

    /// Input accepted; waiting for the first playable output.
    Thinking,

    /// Output is being synthesized and played.
    Speaking,

    /// The turn ended with a stream-level failure.
    Error,
}

impl PipelineState {
    /// Stable label used in event payloads and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

/// Events emitted by the pipeline controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// The turn state changed.
    StateChanged {
        /// The new state.
        state: PipelineState,
    },

    /// A transcript was produced from submitted audio.
    Transcript {
        /// The transcribed text.
        text: String,
    },

    /// A sentence was segmented out of the reply stream and queued.
    SentenceQueued {
        /// Emission order assigned to the sentence.
        order: u64,
        /// The sentence text.
        text: String,
    },

    /// A segment's synthesis failed; playback will skip it.
    SegmentFailed {
        /// Emission order of the failed segment.
        order: u64,
        /// Error detail.
        error: String,
    },

    /// Playback of one segment started.
    PlaybackStarted {
        /// Emission order of the playing segment.
        order: u64,
    },

    /// Playback of one segment finished.
    PlaybackFinished {
        /// Emission order of the finished segment.
        order: u64,
    },

    /// The turn drained naturally (all tasks terminal, sink idle).
    TurnCompleted,

    /// The turn was interrupted before draining.
    TurnInterrupted,

    /// A stream-level error ended the turn.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(PipelineState::Idle.label(), "idle");
        assert_eq!(PipelineState::Thinking.label(), "thinking");
        assert_eq!(PipelineState::Speaking.label(), "speaking");
        assert_eq!(PipelineState::Error.label(), "error");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PipelineEvent::SentenceQueued {
            order: 3,
            text: "你好。".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"sentenceQueued\""));
        assert!(json.contains("\"order\":3"));
    }
}
