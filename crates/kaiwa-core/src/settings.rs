//! Pipeline configuration.
//!
//! The thresholds here (minimum sentence length, per-call character budget)
//! are tuned for mixed Chinese/English text; other languages may want
//! different values, which is why they are configuration rather than
//! constants buried in the segmenter.

use serde::{Deserialize, Serialize};

/// Default minimum trimmed length (in characters) for a run of text to be
/// emitted as its own sentence; shorter runs merge forward.
pub const DEFAULT_MIN_SENTENCE_CHARS: usize = 8;

/// Default per-synthesis-call character budget. Longer segments are
/// pre-split by the executor and their audio concatenated into one payload.
pub const DEFAULT_SYNTHESIS_CHAR_BUDGET: usize = 150;

/// Default maximum chunk length used when hard-splitting the leftover tail
/// at stream end.
pub const DEFAULT_FLUSH_MAX_CHARS: usize = 100;

/// Default number of synthesis calls allowed in flight at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 2;

/// Abbreviations whose trailing period never terminates a sentence.
#[must_use]
pub fn default_abbreviations() -> Vec<String> {
    ["Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "St.", "etc.", "e.g.", "i.e.", "vs."]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Which playback sink variant a turn drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Audio-only playback.
    #[default]
    Audio,

    /// Lip-synced video: frame generation runs per segment and the sink
    /// drives a render loop from the audio clock.
    LipSync,
}

/// Configuration for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Playback mode (audio-only or lip-synced video).
    pub mode: PlaybackMode,

    /// Minimum trimmed sentence length; shorter runs merge forward.
    pub min_sentence_chars: usize,

    /// Per-synthesis-call character budget.
    pub synthesis_char_budget: usize,

    /// Maximum chunk length for the stream-end flush.
    pub flush_max_chars: usize,

    /// Bound on concurrent synthesis calls.
    pub concurrency_limit: usize,

    /// Abbreviation suffixes treated as non-terminating.
    pub abbreviations: Vec<String>,

    /// Face reference identifier handed to the frame generator
    /// (lip-sync mode only).
    pub face_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Audio,
            min_sentence_chars: DEFAULT_MIN_SENTENCE_CHARS,
            synthesis_char_budget: DEFAULT_SYNTHESIS_CHAR_BUDGET,
            flush_max_chars: DEFAULT_FLUSH_MAX_CHARS,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            abbreviations: default_abbreviations(),
            face_id: None,
        }
    }
}

impl PipelineConfig {
    /// Effective concurrency limit — never zero, whatever the input said.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_limit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_sentence_chars, 8);
        assert_eq!(config.synthesis_char_budget, 150);
        assert_eq!(config.concurrency_limit, 2);
        assert_eq!(config.mode, PlaybackMode::Audio);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = PipelineConfig {
            concurrency_limit: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn config_roundtrips_through_json_with_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.min_sentence_chars, DEFAULT_MIN_SENTENCE_CHARS);
        assert!(config.abbreviations.iter().any(|a| a == "Dr."));
    }
}
