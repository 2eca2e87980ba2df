//! Error taxonomy shared across the workspace.
//!
//! Three kinds of failure flow through the pipeline and they are kept
//! distinct everywhere they are caught:
//!
//! - **segment-local** — one synthesis/frame-generation call failed; the
//!   owning task is marked failed and playback skips it,
//! - **stream-level** — the chat stream itself failed; the whole turn ends,
//! - **cancellation** — not a failure at all; a silent, logged return.

/// Errors produced by the external collaborator clients (chat stream,
/// speech synthesis, speech-to-text, frame generation).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The call was aborted through the run's cancellation token.
    ///
    /// Never treated as a real failure — callers match on this variant to
    /// return silently without mutating state.
    #[error("operation cancelled")]
    Cancelled,

    /// The per-call timeout elapsed before a response arrived.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport-level failure (connect, TLS, mid-stream disconnect).
    #[error("http transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// The collaborator answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The response arrived but could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The chat stream ended without producing any content.
    #[error("chat stream produced no content")]
    EmptyStream,
}

impl EngineError {
    /// Whether this error is a cancellation rather than a real failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors produced by the playback sinks.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// No audio output device / stream could be opened.
    #[error("failed to open audio output: {0}")]
    OutputStream(String),

    /// The payload's audio bytes could not be decoded.
    #[error("failed to decode audio: {0}")]
    AudioDecode(String),

    /// A frame's picture bytes could not be decoded.
    #[error("failed to decode frame {index}: {reason}")]
    FrameDecode {
        /// Index of the offending frame.
        index: usize,
        /// Decoder error text.
        reason: String,
    },

    /// The presentation surface rejected a frame.
    #[error("frame surface error: {0}")]
    Surface(String),

    /// Playback was stopped before the payload finished.
    #[error("playback stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinguished() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::EmptyStream.is_cancelled());
    }

    #[test]
    fn error_messages_render() {
        let e = EngineError::UpstreamStatus {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert!(e.to_string().contains("503"));

        let p = PlaybackError::FrameDecode {
            index: 7,
            reason: "truncated png".to_string(),
        };
        assert!(p.to_string().contains('7'));
    }
}
