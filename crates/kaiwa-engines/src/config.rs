//! Engine endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-call timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Endpoints and per-call timeouts for the collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the OpenAI-compatible chat service.
    pub chat_url: String,

    /// Model name sent with chat requests.
    pub chat_model: String,

    /// Speech synthesis endpoint.
    pub synthesis_url: String,

    /// Voice identifier sent with synthesis requests.
    pub voice: Option<String>,

    /// Speech-to-text endpoint.
    pub transcribe_url: String,

    /// Frame generation endpoint (lip-sync mode only).
    pub frames_url: String,

    /// Per-call timeout in seconds. Applies to request setup and to each
    /// idle gap while reading a streaming body.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chat_url: "http://127.0.0.1:8080/v1/chat/completions".to_owned(),
            chat_model: "default".to_owned(),
            synthesis_url: "http://127.0.0.1:8081/synthesize".to_owned(),
            voice: None,
            transcribe_url: "http://127.0.0.1:8082/transcribe".to_owned(),
            frames_url: "http://127.0.0.1:8083/frames".to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// The per-call timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.chat_url.contains("chat/completions"));
    }
}
