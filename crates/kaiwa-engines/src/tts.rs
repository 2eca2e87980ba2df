//! Speech synthesis client.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kaiwa_core::{EngineError, SpeechSynthesizer};

use crate::config::EngineConfig;
use crate::http::send_with_guards;

/// HTTP speech synthesis collaborator: POST a text chunk, receive raw
/// audio bytes. Callers keep chunks within the configured character
/// budget, so one request maps to one bounded upstream synthesis.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    voice: Option<String>,
    timeout: std::time::Duration,
}

impl HttpSynthesizer {
    /// Create a client from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.synthesis_url.clone(),
            voice: config.voice.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        let body = json!({
            "text": text,
            "voice": self.voice,
        });

        let response =
            send_with_guards(self.client.post(&self.url).json(&body), self.timeout, cancel).await?;

        let bytes = tokio::select! {
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            body = tokio::time::timeout(self.timeout, response.bytes()) => match body {
                Err(_) => return Err(EngineError::Timeout(self.timeout)),
                Ok(Err(e)) => return Err(EngineError::Transport(anyhow::Error::new(e))),
                Ok(Ok(bytes)) => bytes,
            },
        };

        if bytes.is_empty() {
            return Err(EngineError::InvalidResponse(
                "synthesis returned an empty body".to_owned(),
            ));
        }

        tracing::debug!(text_len = text.len(), audio_len = bytes.len(), "synthesis call finished");
        Ok(bytes.to_vec())
    }
}
