//! Speech-to-text client.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use kaiwa_core::{EngineError, Transcriber};

use crate::config::EngineConfig;
use crate::http::send_with_guards;

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// HTTP speech-to-text collaborator: POST captured audio bytes, receive
/// the recognized text. Utterance boundaries (VAD) are the upstream's
/// concern — this client only ever sees one complete utterance.
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    timeout: std::time::Duration,
}

impl HttpTranscriber {
    /// Create a client from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.transcribe_url.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec());

        let response = send_with_guards(request, self.timeout, cancel).await?;

        let parsed = tokio::select! {
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            body = tokio::time::timeout(self.timeout, response.json::<TranscribeResponse>()) => match body {
                Err(_) => return Err(EngineError::Timeout(self.timeout)),
                Ok(Err(e)) => {
                    return Err(EngineError::InvalidResponse(format!(
                        "transcription response was not valid JSON: {e}"
                    )));
                }
                Ok(Ok(parsed)) => parsed,
            },
        };

        tracing::debug!(text_len = parsed.text.len(), "transcription finished");
        Ok(parsed.text)
    }
}
