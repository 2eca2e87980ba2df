//! Streaming chat client (OpenAI-style SSE).
//!
//! The upstream streams Server-Sent Events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"hi"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Chunks are buffered and split on newlines as they arrive; every content
//! delta is forwarded to the pipeline's chunk callback immediately.

use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kaiwa_core::{ChatChunkFn, ChatStream, EngineError};

use crate::config::EngineConfig;
use crate::http::{find_newline, next_chunk, send_with_guards};

/// OpenAI-compatible streaming chat collaborator.
pub struct HttpChatStream {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: std::time::Duration,
}

impl HttpChatStream {
    /// Create a client from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.chat_url.clone(),
            model: config.chat_model.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl ChatStream for HttpChatStream {
    async fn stream_chat(
        &self,
        user_text: &str,
        on_chunk: ChatChunkFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [{ "role": "user", "content": user_text }],
        });

        let response =
            send_with_guards(self.client.post(&self.url).json(&body), self.timeout, cancel).await?;

        let mut stream = response.bytes_stream();
        let mut buf = BytesMut::new();
        let mut full = String::new();
        let mut done = false;

        while !done {
            // Drain every complete SSE line already buffered.
            while let Some(line_end) = find_newline(&buf) {
                let line = buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line);
                let trimmed = line.trim();

                // Skip empty lines and SSE comments.
                if trimmed.is_empty() || trimmed.starts_with(':') {
                    continue;
                }

                let Some(data) = trimmed.strip_prefix("data: ") else {
                    continue;
                };
                let data = data.trim();

                if data == "[DONE]" {
                    done = true;
                    break;
                }

                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(value) => {
                        if let Some(content) =
                            value["choices"][0]["delta"]["content"].as_str()
                        {
                            if !content.is_empty() {
                                full.push_str(content);
                                on_chunk(content);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed SSE chunk");
                    }
                }
            }
            if done {
                break;
            }

            match next_chunk(&mut stream, self.timeout, cancel).await? {
                Some(bytes) => buf.extend_from_slice(&bytes),
                None => break, // stream ended without [DONE]
            }
        }

        if full.trim().is_empty() {
            return Err(EngineError::EmptyStream);
        }

        tracing::debug!(reply_len = full.len(), "chat stream finished");
        Ok(full)
    }
}
