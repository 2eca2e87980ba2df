//! Lip-sync frame generation client.
//!
//! The upstream streams newline-delimited JSON events:
//!
//! ```text
//! {"event":"meta","frame_count":75,"fps":25.0,"width":256,"height":256}
//! {"event":"frame","index":3,"data":"<base64 picture>"}
//! {"event":"frame","index":0,"data":"<base64 picture>"}
//! {"event":"done"}
//! ```
//!
//! Frames may arrive in any index order; they are buffered sparsely and
//! assembled into a dense [`FrameSet`] once the `done` event lands. A
//! missing frame at that point fails the whole call — the owning task
//! becomes a failed queue entry, exactly like a synthesis failure.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kaiwa_core::{EngineError, FrameGenerator, FrameSet};

use crate::config::EngineConfig;
use crate::http::{find_newline, next_chunk, send_with_guards};

/// One event of the frame generation stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum FrameEvent {
    Meta {
        frame_count: usize,
        fps: f32,
        width: u32,
        height: u32,
    },
    Frame {
        index: usize,
        data: String,
    },
    Done,
    Error {
        message: String,
    },
}

/// HTTP frame generation collaborator.
pub struct HttpFrameGenerator {
    client: reqwest::Client,
    url: String,
    timeout: std::time::Duration,
}

impl HttpFrameGenerator {
    /// Create a client from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.frames_url.clone(),
            timeout: config.timeout(),
        }
    }
}

/// Sparse-to-dense frame assembly state.
#[derive(Default)]
struct FrameBuffer {
    meta: Option<(f32, u32, u32)>,
    /// Sparse by index; sized on the meta event.
    slots: Vec<Option<Vec<u8>>>,
}

impl FrameBuffer {
    fn apply(&mut self, event: FrameEvent) -> Result<bool, EngineError> {
        match event {
            FrameEvent::Meta { frame_count, fps, width, height } => {
                self.meta = Some((fps, width, height));
                self.slots = vec![None; frame_count];
                Ok(false)
            }
            FrameEvent::Frame { index, data } => {
                let decoded = BASE64.decode(data).map_err(|e| {
                    EngineError::InvalidResponse(format!("frame {index} is not valid base64: {e}"))
                })?;
                match self.slots.get_mut(index) {
                    Some(slot) => {
                        *slot = Some(decoded);
                        Ok(false)
                    }
                    None => Err(EngineError::InvalidResponse(format!(
                        "frame index {index} out of range (count {})",
                        self.slots.len()
                    ))),
                }
            }
            FrameEvent::Done => Ok(true),
            FrameEvent::Error { message } => Err(EngineError::InvalidResponse(format!(
                "frame generation reported: {message}"
            ))),
        }
    }

    fn finish(self) -> Result<FrameSet, EngineError> {
        let Some((fps, width, height)) = self.meta else {
            return Err(EngineError::InvalidResponse(
                "frame stream ended without a meta event".to_owned(),
            ));
        };

        let total = self.slots.len();
        let frames: Vec<Vec<u8>> = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    EngineError::InvalidResponse(format!("frame {i} of {total} never arrived"))
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(FrameSet { fps, width, height, frames })
    }
}

#[async_trait]
impl FrameGenerator for HttpFrameGenerator {
    async fn generate(
        &self,
        face_id: &str,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<FrameSet, EngineError> {
        let body = json!({
            "face_id": face_id,
            "audio": BASE64.encode(audio),
        });

        let response =
            send_with_guards(self.client.post(&self.url).json(&body), self.timeout, cancel).await?;

        let mut stream = response.bytes_stream();
        let mut buf = BytesMut::new();
        let mut frames = FrameBuffer::default();
        let mut done = false;

        while !done {
            while let Some(line_end) = find_newline(&buf) {
                let line = buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let event: FrameEvent = serde_json::from_str(trimmed).map_err(|e| {
                    EngineError::InvalidResponse(format!("malformed frame event: {e}"))
                })?;
                if frames.apply(event)? {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }

            match next_chunk(&mut stream, self.timeout, cancel).await? {
                Some(bytes) => buf.extend_from_slice(&bytes),
                None => {
                    return Err(EngineError::InvalidResponse(
                        "frame stream ended before the done event".to_owned(),
                    ));
                }
            }
        }

        let set = frames.finish()?;
        tracing::debug!(
            frames = set.frame_count(),
            fps = set.fps,
            "frame generation finished"
        );
        Ok(set)
    }
}
