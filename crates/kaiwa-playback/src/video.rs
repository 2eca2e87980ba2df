//! Lip-sync video sink.
//!
//! Plays a video payload: every encoded frame is decoded to a bitmap up
//! front (in bounded batches), frame 0 is presented before the audio
//! starts so the surface never shows an empty pose, and a tick loop keyed
//! off the audio clock presents whichever frame the clock implies until
//! the implied index reaches the frame count.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbaImage;
use tokio_util::sync::CancellationToken;

use kaiwa_core::{FrameSet, PlaybackError, PlaybackPayload, PlaybackSink};

use crate::audio::AudioPlayer;
use crate::surface::FrameSurface;

/// Frames decoded per blocking batch. Keeps decode work off the async
/// threads without parking one blocking thread per frame.
const DECODE_BATCH: usize = 8;

/// Fallback rate when the generator reported a non-positive fps.
const FALLBACK_FPS: f32 = 25.0;

/// Playback sink that drives a [`FrameSurface`] in sync with the audio.
pub struct LipSyncSink {
    audio: AudioPlayer,
    surface: Arc<dyn FrameSurface>,
    /// Token for the render loop of the payload currently playing;
    /// replaced at each `play`, cancelled by `stop`.
    render_cancel: Mutex<CancellationToken>,
}

impl LipSyncSink {
    /// Create a sink over an audio player and a presentation surface.
    #[must_use]
    pub fn new(audio: AudioPlayer, surface: Arc<dyn FrameSurface>) -> Self {
        Self {
            audio,
            surface,
            render_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replace the payload stop token. Tokens are single-shot, so each
    /// `play` gets its own; a cancelled token from an earlier stop must not
    /// leak into the next payload.
    fn fresh_cancel(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        *self.render_cancel.lock().unwrap() = fresh.clone();
        fresh
    }

    async fn play_video(&self, audio: Vec<u8>, frames: FrameSet) -> Result<(), PlaybackError> {
        let cancel = self.fresh_cancel();
        let fps = if frames.fps > 0.0 { frames.fps } else { FALLBACK_FPS };
        let bitmaps = decode_frames(frames, &cancel).await?;
        if bitmaps.is_empty() {
            tracing::debug!("video payload carried no frames — playing audio only");
            return self.audio_only(audio, &cancel).await;
        }

        // Opening frame before the audio clock starts.
        self.surface.present(&bitmaps[0]).await?;

        let done = self.audio.start(audio)?;
        let started = Instant::now();
        let total = bitmaps.len();
        let mut last_drawn = 0usize;

        let mut tick = tokio::time::interval(tick_period(fps));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.audio.stop();
                    return Err(PlaybackError::Stopped);
                }
                _ = tick.tick() => {}
            }

            let target = target_frame(started.elapsed(), fps);
            if target >= total {
                break;
            }
            if target != last_drawn {
                if let Err(e) = self.surface.present(&bitmaps[target]).await {
                    self.audio.stop();
                    return Err(e);
                }
                last_drawn = target;
            }
        }

        // The clock ran past the last frame; let the audio trail out.
        tokio::select! {
            () = cancel.cancelled() => {
                self.audio.stop();
                Err(PlaybackError::Stopped)
            }
            result = done => result
                .map_err(|_| PlaybackError::OutputStream("audio thread dropped playback".into()))?,
        }
    }

    async fn audio_only(&self, audio: Vec<u8>, cancel: &CancellationToken) -> Result<(), PlaybackError> {
        let done = self.audio.start(audio)?;
        tokio::select! {
            () = cancel.cancelled() => {
                self.audio.stop();
                Err(PlaybackError::Stopped)
            }
            result = done => result
                .map_err(|_| PlaybackError::OutputStream("audio thread dropped playback".into()))?,
        }
    }
}

#[async_trait]
impl PlaybackSink for LipSyncSink {
    async fn play(&self, payload: PlaybackPayload) -> Result<(), PlaybackError> {
        match payload {
            PlaybackPayload::Video { audio, frames } => self.play_video(audio, frames).await,
            PlaybackPayload::Audio { bytes } => {
                let cancel = self.fresh_cancel();
                self.audio_only(bytes, &cancel).await
            }
        }
    }

    fn stop(&self) {
        self.render_cancel.lock().unwrap().cancel();
        PlaybackSink::stop(&self.audio);
    }

    fn is_playing(&self) -> bool {
        self.audio.is_playing()
    }
}

/// Decode every encoded frame to an RGBA bitmap, in batches so a long
/// payload doesn't occupy a blocking thread per frame. Checks the stop
/// token between batches.
async fn decode_frames(
    frames: FrameSet,
    cancel: &CancellationToken,
) -> Result<Vec<RgbaImage>, PlaybackError> {
    let mut bitmaps = Vec::with_capacity(frames.frames.len());
    let mut encoded = frames.frames.into_iter().enumerate();

    loop {
        if cancel.is_cancelled() {
            return Err(PlaybackError::Stopped);
        }

        let batch: Vec<(usize, Vec<u8>)> = encoded.by_ref().take(DECODE_BATCH).collect();
        if batch.is_empty() {
            break;
        }

        let decoded = tokio::task::spawn_blocking(move || {
            batch
                .into_iter()
                .map(|(index, bytes)| {
                    image::load_from_memory(&bytes)
                        .map(|img| img.to_rgba8())
                        .map_err(|e| PlaybackError::FrameDecode {
                            index,
                            reason: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| PlaybackError::FrameDecode {
            index: bitmaps.len(),
            reason: format!("decode task aborted: {e}"),
        })??;

        bitmaps.extend(decoded);
    }

    Ok(bitmaps)
}

/// The frame index the audio clock implies.
fn target_frame(elapsed: Duration, fps: f32) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (elapsed.as_secs_f32() * fps) as usize
    }
}

/// Tick at twice the frame rate so a frame boundary is never missed by
/// more than half a frame.
fn tick_period(fps: f32) -> Duration {
    Duration::from_secs_f32((0.5 / fps).max(0.001))
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::ImageFormat;
    use std::io::Cursor;

    fn tiny_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn frame_set(frames: Vec<Vec<u8>>) -> FrameSet {
        FrameSet { fps: 25.0, width: 2, height: 2, frames }
    }

    #[tokio::test]
    async fn frames_decode_in_order() {
        let cancel = CancellationToken::new();
        let set = frame_set(vec![tiny_png(); 20]);

        let bitmaps = decode_frames(set, &cancel).await.unwrap();
        assert_eq!(bitmaps.len(), 20);
        assert_eq!(bitmaps[0].dimensions(), (2, 2));
    }

    #[tokio::test]
    async fn corrupt_frame_reports_its_index() {
        let cancel = CancellationToken::new();
        let set = frame_set(vec![tiny_png(), b"not a png".to_vec()]);

        let err = decode_frames(set, &cancel).await.unwrap_err();
        match err {
            PlaybackError::FrameDecode { index, .. } => assert_eq!(index, 1),
            other => panic!("expected FrameDecode, got {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_decode_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let set = frame_set(vec![tiny_png(); 4]);

        let err = decode_frames(set, &cancel).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Stopped));
    }

    #[test]
    fn audio_clock_maps_elapsed_time_to_frame_index() {
        assert_eq!(target_frame(Duration::ZERO, 25.0), 0);
        assert_eq!(target_frame(Duration::from_millis(39), 25.0), 0);
        assert_eq!(target_frame(Duration::from_millis(41), 25.0), 1);
        assert_eq!(target_frame(Duration::from_secs(1), 25.0), 25);
    }

    #[test]
    fn tick_period_is_half_a_frame() {
        let period = tick_period(25.0);
        assert!(period >= Duration::from_millis(19) && period <= Duration::from_millis(21));
        // Degenerate fps still yields a sane period.
        assert!(tick_period(10_000.0) >= Duration::from_millis(1));
    }
}
