//! Audio playback on a dedicated OS thread.
//!
//! `rodio::OutputStream` is `!Send` on some platforms, so the stream and
//! its sinks are confined to one thread and every operation is proxied
//! through a command channel. The public [`AudioPlayer`] is the
//! `Send + Sync` handle the sequencer holds.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::oneshot;

use kaiwa_core::{PlaybackError, PlaybackPayload, PlaybackSink};

/// A command sent from the async side to the audio thread.
enum AudioCommand {
    /// Decode and play one payload; `done` resolves at the end.
    Play {
        bytes: Vec<u8>,
        done: oneshot::Sender<Result<(), PlaybackError>>,
    },

    /// Stop any active playback immediately (fire-and-forget).
    Stop,

    /// Set playback volume (0.0 = muted, 1.0 = full).
    SetVolume(f32),

    /// Set playback speed multiplier (1.0 = normal).
    SetSpeed(f32),

    /// Shut down the audio thread, releasing all resources.
    Shutdown,
}

/// `Send + Sync` handle to the audio playback thread.
pub struct AudioPlayer {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
    playing: Arc<AtomicBool>,
}

impl AudioPlayer {
    /// Spawn the audio thread on the default output device.
    pub fn new() -> Result<Self, PlaybackError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), PlaybackError>>();
        let playing = Arc::new(AtomicBool::new(false));
        let playing_for_thread = Arc::clone(&playing);

        let thread = thread::Builder::new()
            .name("kaiwa-audio".into())
            .spawn(move || run_audio_thread(&cmd_rx, &init_tx, &playing_for_thread))
            .map_err(|e| {
                PlaybackError::OutputStream(format!("failed to spawn audio thread: {e}"))
            })?;

        // Wait for the audio thread to finish initialisation.
        init_rx
            .recv()
            .map_err(|_| PlaybackError::OutputStream("audio thread died during init".into()))??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
            playing,
        })
    }

    /// Start playing raw payload bytes. Returns a receiver that resolves
    /// when playback ends — `Ok` on natural completion, `Stopped` when
    /// interrupted. Used directly by the lip-sync sink, which needs the
    /// audio running while it drives its render loop.
    pub fn start(
        &self,
        bytes: Vec<u8>,
    ) -> Result<oneshot::Receiver<Result<(), PlaybackError>>, PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(AudioCommand::Play { bytes, done: done_tx })
            .map_err(|_| PlaybackError::OutputStream("audio thread is not running".into()))?;
        Ok(done_rx)
    }

    /// Set playback volume (clamped to 0.0–1.0).
    pub fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(AudioCommand::SetVolume(volume.clamp(0.0, 1.0)));
    }

    /// Set playback speed (floored at 0.1).
    pub fn set_speed(&self, speed: f32) {
        let _ = self.cmd_tx.send(AudioCommand::SetSpeed(speed.max(0.1)));
    }
}

#[async_trait]
impl PlaybackSink for AudioPlayer {
    async fn play(&self, payload: PlaybackPayload) -> Result<(), PlaybackError> {
        let bytes = match payload {
            PlaybackPayload::Audio { bytes } => bytes,
            PlaybackPayload::Video { audio, .. } => {
                tracing::debug!("video payload on audio-only sink — playing audio track");
                audio
            }
        };

        let done = self.start(bytes)?;
        done.await
            .map_err(|_| PlaybackError::OutputStream("audio thread dropped playback".into()))?
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(AudioCommand::Stop);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        // Best-effort shutdown — the thread may already be dead.
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Body of the audio thread. Owns the `rodio` output stream for its whole
/// lifetime — it never crosses a thread boundary.
fn run_audio_thread(
    cmd_rx: &mpsc::Receiver<AudioCommand>,
    init_tx: &mpsc::Sender<Result<(), PlaybackError>>,
    playing: &Arc<AtomicBool>,
) {
    let stream = OutputStream::try_default();
    let (_stream, handle) = match stream {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(PlaybackError::OutputStream(e.to_string())));
            return;
        }
    };
    if init_tx.send(Ok(())).is_err() {
        return;
    }
    tracing::info!("audio playback initialised on default output device");

    let mut current: Option<Arc<Sink>> = None;
    let mut volume = 1.0f32;
    let mut speed = 1.0f32;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            AudioCommand::Play { bytes, done } => {
                // One payload at a time — displace whatever is left.
                stop_current(&mut current, playing);

                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = done.send(Err(PlaybackError::OutputStream(e.to_string())));
                        continue;
                    }
                };

                let source = match Decoder::new(Cursor::new(bytes)) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = done.send(Err(PlaybackError::AudioDecode(e.to_string())));
                        continue;
                    }
                };

                sink.set_volume(volume);
                sink.set_speed(speed);
                sink.append(source);
                playing.store(true, Ordering::SeqCst);
                current = Some(Arc::clone(&sink));

                // Completion watcher: `sleep_until_end` returns when the
                // queue drains naturally or `stop()` drops the sources.
                let playing = Arc::clone(playing);
                thread::spawn(move || {
                    sink.sleep_until_end();
                    let natural = playing.swap(false, Ordering::SeqCst);
                    let _ = done.send(if natural {
                        Ok(())
                    } else {
                        Err(PlaybackError::Stopped)
                    });
                });
            }

            AudioCommand::Stop => {
                stop_current(&mut current, playing);
            }

            AudioCommand::SetVolume(v) => {
                volume = v;
                if let Some(ref sink) = current {
                    sink.set_volume(v);
                }
            }

            AudioCommand::SetSpeed(s) => {
                speed = s;
                if let Some(ref sink) = current {
                    sink.set_speed(s);
                }
            }

            AudioCommand::Shutdown => break,
        }
    }

    stop_current(&mut current, playing);
    tracing::debug!("audio thread shutting down");
}

fn stop_current(current: &mut Option<Arc<Sink>>, playing: &Arc<AtomicBool>) {
    if let Some(sink) = current.take() {
        playing.store(false, Ordering::SeqCst);
        sink.stop();
    }
}
