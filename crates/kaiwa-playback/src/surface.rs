//! Presentation surface for the lip-sync sink.

use async_trait::async_trait;
use image::RgbaImage;

use kaiwa_core::PlaybackError;

/// The one drawing primitive the pipeline needs: render one decoded
/// picture, then signal ready.
///
/// The embedding application implements this over whatever it draws with
/// (a canvas, a texture upload, a window blit). `present` resolves when
/// the frame is on screen; the render loop never gets ahead of it.
#[async_trait]
pub trait FrameSurface: Send + Sync {
    /// Display one frame.
    async fn present(&self, frame: &RgbaImage) -> Result<(), PlaybackError>;
}
