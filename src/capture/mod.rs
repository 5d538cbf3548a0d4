mod frame_buffer;
mod webcam;

pub use frame_buffer::FrameBuffer;
pub use webcam::{WebcamCapture, WebcamConfig};

use crate::error::Result;
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::watch;

/// Negotiated frame dimensions (width, height)
pub type Dimensions = (u32, u32);

/// Trait for camera capture sources
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Request video access and return a live stream
    ///
    /// Fails with `Error::MediaAccess` when the device cannot be opened.
    async fn acquire(&self) -> Result<Box<dyn StreamHandle>>;
}

/// Handle to a live camera stream
///
/// Owned by the lifecycle manager. Once `stop_tracks` has run the handle is
/// inactive and must not be read from again.
pub trait StreamHandle: Send {
    /// Receiver that holds `Some` once the stream has delivered a frame
    fn dimensions(&self) -> watch::Receiver<Option<Dimensions>>;

    /// The live frame at call time
    fn current_frame(&self) -> Result<Arc<RgbImage>>;

    /// Number of hardware tracks still running
    fn active_tracks(&self) -> usize;

    /// Stop every hardware track. Idempotent.
    fn stop_tracks(&mut self);

    fn is_active(&self) -> bool {
        self.active_tracks() > 0
    }
}
