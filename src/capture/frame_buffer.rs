use super::Dimensions;
use image::{imageops, RgbImage};

/// Offscreen bitmap the classifier reads from
///
/// Sized once, either up front from the negotiated camera dimensions or from
/// the first snapshot. Later snapshots overwrite the same allocation.
pub struct FrameBuffer {
    bitmap: Option<RgbImage>,
    mirror: bool,
}

impl FrameBuffer {
    pub fn new(mirror: bool) -> Self {
        Self {
            bitmap: None,
            mirror,
        }
    }

    pub fn with_dimensions((width, height): Dimensions, mirror: bool) -> Self {
        Self {
            bitmap: Some(RgbImage::new(width, height)),
            mirror,
        }
    }

    /// Copy `frame` into the buffer and return the buffered bitmap
    pub fn snapshot(&mut self, frame: &RgbImage) -> &RgbImage {
        let bitmap = self
            .bitmap
            .get_or_insert_with(|| RgbImage::new(frame.width(), frame.height()));

        if bitmap.dimensions() == frame.dimensions() {
            bitmap.copy_from_slice(frame.as_raw());
        } else {
            // Camera changed resolution mid-stream; keep the negotiated size
            let scaled = imageops::resize(
                frame,
                bitmap.width(),
                bitmap.height(),
                imageops::FilterType::Triangle,
            );
            bitmap.copy_from_slice(scaled.as_raw());
        }

        if self.mirror {
            imageops::flip_horizontal_in_place(&mut *bitmap);
        }

        bitmap
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.bitmap.as_ref().map(|b| b.dimensions())
    }
}
