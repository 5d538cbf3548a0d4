use image::{imageops, RgbImage};
use ndarray::Array4;

/// Memory layout the model expects for its input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// [1, height, width, 3], what converted Keras/TF.js models use
    #[default]
    Nhwc,
    /// [1, 3, height, width]
    Nchw,
}

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    size: u32,
    layout: TensorLayout,
}

impl Preprocessor {
    pub fn new(size: u32, layout: TensorLayout) -> Self {
        Self { size, layout }
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Crop the centre square
    /// 2. Resize to the model's input size
    /// 3. Normalize to [-1, 1]
    /// 4. Lay out as NHWC or NCHW
    ///
    /// Returns the tensor shape and its data in standard order
    pub fn preprocess(&self, image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = image.dimensions();
        let side = width.min(height);
        let square =
            imageops::crop_imm(image, (width - side) / 2, (height - side) / 2, side, side)
                .to_image();

        let resized = if side != self.size {
            imageops::resize(
                &square,
                self.size,
                self.size,
                imageops::FilterType::Triangle,
            )
        } else {
            square
        };

        let size = self.size as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 127.5 - 1.0;
            }
        }

        match self.layout {
            TensorLayout::Nhwc => ([1, size, size, 3], tensor.into_raw_vec()),
            TensorLayout::Nchw => {
                let nchw = tensor.permuted_axes([0, 3, 1, 2]);
                (
                    [1, 3, size, size],
                    nchw.as_standard_layout().into_owned().into_raw_vec(),
                )
            }
        }
    }
}

/// Turn raw model output into probabilities
///
/// Scores already in [0, 1] are taken as probabilities; anything else is
/// treated as logits and soft-maxed. NaN and infinite scores count as 0.
pub fn to_probabilities(scores: &[f32]) -> Vec<f32> {
    let scores: Vec<f32> = scores
        .iter()
        .map(|s| if s.is_finite() { *s } else { 0.0 })
        .collect();
    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        return scores;
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| (e / sum).clamp(0.0, 1.0)).collect()
}
