mod metadata;
mod onnx;
mod preprocess;

pub use metadata::ModelMetadata;
pub use onnx::{OnnxClassifier, OnnxLoader};
pub use preprocess::{Preprocessor, TensorLayout};

use crate::error::Result;
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Score for one class
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Probability in [0, 1]
    pub probability: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// One prediction per class, in model label order
///
/// Shared and immutable once built, so it can be swapped in as a whole.
pub type PredictionSet = Arc<[Prediction]>;

/// Files a classifier is loaded from
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub model: PathBuf,
    pub metadata: PathBuf,
}

impl ModelDescriptor {
    /// `model.onnx` and `metadata.json` inside an exported model directory
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            model: dir.join("model.onnx"),
            metadata: dir.join("metadata.json"),
        }
    }
}

/// Trait for image classifiers
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Number of classes; every prediction set has exactly this length
    fn total_classes(&self) -> usize;

    /// Score a bitmap
    async fn predict(&self, bitmap: &RgbImage) -> Result<PredictionSet>;
}

/// Trait for loading classifiers
#[async_trait]
pub trait ClassifierLoader: Send + Sync {
    /// Fails with `Error::ModelLoad`
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_dir() {
        let descriptor = ModelDescriptor::from_dir("./my_model/");
        assert_eq!(descriptor.model, PathBuf::from("./my_model/model.onnx"));
        assert_eq!(descriptor.metadata, PathBuf::from("./my_model/metadata.json"));
    }
}
