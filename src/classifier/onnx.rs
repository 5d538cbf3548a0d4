use super::metadata::ModelMetadata;
use super::preprocess::{to_probabilities, Preprocessor, TensorLayout};
use super::{Classifier, ClassifierLoader, ModelDescriptor, Prediction, PredictionSet};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Image classifier running an exported ONNX model
///
/// The session runs on the blocking pool so a slow model never stalls the
/// async side of the pipeline.
pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    preprocessor: Preprocessor,
    labels: Arc<[String]>,
}

impl OnnxClassifier {
    /// Load the ONNX model and its metadata
    ///
    /// # Arguments
    /// * `descriptor` - Paths to `model.onnx` and `metadata.json`
    /// * `layout` - Input tensor layout the model was exported with
    /// * `intra_threads` - ONNX Runtime intra-op thread count
    pub fn new(
        descriptor: &ModelDescriptor,
        layout: TensorLayout,
        intra_threads: usize,
    ) -> Result<Self> {
        let metadata = ModelMetadata::load(&descriptor.metadata).map_err(Error::model)?;
        let session = build_session(&descriptor.model, intra_threads)?;

        tracing::info!(
            "Model {} loaded: {} classes, {}x{} input",
            metadata.model_name.as_deref().unwrap_or("<unnamed>"),
            metadata.total_classes(),
            metadata.image_size,
            metadata.image_size
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            preprocessor: Preprocessor::new(metadata.image_size, layout),
            labels: metadata.labels.into(),
        })
    }
}

fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    if !path.exists() {
        return Err(Error::ModelLoad(format!(
            "model file {} not found",
            path.display()
        )));
    }

    tracing::info!("Loading ONNX model from {}", path.display());

    Session::builder()
        .map_err(Error::model)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(Error::model)?
        .with_intra_threads(intra_threads)
        .map_err(Error::model)?
        .commit_from_file(path)
        .map_err(|e| Error::ModelLoad(format!("{}: {}", path.display(), e)))
}

fn run_session(session: &Mutex<Session>, shape: [usize; 4], data: Vec<f32>) -> Result<Vec<f32>> {
    let _span = tracing::debug_span!("inference").entered();

    let input = Tensor::from_array((shape, data)).map_err(Error::inference)?;
    let mut session = session.lock();
    let outputs = session
        .run(ort::inputs![input])
        .map_err(Error::inference)?;

    let (_, scores) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(Error::inference)?;

    Ok(scores.to_vec())
}

#[async_trait]
impl Classifier for OnnxClassifier {
    fn total_classes(&self) -> usize {
        self.labels.len()
    }

    async fn predict(&self, bitmap: &RgbImage) -> Result<PredictionSet> {
        let (shape, data) = self.preprocessor.preprocess(bitmap);

        let session = self.session.clone();
        let scores = tokio::task::spawn_blocking(move || run_session(&session, shape, data))
            .await
            .map_err(Error::inference)??;

        if scores.len() != self.labels.len() {
            return Err(Error::Inference(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            )));
        }

        Ok(self
            .labels
            .iter()
            .zip(to_probabilities(&scores))
            .map(|(label, probability)| Prediction::new(label.clone(), probability))
            .collect())
    }
}

/// Loads `OnnxClassifier`s off the async runtime
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    pub layout: TensorLayout,
    pub intra_threads: usize,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self {
            layout: TensorLayout::Nhwc,
            intra_threads: 4,
        }
    }
}

#[async_trait]
impl ClassifierLoader for OnnxLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
        let descriptor = descriptor.clone();
        let loader = self.clone();
        let classifier = tokio::task::spawn_blocking(move || {
            OnnxClassifier::new(&descriptor, loader.layout, loader.intra_threads)
        })
        .await
        .map_err(Error::model)??;

        Ok(Arc::new(classifier))
    }
}
