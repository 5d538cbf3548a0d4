use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Class labels and input size exported next to the model
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub labels: Vec<String>,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default)]
    pub model_name: Option<String>,
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

impl ModelMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(json).context("Invalid model metadata")?;
        if metadata.labels.is_empty() {
            bail!("Model metadata lists no labels");
        }
        if metadata.image_size == 0 {
            bail!("Model metadata has zero image size");
        }
        Ok(metadata)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata from {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn total_classes(&self) -> usize {
        self.labels.len()
    }
}
