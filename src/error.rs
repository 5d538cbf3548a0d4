use thiserror::Error;

/// Pipeline error type
///
/// `MediaAccess` and `ModelLoad` are fatal to `start()` and become the
/// persistent error state. `Inference` and `Capture` only ever affect a
/// single cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Camera access failed: {0}")]
    MediaAccess(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),
}

impl Error {
    /// Whether this error stops the pipeline from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MediaAccess(_) | Error::ModelLoad(_))
    }

    pub(crate) fn media(err: impl std::fmt::Display) -> Self {
        Error::MediaAccess(format!("{:#}", err))
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Error::ModelLoad(format!("{:#}", err))
    }

    pub(crate) fn inference(err: impl std::fmt::Display) -> Self {
        Error::Inference(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
