//! Live webcam image classification
//!
//! Frames from a camera are classified continuously and the latest
//! per-class scores are published for rendering:
//!
//! ```text
//! CaptureSource -> FrameBuffer -> Classifier -> ResultSink -> render
//! ```
//!
//! [`pipeline::Lifecycle`] decides when that chain is active.

pub mod capture;
pub mod classifier;
pub mod error;
pub mod pipeline;
pub mod render;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
