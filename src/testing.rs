//! Scripted collaborators for pipeline tests

use crate::capture::{CaptureSource, Dimensions, StreamHandle};
use crate::classifier::{
    Classifier, ClassifierLoader, ModelDescriptor, Prediction, PredictionSet,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Camera that hands out a fixed 8x6 frame
#[derive(Default)]
pub struct ScriptedCamera {
    denied: AtomicBool,
    never_ready: AtomicBool,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    reads_after_release: Arc<AtomicUsize>,
}

impl ScriptedCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    pub fn never_ready(&self, never: bool) {
        self.never_ready.store(never, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Streams acquired and not yet released
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn reads_after_release(&self) -> usize {
        self.reads_after_release.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for ScriptedCamera {
    async fn acquire(&self) -> Result<Box<dyn StreamHandle>> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(Error::MediaAccess("permission denied".to_string()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        let dims = if self.never_ready.load(Ordering::SeqCst) {
            None
        } else {
            Some((8, 6))
        };
        let (dims_tx, _) = watch::channel(dims);

        Ok(Box::new(ScriptedStream {
            frame: Arc::new(RgbImage::from_pixel(8, 6, Rgb([40, 80, 120]))),
            dims: dims_tx,
            released: false,
            released_count: self.released.clone(),
            active: self.active.clone(),
            reads_after_release: self.reads_after_release.clone(),
        }))
    }
}

struct ScriptedStream {
    frame: Arc<RgbImage>,
    dims: watch::Sender<Option<Dimensions>>,
    released: bool,
    released_count: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    reads_after_release: Arc<AtomicUsize>,
}

impl StreamHandle for ScriptedStream {
    fn dimensions(&self) -> watch::Receiver<Option<Dimensions>> {
        self.dims.subscribe()
    }

    fn current_frame(&self) -> Result<Arc<RgbImage>> {
        if self.released {
            self.reads_after_release.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Capture("stream already released".to_string()));
        }
        Ok(self.frame.clone())
    }

    fn active_tracks(&self) -> usize {
        usize::from(!self.released)
    }

    fn stop_tracks(&mut self) {
        if !self.released {
            self.released = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.released_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Classifier that scores the first label 0.9 and splits the rest
pub struct ScriptedClassifier {
    labels: Vec<String>,
    claimed_classes: AtomicUsize,
    class_count_stall: Mutex<Option<Duration>>,
    stalled: AtomicBool,
    latency: Option<Duration>,
    gate: Option<Semaphore>,
    fail_on: Mutex<HashSet<usize>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClassifier {
    fn build(labels: &[&str], latency: Option<Duration>, gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            claimed_classes: AtomicUsize::new(labels.len()),
            class_count_stall: Mutex::new(None),
            stalled: AtomicBool::new(false),
            latency,
            gate,
            fail_on: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn new(labels: &[&str]) -> Arc<Self> {
        Self::build(labels, None, None)
    }

    pub fn with_latency(labels: &[&str], latency: Duration) -> Arc<Self> {
        Self::build(labels, Some(latency), None)
    }

    /// Every call blocks until `release` hands it a permit
    pub fn gated(labels: &[&str]) -> Arc<Self> {
        Self::build(labels, None, Some(Semaphore::new(0)))
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Fail the n-th call (1-based)
    pub fn fail_on(&self, call: usize) {
        self.fail_on.lock().insert(call);
    }

    /// Report a class count that differs from what `predict` returns
    pub fn claim_classes(&self, count: usize) {
        self.claimed_classes.store(count, Ordering::SeqCst);
    }

    /// Block the next `total_classes` call on its thread for `stall`
    pub fn stall_class_count(&self, stall: Duration) {
        *self.class_count_stall.lock() = Some(stall);
    }

    /// Whether a stalled `total_classes` call has begun
    pub fn stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.labels.len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn total_classes(&self) -> usize {
        let stall = self.class_count_stall.lock().take();
        if let Some(stall) = stall {
            self.stalled.store(true, Ordering::SeqCst);
            std::thread::sleep(stall);
        }
        self.claimed_classes.load(Ordering::SeqCst)
    }

    async fn predict(&self, _bitmap: &RgbImage) -> Result<PredictionSet> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        } else if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.lock().contains(&call) {
            return Err(Error::Inference(format!("scripted failure on call {}", call)));
        }

        let rest = 0.1 / (self.labels.len().max(2) - 1) as f32;
        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| Prediction::new(label.clone(), if i == 0 { 0.9 } else { rest }))
            .collect())
    }
}

/// Loader handing out a prepared classifier, or failing
pub struct ScriptedLoader {
    classifier: Option<Arc<ScriptedClassifier>>,
}

impl ScriptedLoader {
    pub fn new(classifier: Arc<ScriptedClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }

    pub fn failing() -> Self {
        Self { classifier: None }
    }
}

#[async_trait]
impl ClassifierLoader for ScriptedLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Classifier>> {
        match &self.classifier {
            Some(classifier) => Ok(classifier.clone() as Arc<dyn Classifier>),
            None => Err(Error::ModelLoad(format!(
                "{} is not a model",
                descriptor.model.display()
            ))),
        }
    }
}
