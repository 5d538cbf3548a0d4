use super::clock::RefreshClock;
use super::scheduler::{InferenceScheduler, SchedulerState, SharedStream};
use super::sink::ResultSink;
use super::token::LoopToken;
use crate::capture::{CaptureSource, Dimensions, FrameBuffer};
use crate::classifier::{ClassifierLoader, ModelDescriptor, PredictionSet};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model and metadata files
    pub model: ModelDescriptor,
    /// Display refresh rate the loop is paced to
    pub refresh_hz: u32,
    /// Mirror frames horizontally before classifying
    pub mirror: bool,
    /// How long to wait for the camera's first frame
    pub ready_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelDescriptor::from_dir("./my_model/"),
            refresh_hz: 60,
            mirror: true,
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle manager
///
/// Owns the camera stream and the loop token, and is the only place either
/// is created or released. Provides:
/// - `start`: camera, readiness, classifier, then the scheduling chain
/// - `stop`: revoke, cancel, release; safe at any point
/// - `restart`: full reload after a fatal error
///
/// Dropping the manager stops the pipeline.
pub struct Lifecycle {
    config: PipelineConfig,
    capture: Arc<dyn CaptureSource>,
    loader: Arc<dyn ClassifierLoader>,
    sink: ResultSink,
    error: watch::Sender<Option<Error>>,
    state: Arc<watch::Sender<SchedulerState>>,
    stream: SharedStream,
    /// Single-flight gate shared by every chain this manager spawns
    gate: Arc<Semaphore>,
    token: Option<LoopToken>,
    chains: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new(
        config: PipelineConfig,
        capture: Arc<dyn CaptureSource>,
        loader: Arc<dyn ClassifierLoader>,
    ) -> Self {
        let (error, _) = watch::channel(None);
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            config,
            capture,
            loader,
            sink: ResultSink::new(),
            error,
            state: Arc::new(state),
            stream: Arc::new(Mutex::new(None)),
            gate: Arc::new(Semaphore::new(1)),
            token: None,
            chains: Vec::new(),
        }
    }

    /// Start the pipeline
    ///
    /// A no-op while already started. A fatal error is stored as the error
    /// state, everything acquired so far is released, and the error is
    /// returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.token.is_some() {
            tracing::debug!("Pipeline already started");
            return Ok(());
        }

        self.chains.retain(|chain| !chain.is_finished());
        self.state.send_replace(SchedulerState::Starting);
        tracing::info!("Starting pipeline");

        match self.launch().await {
            Ok(token) => {
                self.token = Some(token);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Pipeline failed to start: {}", e);
                self.stop();
                self.error.send_replace(Some(e.clone()));
                Err(e)
            }
        }
    }

    async fn launch(&mut self) -> Result<LoopToken> {
        let stream = self.capture.acquire().await?;
        let mut dims_rx = stream.dimensions();
        let previous = self.stream.lock().replace(stream);
        if let Some(mut previous) = previous {
            previous.stop_tracks();
        }

        let (width, height) = self.wait_ready(&mut dims_rx).await?;
        tracing::info!("Camera ready at {}x{}", width, height);

        let classifier = self.loader.load(&self.config.model).await?;
        tracing::info!("Classifier ready with {} classes", classifier.total_classes());

        let token = LoopToken::new();
        let scheduler = InferenceScheduler {
            stream: self.stream.clone(),
            classifier,
            sink: self.sink.clone(),
            buffer: FrameBuffer::with_dimensions((width, height), self.config.mirror),
            clock: RefreshClock::new(self.config.refresh_hz),
            token: token.clone(),
            gate: self.gate.clone(),
            state: self.state.clone(),
        };

        self.state.send_replace(SchedulerState::Running);
        self.chains.push(tokio::spawn(scheduler.run()));
        Ok(token)
    }

    async fn wait_ready(
        &self,
        dims_rx: &mut watch::Receiver<Option<Dimensions>>,
    ) -> Result<Dimensions> {
        let timeout = self.config.ready_timeout;
        match tokio::time::timeout(timeout, dims_rx.wait_for(|dims| dims.is_some())).await {
            Ok(Ok(dims)) => (*dims).ok_or_else(|| {
                Error::MediaAccess("camera reported no dimensions".to_string())
            }),
            Ok(Err(_)) => Err(Error::MediaAccess(
                "camera stream closed before delivering a frame".to_string(),
            )),
            Err(_) => Err(Error::MediaAccess(format!(
                "camera delivered no frame within {:?}",
                timeout
            ))),
        }
    }

    /// Stop the pipeline
    ///
    /// Revokes the token (cancelling the pending refresh wait) and stops
    /// every camera track. Safe to call repeatedly, before `start`, or after
    /// a failed or abandoned `start`. An in-flight inference call is left to
    /// finish; its result is discarded.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.revoke();
            self.state.send_replace(SchedulerState::Stopping);
            tracing::info!("Inference loop stopping");
        } else {
            self.state.send_if_modified(|state| {
                if *state == SchedulerState::Starting {
                    *state = SchedulerState::Idle;
                    true
                } else {
                    false
                }
            });
        }

        // The token is revoked before the slot is locked, so the scheduler
        // can neither read from a released stream nor publish after this
        let stream = self.stream.lock().take();
        if let Some(mut stream) = stream {
            stream.stop_tracks();
            tracing::info!("Camera released");
        }
    }

    /// Stop, clear the error state and the last predictions, start again
    pub async fn restart(&mut self) -> Result<()> {
        tracing::info!("Restarting pipeline");
        self.stop();
        self.error.send_replace(None);
        self.sink.clear();
        self.start().await
    }

    /// Stop and wait for every scheduling chain to exit
    pub async fn shutdown(&mut self) {
        self.stop();
        for chain in self.chains.drain(..) {
            if let Err(e) = chain.await {
                tracing::warn!("Inference loop task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Persistent fatal error, cleared only by `restart`
    pub fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    pub fn error_watch(&self) -> watch::Receiver<Option<Error>> {
        self.error.subscribe()
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn current(&self) -> PredictionSet {
        self.sink.current()
    }

    /// Scheduling chains whose task has not exited yet
    pub fn live_chains(&mut self) -> usize {
        self.chains.retain(|chain| !chain.is_finished());
        self.chains.len()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}
