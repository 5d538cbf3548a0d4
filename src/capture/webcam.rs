use super::{CaptureSource, Dimensions, StreamHandle};
use crate::error::{Error, Result};
use anyhow::Context;
use async_trait::async_trait;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// Camera device settings
#[derive(Debug, Clone)]
pub struct WebcamConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// A frame older than this is treated as a dead feed
const FRAME_STALE_AFTER: Duration = Duration::from_secs(1);

/// Consecutive failed reads before the capture thread warns
const FAILURES_BEFORE_WARN: u32 = 30;

/// Webcam capture source backed by nokhwa
///
/// Each acquired stream runs its own capture thread. The nokhwa camera is
/// created, read and closed on that thread only. Released streams leave
/// their thread here; the next `acquire` joins them on the blocking pool
/// before opening the device again.
pub struct WebcamCapture {
    config: WebcamConfig,
    retired: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WebcamCapture {
    pub fn new(config: WebcamConfig) -> Self {
        Self {
            config,
            retired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn join_retired(&self) -> Result<()> {
        let retired = std::mem::take(&mut *self.retired.lock());
        if retired.is_empty() {
            return Ok(());
        }

        tracing::debug!("Waiting for {} released capture thread(s)", retired.len());
        tokio::task::spawn_blocking(move || {
            for thread in retired {
                if thread.join().is_err() {
                    tracing::error!("Webcam capture thread panicked");
                }
            }
        })
        .await
        .map_err(Error::media)
    }
}

#[async_trait]
impl CaptureSource for WebcamCapture {
    async fn acquire(&self) -> Result<Box<dyn StreamHandle>> {
        self.join_retired().await?;

        let config = self.config.clone();
        tracing::info!(
            "Initializing webcam {} at {}x{}@{}",
            config.device_index,
            config.width,
            config.height,
            config.fps
        );

        let stop_flag = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(LatestFrame::new(FRAME_STALE_AFTER));
        let (dims_tx, dims_rx) = watch::channel(None);
        let (opened_tx, opened_rx) = oneshot::channel();

        let thread = {
            let stop_flag = stop_flag.clone();
            let latest = latest.clone();
            std::thread::Builder::new()
                .name("webcam-capture".to_string())
                .spawn(move || capture_thread(config, stop_flag, latest, dims_tx, opened_tx))
                .map_err(Error::media)?
        };

        // Owns the thread from here on: if this future is dropped or the
        // open fails, dropping the stream stops the thread
        let stream = WebcamStream {
            stop_flag,
            latest,
            dims: dims_rx,
            thread: Some(thread),
            retired: self.retired.clone(),
        };

        match opened_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::MediaAccess(
                    "capture thread exited before opening the camera".to_string(),
                ))
            }
        }

        tracing::info!("Webcam stream opened");
        Ok(Box::new(stream))
    }
}

fn open_camera(config: &WebcamConfig) -> anyhow::Result<Camera> {
    let index = CameraIndex::Index(config.device_index);
    let format = CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        config.fps,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

    camera
        .open_stream()
        .context("Failed to open camera stream")?;

    Ok(camera)
}

fn capture_thread(
    config: WebcamConfig,
    stop_flag: Arc<AtomicBool>,
    latest: Arc<LatestFrame>,
    dims_tx: watch::Sender<Option<Dimensions>>,
    opened_tx: oneshot::Sender<Result<()>>,
) {
    let mut camera = match open_camera(&config) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = opened_tx.send(Err(Error::media(e)));
            return;
        }
    };
    if opened_tx.send(Ok(())).is_err() {
        tracing::debug!("Camera opened after acquire was abandoned");
        stop_flag.store(true, Ordering::Release);
    }

    let mut failures = 0u32;
    while !stop_flag.load(Ordering::Acquire) {
        let decoded = camera
            .frame()
            .context("Failed to capture frame")
            .and_then(|frame| {
                frame
                    .decode_image::<RgbFormat>()
                    .context("Failed to decode frame")
            });

        match decoded {
            Ok(image) => {
                if failures >= FAILURES_BEFORE_WARN {
                    tracing::info!("Webcam frames resumed");
                }
                failures = 0;
                let dims = image.dimensions();
                dims_tx.send_if_modified(|current| {
                    if current.is_none() {
                        tracing::info!("Webcam negotiated {}x{}", dims.0, dims.1);
                        *current = Some(dims);
                        true
                    } else {
                        false
                    }
                });
                latest.store(image);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == FAILURES_BEFORE_WARN {
                    tracing::warn!("Webcam stopped delivering frames: {:#}", e);
                } else {
                    tracing::debug!("Dropped camera frame: {:#}", e);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {}", e);
    }
    tracing::info!("Webcam released");
}

/// Most recent decoded frame, with the time it arrived
struct LatestFrame {
    slot: Mutex<Option<(Instant, Arc<RgbImage>)>>,
    max_age: Duration,
}

impl LatestFrame {
    fn new(max_age: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            max_age,
        }
    }

    fn store(&self, image: RgbImage) {
        *self.slot.lock() = Some((Instant::now(), Arc::new(image)));
    }

    fn clear(&self) {
        self.slot.lock().take();
    }

    /// The latest frame, unless the feed has gone quiet
    fn fresh(&self) -> Result<Arc<RgbImage>> {
        match &*self.slot.lock() {
            Some((at, frame)) if at.elapsed() <= self.max_age => Ok(frame.clone()),
            Some((at, _)) => Err(Error::Capture(format!(
                "no camera frame for {:.1}s",
                at.elapsed().as_secs_f64()
            ))),
            None => Err(Error::Capture("no frame delivered yet".to_string())),
        }
    }
}

struct WebcamStream {
    stop_flag: Arc<AtomicBool>,
    latest: Arc<LatestFrame>,
    dims: watch::Receiver<Option<Dimensions>>,
    thread: Option<JoinHandle<()>>,
    retired: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StreamHandle for WebcamStream {
    fn dimensions(&self) -> watch::Receiver<Option<Dimensions>> {
        self.dims.clone()
    }

    fn current_frame(&self) -> Result<Arc<RgbImage>> {
        if self.thread.is_none() {
            return Err(Error::Capture("stream already released".to_string()));
        }
        self.latest.fresh()
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.thread.is_some())
    }

    /// Signal the capture thread and return without waiting for it
    ///
    /// The thread closes the camera once its current read returns.
    fn stop_tracks(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::Release);
        self.latest.clear();
        self.retired.lock().push(thread);
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
