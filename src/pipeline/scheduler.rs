use super::clock::RefreshClock;
use super::sink::ResultSink;
use super::token::LoopToken;
use crate::capture::{FrameBuffer, StreamHandle};
use crate::classifier::Classifier;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

/// Stream slot owned by the lifecycle manager
pub(crate) type SharedStream = Arc<Mutex<Option<Box<dyn StreamHandle>>>>;

/// Inference scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Nothing running
    #[default]
    Idle,
    /// Acquiring the camera and loading the classifier
    Starting,
    /// Cycles running
    Running,
    /// Token revoked, waiting for the last cycle to wind down
    Stopping,
}

/// What happened in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Published,
    /// Result arrived after the token was revoked
    Discarded,
}

/// One scheduling chain: snapshot, classify, publish, wait for refresh
///
/// A chain runs until its token is revoked. It never issues a classifier call
/// while another is outstanding: each call is awaited before the next cycle,
/// and every chain spawned by the same lifecycle shares a single-permit gate.
pub struct InferenceScheduler {
    pub(crate) stream: SharedStream,
    pub(crate) classifier: Arc<dyn Classifier>,
    pub(crate) sink: ResultSink,
    pub(crate) buffer: FrameBuffer,
    pub(crate) clock: RefreshClock,
    pub(crate) token: LoopToken,
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) state: Arc<watch::Sender<SchedulerState>>,
}

#[derive(Debug, Default)]
struct CycleStats {
    cycles: u64,
    failures: u64,
    total_capture_time: Duration,
    total_inference_time: Duration,
    started: Option<Instant>,
}

impl CycleStats {
    fn log(&self) {
        let cycles = self.cycles as f64;
        let avg_capture_ms = self.total_capture_time.as_secs_f64() * 1000.0 / cycles;
        let avg_inference_ms = self.total_inference_time.as_secs_f64() * 1000.0 / cycles;
        let elapsed = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        let rate = if elapsed > 0.0 { cycles / elapsed } else { 0.0 };

        tracing::info!(
            "Cycle {}: capture={:.1}ms, inference={:.1}ms, rate={:.1}/s, failures={}",
            self.cycles,
            avg_capture_ms,
            avg_inference_ms,
            rate,
            self.failures
        );
    }
}

impl InferenceScheduler {
    /// Drive cycles until the token is revoked
    pub async fn run(mut self) {
        tracing::info!(
            "Inference loop started, refresh every {:.1}ms",
            self.clock.period().as_secs_f64() * 1000.0
        );

        let mut stats = CycleStats {
            started: Some(Instant::now()),
            ..Default::default()
        };

        loop {
            tokio::select! {
                biased;
                _ = self.token.revoked() => break,
                _ = self.clock.next_frame() => {}
            }

            match self.cycle(&mut stats).await {
                Ok(Cycle::Published) => {}
                Ok(Cycle::Discarded) => break,
                Err(e) => {
                    stats.failures += 1;
                    tracing::warn!("Cycle {} skipped: {}", stats.cycles, e);
                }
            }

            if stats.cycles > 0 && stats.cycles % 30 == 0 {
                stats.log();
            }

            if !self.token.is_authorized() {
                break;
            }
        }

        self.state.send_if_modified(|state| {
            if *state == SchedulerState::Stopping {
                *state = SchedulerState::Idle;
                true
            } else {
                false
            }
        });
        tracing::info!("Inference loop stopped after {} cycles", stats.cycles);
    }

    async fn cycle(&mut self, stats: &mut CycleStats) -> Result<Cycle> {
        let _permit = tokio::select! {
            biased;
            _ = self.token.revoked() => return Ok(Cycle::Discarded),
            permit = self.gate.acquire() => permit
                .map_err(|_| Error::Inference("inference gate closed".to_string()))?,
        };

        stats.cycles += 1;

        let capture_start = Instant::now();
        let frame = {
            let stream = self.stream.lock();
            if !self.token.is_authorized() {
                return Ok(Cycle::Discarded);
            }
            match stream.as_ref() {
                Some(stream) if stream.is_active() => stream.current_frame()?,
                _ => return Ok(Cycle::Discarded),
            }
        };
        let bitmap = self.buffer.snapshot(&frame);
        stats.total_capture_time += capture_start.elapsed();

        let inference_start = Instant::now();
        let result = self.classifier.predict(bitmap).await;
        stats.total_inference_time += inference_start.elapsed();

        if !self.token.is_authorized() {
            tracing::debug!("Discarding result that arrived after stop");
            return Ok(Cycle::Discarded);
        }

        let predictions = result?;
        let expected = self.classifier.total_classes();
        if predictions.len() != expected {
            return Err(Error::Inference(format!(
                "got {} predictions, model has {} classes",
                predictions.len(),
                expected
            )));
        }

        // Checked again under the slot lock that `stop()` takes after
        // revoking, so nothing is published once `stop()` has returned
        let stream = self.stream.lock();
        if !self.token.is_authorized() {
            tracing::debug!("Discarding result that arrived after stop");
            return Ok(Cycle::Discarded);
        }
        self.sink.publish(predictions);
        drop(stream);

        tracing::debug!("Cycle {} published {} predictions", stats.cycles, expected);
        Ok(Cycle::Published)
    }
}
