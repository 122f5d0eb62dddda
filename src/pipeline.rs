//! Pipeline control loop and lifecycle.
//!
//! One control thread drives the loop at a fixed cadence. Per tick it:
//! 1. Pulls a frame from the camera (a failed read skips the tick's
//!    output but keeps the cadence)
//! 2. Applies the configured mirror transform
//! 3. Offers the frame to the throttled dispatcher
//! 4. Reads the latest cached classification
//! 5. Emits the (frame, result) pair to the presentation sink
//!
//! The loop never waits on classification. Stopping is idempotent and
//! non-blocking; outstanding classification workers run to completion and
//! their late writes are made harmless by the cache's staleness guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::cache::ResultCache;
use crate::capture::CameraSource;
use crate::classify::EmotionClassifier;
use crate::config::PipelineConfig;
use crate::dispatch::ThrottledDispatcher;
use crate::frame::Frame;
use crate::ClassificationResult;

/// Consumer of the pipeline's published state.
///
/// Receives the current frame together with the most recent available
/// classification once per successful-frame tick. All rendering and UI
/// state belong to the implementor.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame, result: &ClassificationResult);
}

/// Outcome of a single control-loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A pair was emitted; `submitted` marks whether this frame was also
    /// handed to the classifier.
    Emitted { submitted: bool },
    /// The device produced no frame; nothing was emitted this tick.
    NoFrame,
}

/// The assembled pipeline: camera, dispatcher and cache under one owner.
pub struct Pipeline {
    config: PipelineConfig,
    source: CameraSource,
    dispatcher: ThrottledDispatcher,
    cache: ResultCache,
}

impl Pipeline {
    /// Assemble and validate a pipeline.
    ///
    /// Acquires the camera handle and warms up the classifier. These are
    /// the only fatal errors in the pipeline's lifetime; on any of them
    /// the camera handle is released again before returning.
    pub fn new(
        config: PipelineConfig,
        mut source: CameraSource,
        classifier: Arc<Mutex<dyn EmotionClassifier>>,
    ) -> Result<Self> {
        config.validate()?;
        source.connect()?;

        let warmed = classifier
            .lock()
            .map_err(|_| anyhow!("classifier lock poisoned"))
            .and_then(|mut backend| backend.warm_up());
        if let Err(err) = warmed {
            source.release();
            return Err(err.context("classifier warm-up failed"));
        }

        let cache = ResultCache::new();
        let dispatcher =
            ThrottledDispatcher::new(config.submission_period, classifier, cache.clone());

        Ok(Self {
            config,
            source,
            dispatcher,
            cache,
        })
    }

    /// A handle to the cache this pipeline publishes into.
    pub fn cache(&self) -> ResultCache {
        self.cache.clone()
    }

    /// Run one control-loop iteration.
    ///
    /// Callers that bring their own scheduler (a timer, an event loop)
    /// drive the pipeline through this; `spawn` wraps it in a dedicated
    /// cadenced thread.
    pub fn tick<S: FrameSink>(&mut self, sink: &mut S) -> TickOutcome {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::NoFrame,
            Err(err) => {
                log::warn!("camera read failed: {}", err);
                return TickOutcome::NoFrame;
            }
        };

        let frame = if self.config.mirror {
            frame.into_mirrored()
        } else {
            frame
        };

        let submitted = self.dispatcher.offer(&frame);
        let result = self.cache.read();
        sink.present(&frame, &result);

        TickOutcome::Emitted { submitted }
    }

    /// Run the loop on a dedicated thread at the configured cadence.
    pub fn spawn<S: FrameSink + 'static>(self, sink: S) -> Result<PipelineHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);
        let join = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run(sink, loop_flag))?;

        Ok(PipelineHandle {
            running,
            join: Some(join),
        })
    }

    fn run<S: FrameSink>(mut self, mut sink: S, running: Arc<AtomicBool>) {
        log::info!(
            "pipeline running: tick={:?} submission_period={} mirror={}",
            self.config.tick_interval,
            self.config.submission_period,
            self.config.mirror
        );

        let mut last_health_log = Instant::now();
        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick(&mut sink);

            if last_health_log.elapsed() >= Duration::from_secs(5) {
                let stats = self.source.stats();
                log::info!(
                    "camera health={} frames={} device={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.device
                );
                last_health_log = Instant::now();
            }

            if let Some(rest) = self.config.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        let stats = self.source.stats();
        self.source.release();
        log::info!(
            "pipeline stopped after {} captured frames",
            stats.frames_captured
        );
    }
}

/// Owning handle to a spawned pipeline.
///
/// `stop` only requests termination and never blocks; `shutdown` stops
/// and waits for the control thread to exit and release the camera.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Stop scheduling ticks. Idempotent and safe from any context.
    ///
    /// Outstanding classification workers are left to run to completion;
    /// the cache's staleness guard makes their late writes harmless.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("pipeline stop requested");
        }
    }

    /// Whether the control thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// A cloneable stop trigger for signal handlers and other contexts
    /// that cannot own the handle.
    pub fn stopper(&self) -> PipelineStopper {
        PipelineStopper {
            running: Arc::clone(&self.running),
        }
    }

    /// Stop and wait for the control thread to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop();
        self.join_inner()
    }

    /// Wait for the control thread to exit without requesting a stop.
    ///
    /// Returns once something else (a stopper, an earlier `stop`) ends
    /// the loop.
    pub fn wait(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("pipeline thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        // Dropping the handle must not leave a detached loop running.
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Lightweight stop trigger detached from handle ownership.
#[derive(Clone)]
pub struct PipelineStopper {
    running: Arc<AtomicBool>,
}

impl PipelineStopper {
    /// Same contract as `PipelineHandle::stop`.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("pipeline stop requested");
        }
    }
}
