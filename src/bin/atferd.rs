//! atferd - ATFER affect pipeline daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera
//! 2. Submits every Nth frame to the emotion classifier, one at a time
//! 3. Publishes completed classifications to the shared result cache
//! 4. Logs label transitions and periodic pipeline health

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use atfer_core::{
    AtferdConfig, CameraSource, ClassificationResult, Emotion, EmotionClassifier, Frame,
    FrameSink, Pipeline, StubClassifier,
};

/// Sink that logs label transitions as they become visible to readers.
struct LabelLogSink {
    frames_presented: u64,
    current: Emotion,
}

impl LabelLogSink {
    fn new() -> Self {
        Self {
            frames_presented: 0,
            current: Emotion::default(),
        }
    }
}

impl FrameSink for LabelLogSink {
    fn present(&mut self, _frame: &Frame, result: &ClassificationResult) {
        self.frames_presented += 1;
        if result.emotion != self.current {
            self.current = result.emotion;
            log::info!(
                "label changed to {} (classified from frame #{})",
                result.emotion,
                result.frame_seq
            );
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging (simple stderr)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AtferdConfig::load()?;
    log::info!(
        "atferd starting: device={} {}x{} tick={:?} submission_period={} mirror={}",
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.pipeline.tick_interval,
        cfg.pipeline.submission_period,
        cfg.pipeline.mirror
    );

    let source = CameraSource::new(cfg.camera.clone())?;
    let classifier: Arc<Mutex<dyn EmotionClassifier>> =
        Arc::new(Mutex::new(StubClassifier::new(cfg.classifier.clone())));

    let pipeline = Pipeline::new(cfg.pipeline.clone(), source, classifier)?;
    let cache = pipeline.cache();
    let handle = pipeline.spawn(LabelLogSink::new())?;

    let stopper = handle.stopper();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        stopper.stop();
    })?;

    let mut last_health_log = Instant::now();
    while handle.is_running() {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let result = cache.read();
            log::info!(
                "pipeline health: label={} frame_seq={}",
                result.emotion,
                result.frame_seq
            );
            last_health_log = Instant::now();
        }
    }

    handle.shutdown()?;
    log::info!("atferd stopped");
    Ok(())
}
