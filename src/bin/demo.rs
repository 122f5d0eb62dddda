//! demo - end-to-end synthetic run of the ATFER pipeline

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atfer_core::{
    CameraConfig, CameraSource, ClassificationResult, EmotionClassifier, Frame, FrameSink,
    Pipeline, PipelineConfig, ResultCache, StubClassifier,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration of the synthetic run in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Control-loop ticks per second.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Ticks between classification submissions.
    #[arg(long, default_value_t = 15)]
    period: u32,
    /// Disable the mirror transform.
    #[arg(long)]
    no_mirror: bool,
}

/// Sink that counts emissions so the main thread can report afterwards.
#[derive(Clone, Default)]
struct CountingSink {
    emitted: Arc<AtomicU64>,
}

impl FrameSink for CountingSink {
    fn present(&mut self, _frame: &Frame, _result: &ClassificationResult) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.period == 0 {
        return Err(anyhow!("period must be >= 1"));
    }

    stage("configure synthetic pipeline");
    let camera = CameraConfig {
        device: "stub://demo".to_string(),
        ..CameraConfig::default()
    };
    let config = PipelineConfig {
        tick_interval: Duration::from_millis((1000 / args.fps).max(1) as u64),
        submission_period: args.period,
        mirror: !args.no_mirror,
    };

    let source = CameraSource::new(camera)?;
    let classifier: Arc<Mutex<dyn EmotionClassifier>> =
        Arc::new(Mutex::new(StubClassifier::default()));
    let pipeline = Pipeline::new(config, source, classifier)?;

    let cache: ResultCache = pipeline.cache();
    let sink = CountingSink::default();
    let emitted = Arc::clone(&sink.emitted);

    stage("run");
    let handle = pipeline.spawn(sink)?;
    std::thread::sleep(Duration::from_secs(args.seconds));

    stage("shutdown");
    handle.shutdown()?;

    let result = cache.read();
    println!("frames emitted: {}", emitted.load(Ordering::Relaxed));
    println!("final result:   {}", serde_json::to_string(&result)?);
    Ok(())
}

fn stage(name: &str) {
    println!("==> {}", name);
}
