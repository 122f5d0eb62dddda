//! ATFER core - real-time affect recognition pipeline.
//!
//! This crate implements the capture / throttled-inference / publication
//! pipeline behind the ATFER presentation layer.
//!
//! # Architecture
//!
//! The pipeline enforces four guarantees by construction:
//!
//! 1. **Non-blocking emission**: the control loop never waits on the
//!    classifier. Every tick emits the freshest frame with the latest
//!    available label, however stale.
//! 2. **Single in-flight request**: at most one classification runs at any
//!    instant, regardless of classifier latency.
//! 3. **Convergent publication**: completed classifications race freely to
//!    the result cache; only the write with the highest frame sequence wins.
//! 4. **Graceful degradation**: device and classifier failures degrade to
//!    "no frame this tick" / "no label update", never to a crash or a frozen
//!    output stream.
//!
//! # Module Structure
//!
//! - `frame`: captured frame snapshots and the mirror transform
//! - `capture`: camera frame sources (V4L2 devices, synthetic stub)
//! - `classify`: the emotion classifier boundary and its backends
//! - `dispatch`: throttled hand-off of frames to classification workers
//! - `cache`: the latest-result cache shared across threads
//! - `pipeline`: the control loop and its lifecycle handles
//! - `config`: daemon configuration (file + environment)

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cache;
pub mod capture;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod pipeline;

pub use cache::ResultCache;
pub use capture::{CameraConfig, CameraSource, CameraStats};
pub use classify::{ClassifyOptions, EmotionClassifier, StubClassifier};
pub use config::{AtferdConfig, PipelineConfig};
pub use dispatch::ThrottledDispatcher;
pub use frame::Frame;
pub use pipeline::{FrameSink, Pipeline, PipelineHandle, PipelineStopper, TickOutcome};

// -------------------- Labels --------------------

/// Closed set of emotion categories the pipeline publishes.
///
/// `Neutral` doubles as the default/unknown category: it is what readers see
/// before the first classification completes and what unrecognized backend
/// labels map to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Angry,
    Sad,
    Fear,
    Surprise,
    Disgust,
    #[default]
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Angry,
        Emotion::Sad,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Disgust,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Angry => "angry",
            Emotion::Sad => "sad",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Disgust => "disgust",
            Emotion::Neutral => "neutral",
        }
    }

    /// Map a backend label string to a category, defaulting to `Neutral`
    /// for anything outside the closed set.
    pub fn from_label(label: &str) -> Self {
        Emotion::ALL
            .into_iter()
            .find(|emotion| emotion.as_str() == label)
            .unwrap_or(Emotion::Neutral)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Results --------------------

/// A classification outcome tied to the frame it was computed from.
///
/// `frame_seq` 0 is reserved for the never-classified default; captured
/// frames are numbered from 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub emotion: Emotion,
    pub frame_seq: u64,
}

impl ClassificationResult {
    pub fn new(emotion: Emotion, frame_seq: u64) -> Self {
        Self { emotion, frame_seq }
    }

    /// True until the first classification has been published.
    pub fn is_default(&self) -> bool {
        self.frame_seq == 0
    }
}
