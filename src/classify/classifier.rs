use anyhow::Result;

use crate::Emotion;

/// Options forwarded to classifier backends at construction.
///
/// These mirror the call contract of the external analysis service; the
/// core passes them through without interpreting them.
#[derive(Clone, Debug)]
pub struct ClassifyOptions {
    /// When set, classification fails if no face region can be
    /// discriminated instead of guessing from the whole frame.
    pub enforce_detection: bool,
    /// Face detector implementation hint (backend-selected fast path).
    pub detector_backend: String,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            enforce_detection: false,
            detector_backend: "opencv".to_string(),
        }
    }
}

/// Emotion classifier boundary.
///
/// Implementations may take substantially longer than one pipeline tick.
/// The dispatcher always invokes `classify` from a worker thread, never
/// from the control loop, and treats any failure - internal error or
/// "no discernible face" - as "no label update". Failures never interrupt
/// the output stream.
pub trait EmotionClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one frame.
    ///
    /// `pixels` is tightly-packed RGB24 and must be treated as read-only
    /// and ephemeral; matching the layout the backend expects is the
    /// caller's responsibility.
    fn classify(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Emotion>;

    /// Optional warm-up hook, called once before the pipeline starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
