use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::classifier::{ClassifyOptions, EmotionClassifier};
use crate::Emotion;

/// Stub classifier for testing and synthetic runs.
///
/// Derives a deterministic label from a coarse pixel histogram, so the same
/// frame always classifies the same way and distinct synthetic scenes move
/// between labels.
pub struct StubClassifier {
    options: ClassifyOptions,
}

impl StubClassifier {
    pub fn new(options: ClassifyOptions) -> Self {
        Self { options }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(ClassifyOptions::default())
    }
}

impl EmotionClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Emotion> {
        // Coarse 8-bin histogram over sampled pixels.
        let mut histogram = [0u32; 8];
        for &p in pixels.iter().step_by(100) {
            histogram[(p / 32) as usize] += 1;
        }

        // A near-uniform frame has no structure to discriminate a face in.
        let occupied_bins = histogram.iter().filter(|&&count| count > 0).count();
        if self.options.enforce_detection && occupied_bins <= 1 {
            return Err(anyhow!("no discernible face in frame"));
        }

        let mut hasher = Sha256::new();
        for count in &histogram {
            hasher.update(count.to_le_bytes());
        }
        let digest: [u8; 32] = hasher.finalize().into();

        let index = (digest[0] as usize) % Emotion::ALL.len();
        Ok(Emotion::ALL[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_deterministic_per_frame() {
        let mut classifier = StubClassifier::default();
        let pixels: Vec<u8> = (0..640 * 480 * 3).map(|i| (i % 256) as u8).collect();

        let first = classifier.classify(&pixels, 640, 480).unwrap();
        let second = classifier.classify(&pixels, 640, 480).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn enforce_detection_rejects_uniform_frames() {
        let mut classifier = StubClassifier::new(ClassifyOptions {
            enforce_detection: true,
            ..ClassifyOptions::default()
        });
        let blank = vec![0u8; 320 * 240 * 3];
        assert!(classifier.classify(&blank, 320, 240).is_err());
    }

    #[test]
    fn uniform_frames_still_classify_when_detection_not_enforced() {
        let mut classifier = StubClassifier::default();
        let blank = vec![0u8; 320 * 240 * 3];
        assert!(classifier.classify(&blank, 320, 240).is_ok());
    }
}
