//! Throttled hand-off of captured frames to classification workers.
//!
//! The dispatcher enforces the submission policy: submit at most every
//! N ticks, and never while a previous request is outstanding, no matter
//! how many ticks have elapsed. Skipped eligibility is dropped, not
//! queued, so a slow classifier can never build a backlog. Frame-skipping
//! trades label freshness for a control loop that never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::cache::ResultCache;
use crate::classify::EmotionClassifier;
use crate::frame::Frame;
use crate::ClassificationResult;

/// Clears the in-flight flag when the worker exits, on every path
/// including a panic inside the classifier.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Decides, per captured frame, whether to submit it for classification.
///
/// Exactly one dispatcher exists per pipeline; it is the sole gate for
/// concurrent submissions. Ticks are counted per offered frame, so only
/// successful device reads advance the throttle.
pub struct ThrottledDispatcher {
    period: u64,
    ticks: u64,
    last_submitted_seq: u64,
    in_flight: Arc<AtomicBool>,
    classifier: Arc<Mutex<dyn EmotionClassifier>>,
    cache: ResultCache,
}

impl ThrottledDispatcher {
    pub fn new(
        period: u32,
        classifier: Arc<Mutex<dyn EmotionClassifier>>,
        cache: ResultCache,
    ) -> Self {
        debug_assert!(period >= 1, "submission period is validated upstream");
        Self {
            period: period as u64,
            ticks: 0,
            last_submitted_seq: 0,
            in_flight: Arc::new(AtomicBool::new(false)),
            classifier,
            cache,
        }
    }

    /// Count a tick for `frame` and submit it when the policy allows.
    ///
    /// Returns whether a classification worker was spawned for this frame.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        self.ticks += 1;
        if !self.ticks.is_multiple_of(self.period) {
            return false;
        }

        // Publish the submission decision with the same compare-and-set
        // that gates it; the worker releases the flag when it exits.
        if self.in_flight.swap(true, Ordering::AcqRel) {
            log::debug!(
                "classification still in flight, dropping eligibility at tick {}",
                self.ticks
            );
            return false;
        }

        self.last_submitted_seq = frame.seq();
        self.spawn_worker(frame);
        true
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_submitted_seq(&self) -> u64 {
        self.last_submitted_seq
    }

    fn spawn_worker(&self, frame: &Frame) {
        // The worker needs its own copy; the original frame goes on to the
        // presentation path.
        let pixels = frame.pixels().to_vec();
        let width = frame.width();
        let height = frame.height();
        let seq = frame.seq();
        let classifier = Arc::clone(&self.classifier);
        let cache = self.cache.clone();
        let guard = InFlightGuard {
            flag: Arc::clone(&self.in_flight),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("classify-{seq}"))
            .spawn(move || {
                let _guard = guard;
                run_classification(classifier, cache, pixels, width, height, seq);
            });
        if let Err(err) = spawned {
            // The closure (and with it the guard) is dropped on spawn
            // failure, so the flag is already clear again.
            log::warn!("failed to spawn classification worker: {}", err);
        }
    }
}

/// Worker body. The single policy point for inference failures: any
/// failure leaves the cache untouched and is never surfaced to the caller.
fn run_classification(
    classifier: Arc<Mutex<dyn EmotionClassifier>>,
    cache: ResultCache,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    seq: u64,
) {
    let outcome = classifier
        .lock()
        .map_err(|_| anyhow!("classifier lock poisoned"))
        .and_then(|mut backend| backend.classify(&pixels, width, height));

    match outcome {
        Ok(emotion) => {
            if cache.publish(ClassificationResult::new(emotion, seq)) {
                log::debug!("frame #{} classified as {}", seq, emotion);
            } else {
                log::debug!("result for frame #{} arrived stale, discarded", seq);
            }
        }
        Err(err) => {
            log::debug!("classification of frame #{} failed: {}", seq, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Emotion;
    use anyhow::Result;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::{Duration, Instant};

    fn test_frame(seq: u64) -> Frame {
        let pixels: Vec<u8> = (0..16u64 * 16 * 3)
            .map(|i| ((i + seq) % 256) as u8)
            .collect();
        Frame::new(pixels, 16, 16, seq)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met within 5s");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Returns a fixed label immediately.
    struct InstantClassifier(Emotion);

    impl EmotionClassifier for InstantClassifier {
        fn name(&self) -> &'static str {
            "instant"
        }

        fn classify(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Emotion> {
            Ok(self.0)
        }
    }

    /// Blocks inside `classify` until the test sends an outcome.
    struct GatedClassifier {
        outcomes: Receiver<Result<Emotion>>,
    }

    impl GatedClassifier {
        fn new() -> (Self, Sender<Result<Emotion>>) {
            let (tx, rx) = channel();
            (Self { outcomes: rx }, tx)
        }
    }

    impl EmotionClassifier for GatedClassifier {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn classify(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Emotion> {
            self.outcomes
                .recv()
                .map_err(|_| anyhow!("gate closed"))?
        }
    }

    struct PanickingClassifier;

    impl EmotionClassifier for PanickingClassifier {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn classify(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Emotion> {
            panic!("classifier blew up");
        }
    }

    struct FailingClassifier;

    impl EmotionClassifier for FailingClassifier {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn classify(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Emotion> {
            Err(anyhow!("no discernible face in frame"))
        }
    }

    fn dispatcher_with(
        period: u32,
        classifier: impl EmotionClassifier + 'static,
    ) -> (ThrottledDispatcher, ResultCache) {
        let cache = ResultCache::new();
        let dispatcher =
            ThrottledDispatcher::new(period, Arc::new(Mutex::new(classifier)), cache.clone());
        (dispatcher, cache)
    }

    #[test]
    fn submits_only_on_period_boundaries() {
        let (mut dispatcher, cache) =
            dispatcher_with(3, InstantClassifier(Emotion::Happy));

        for seq in 1..=2 {
            assert!(!dispatcher.offer(&test_frame(seq)));
        }
        assert!(dispatcher.offer(&test_frame(3)));
        assert_eq!(dispatcher.last_submitted_seq(), 3);

        // Let the worker finish before the next eligible tick so the
        // second submission is not dropped as in-flight.
        wait_for(|| cache.read().frame_seq == 3);
        wait_for(|| !dispatcher.in_flight.load(Ordering::Acquire));

        for seq in 4..=5 {
            assert!(!dispatcher.offer(&test_frame(seq)));
        }
        assert!(dispatcher.offer(&test_frame(6)));
        wait_for(|| cache.read().frame_seq == 6);
    }

    #[test]
    fn in_flight_request_blocks_further_submissions() {
        let (classifier, gate) = GatedClassifier::new();
        let (mut dispatcher, cache) = dispatcher_with(1, classifier);

        assert!(dispatcher.offer(&test_frame(1)));

        // Every subsequent tick is eligible (period 1) but must be dropped
        // while the first request is outstanding.
        for seq in 2..=10 {
            assert!(!dispatcher.offer(&test_frame(seq)));
        }
        assert_eq!(dispatcher.last_submitted_seq(), 1);

        gate.send(Ok(Emotion::Happy)).unwrap();
        wait_for(|| cache.read() == ClassificationResult::new(Emotion::Happy, 1));
        wait_for(|| !dispatcher.in_flight.load(Ordering::Acquire));

        assert!(dispatcher.offer(&test_frame(11)));
        gate.send(Ok(Emotion::Sad)).unwrap();
        wait_for(|| cache.read() == ClassificationResult::new(Emotion::Sad, 11));
    }

    #[test]
    fn classifier_panic_clears_the_in_flight_flag() {
        let (mut dispatcher, cache) = dispatcher_with(1, PanickingClassifier);

        assert!(dispatcher.offer(&test_frame(1)));
        wait_for(|| !dispatcher.in_flight.load(Ordering::Acquire));
        assert!(cache.read().is_default());

        // The gate reopens; a poisoned classifier lock degrades to
        // "no update" rather than wedging the dispatcher.
        assert!(dispatcher.offer(&test_frame(2)));
        wait_for(|| !dispatcher.in_flight.load(Ordering::Acquire));
        assert!(cache.read().is_default());
    }

    #[test]
    fn classification_failure_leaves_cache_untouched() {
        let (mut dispatcher, cache) = dispatcher_with(1, FailingClassifier);

        for round in 0..5 {
            assert!(dispatcher.offer(&test_frame(round * 2 + 1)));
            wait_for(|| !dispatcher.in_flight.load(Ordering::Acquire));
        }

        assert!(cache.read().is_default());
    }

    #[test]
    fn ticks_count_every_offered_frame() {
        let (mut dispatcher, _cache) =
            dispatcher_with(100, InstantClassifier(Emotion::Neutral));

        for seq in 1..=7 {
            dispatcher.offer(&test_frame(seq));
        }
        assert_eq!(dispatcher.ticks(), 7);
        assert_eq!(dispatcher.last_submitted_seq(), 0);
    }
}
