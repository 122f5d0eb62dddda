//! Camera frame source.
//!
//! Uses libv4l for real devices, with a synthetic fallback for `stub://`
//! paths. The source is owned and driven by the single control thread;
//! no part of it is shared across threads.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or a `stub://` name.
    pub device: String,
    /// Target frame rate requested from the device.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Synthetic backend only: make every Nth read fail, simulating a
    /// transiently busy device.
    pub fail_every: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://front_camera".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
            fail_every: None,
        }
    }
}

/// Camera frame source.
///
/// `next_frame` returns `Ok(None)` on transient device failures; the read
/// is retried on the next tick. Only misuse (reading before `connect`)
/// is an error.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            })
        } else {
            #[cfg(feature = "capture-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(DeviceCamera::new(config)?),
                })
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                Err(anyhow!(
                    "device capture requires the capture-v4l2 feature"
                ))
            }
        }
    }

    /// Acquire the capture handle.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame.
    ///
    /// Advances the sequence counter on every successful read, including
    /// frames that are never selected for classification.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    /// Release the capture handle. Idempotent.
    pub fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    /// Get capture statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    connected: bool,
    reads: u64,
    frame_count: u64,
    /// Simulated "scene" state so consecutive frames drift over time.
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            connected: false,
            reads: 0,
            frame_count: 0,
            scene_state: 0,
        }
    }

    /// Synthetic sources are always able to "connect".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "CameraSource: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("camera not connected"));
        }

        self.reads += 1;
        if let Some(fail_every) = self.config.fail_every {
            if fail_every > 0 && self.reads.is_multiple_of(fail_every) {
                log::debug!("CameraSource: injected device failure on read {}", self.reads);
                return Ok(None);
            }
        }

        // The sequence counter advances only on successful reads.
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();

        Ok(Some(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )))
    }

    /// Generate synthetic pixel data.
    ///
    /// Simulates a scene that changes occasionally, so downstream
    /// classification sees both static stretches and transitions.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.scene_state as u64) % 256) as u8;
        }

        pixels
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            log::info!("CameraSource: released {} (synthetic)", self.config.device);
        }
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
mod device {
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, Context, Result};
    use ouroboros::self_referencing;

    use super::{CameraConfig, CameraStats};
    use crate::frame::Frame;

    pub(super) struct DeviceCamera {
        config: CameraConfig,
        state: Option<DeviceCameraState>,
        frame_count: u64,
        last_frame_at: Option<Instant>,
        last_error: Option<String>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceCameraState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceCamera {
        pub(super) fn new(config: CameraConfig) -> Result<Self> {
            Ok(Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
                frame_count: 0,
                last_frame_at: None,
                last_error: None,
            })
        }

        pub(super) fn connect(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&self.config.device)
                .with_context(|| format!("open v4l2 device {}", self.config.device))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "CameraSource: failed to set format on {}: {}",
                        self.config.device,
                        err
                    );
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };

            if self.config.target_fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!(
                        "CameraSource: failed to set fps on {}: {}",
                        self.config.device,
                        err
                    );
                }
            }

            self.active_width = format.width;
            self.active_height = format.height;
            self.last_error = None;

            let state = DeviceCameraStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;
            self.state = Some(state);

            log::info!(
                "CameraSource: connected to {} ({}x{})",
                self.config.device,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
            use v4l::io::traits::CaptureStream;

            let state = self.state.as_mut().ok_or_else(|| anyhow!("camera not connected"))?;
            let pixels = match state.with_stream_mut(|stream| {
                stream.next().map(|(buf, _meta)| buf.to_vec())
            }) {
                Ok(pixels) => pixels,
                Err(err) => {
                    // Transient: the device may be busy; retry next tick.
                    self.last_error = Some(err.to_string());
                    log::warn!(
                        "CameraSource: read from {} failed: {}",
                        self.config.device,
                        err
                    );
                    return Ok(None);
                }
            };

            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());
            self.last_error = None;

            Ok(Some(Frame::new(
                pixels,
                self.active_width,
                self.active_height,
                self.frame_count,
            )))
        }

        pub(super) fn release(&mut self) {
            if self.state.take().is_some() {
                log::info!("CameraSource: released {}", self.config.device);
            }
        }

        pub(super) fn is_healthy(&self) -> bool {
            if self.state.is_none() || self.last_error.is_some() {
                return false;
            }
            let Some(last_frame_at) = self.last_frame_at else {
                return true;
            };
            last_frame_at.elapsed() <= self.health_grace()
        }

        pub(super) fn stats(&self) -> CameraStats {
            CameraStats {
                frames_captured: self.frame_count,
                device: self.config.device.clone(),
            }
        }

        fn health_grace(&self) -> Duration {
            let base_ms = if self.config.target_fps == 0 {
                2_000
            } else {
                (1000 / self.config.target_fps).saturating_mul(6)
            };
            Duration::from_millis(base_ms.max(2_000) as u64)
        }
    }
}

#[cfg(feature = "capture-v4l2")]
use device::DeviceCamera;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn camera_produces_frames_with_monotonic_sequences() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_eq!(first.width(), 64);
        assert_eq!(first.height(), 48);
        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);

        Ok(())
    }

    #[test]
    fn read_before_connect_is_an_error() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn injected_failures_skip_reads_without_sequence_gaps() -> Result<()> {
        let mut source = CameraSource::new(CameraConfig {
            fail_every: Some(3),
            ..stub_config()
        })?;
        source.connect()?;

        let mut seqs = Vec::new();
        for _ in 0..9 {
            if let Some(frame) = source.next_frame()? {
                seqs.push(frame.seq());
            }
        }

        // Reads 3, 6 and 9 fail; the counter only advances on success.
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(source.stats().frames_captured, 6);
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_stops_reads() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;
        assert!(source.is_healthy());

        source.release();
        source.release();
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn empty_device_path_is_rejected() {
        let config = CameraConfig {
            device: "  ".to_string(),
            ..CameraConfig::default()
        };
        assert!(CameraSource::new(config).is_err());
    }
}
