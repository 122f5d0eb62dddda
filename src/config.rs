use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::capture::CameraConfig;
use crate::classify::ClassifyOptions;

const DEFAULT_CAMERA_DEVICE: &str = "stub://front_camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_TICK_MS: u64 = 10;
const DEFAULT_SUBMISSION_PERIOD: u32 = 15;
const DEFAULT_DETECTOR_BACKEND: &str = "opencv";

/// Pipeline loop configuration, fixed at construction.
///
/// A malformed configuration cannot safely degrade, so `validate` is
/// called before the loop starts and failures are fatal.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Wall-clock spacing of control-loop ticks.
    pub tick_interval: Duration,
    /// Number of ticks between eligible classification submissions.
    pub submission_period: u32,
    /// Flip frames horizontally before emission.
    pub mirror: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            submission_period: DEFAULT_SUBMISSION_PERIOD,
            mirror: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.submission_period == 0 {
            return Err(anyhow!("submission period must be greater than zero"));
        }
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct AtferdConfigFile {
    camera: Option<CameraConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    classifier: Option<ClassifierConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    tick_interval_ms: Option<u64>,
    submission_period: Option<u32>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    enforce_detection: Option<bool>,
    detector_backend: Option<String>,
}

/// Daemon configuration: JSON file named by `ATFER_CONFIG`, then
/// environment overrides, then validation.
#[derive(Clone, Debug)]
pub struct AtferdConfig {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub classifier: ClassifyOptions,
}

impl AtferdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ATFER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AtferdConfigFile) -> Self {
        let camera = CameraConfig {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fail_every: None,
        };
        let pipeline = PipelineConfig {
            tick_interval: Duration::from_millis(
                file.pipeline
                    .as_ref()
                    .and_then(|pipeline| pipeline.tick_interval_ms)
                    .unwrap_or(DEFAULT_TICK_MS),
            ),
            submission_period: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.submission_period)
                .unwrap_or(DEFAULT_SUBMISSION_PERIOD),
            mirror: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.mirror)
                .unwrap_or(true),
        };
        let classifier = ClassifyOptions {
            enforce_detection: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.enforce_detection)
                .unwrap_or(false),
            detector_backend: file
                .classifier
                .and_then(|classifier| classifier.detector_backend)
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
        };
        Self {
            camera,
            pipeline,
            classifier,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("ATFER_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(tick_ms) = std::env::var("ATFER_TICK_MS") {
            let millis: u64 = tick_ms
                .parse()
                .map_err(|_| anyhow!("ATFER_TICK_MS must be an integer number of milliseconds"))?;
            self.pipeline.tick_interval = Duration::from_millis(millis);
        }
        if let Ok(period) = std::env::var("ATFER_SUBMISSION_PERIOD") {
            let period: u32 = period
                .parse()
                .map_err(|_| anyhow!("ATFER_SUBMISSION_PERIOD must be an integer tick count"))?;
            self.pipeline.submission_period = period;
        }
        if let Ok(mirror) = std::env::var("ATFER_MIRROR") {
            let mirror: bool = mirror
                .parse()
                .map_err(|_| anyhow!("ATFER_MIRROR must be true or false"))?;
            self.pipeline.mirror = mirror;
        }
        if let Ok(enforce) = std::env::var("ATFER_ENFORCE_DETECTION") {
            let enforce: bool = enforce
                .parse()
                .map_err(|_| anyhow!("ATFER_ENFORCE_DETECTION must be true or false"))?;
            self.classifier.enforce_detection = enforce;
        }
        if let Ok(backend) = std::env::var("ATFER_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.classifier.detector_backend = backend;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if self.classifier.detector_backend.trim().is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AtferdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_submission_period_is_rejected() {
        let config = PipelineConfig {
            submission_period: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let config = PipelineConfig {
            tick_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
