//! Camera frame sources.
//!
//! This module provides the sources the pipeline captures frames from:
//! - Local V4L2 devices (feature: capture-v4l2)
//! - Synthetic stub source (`stub://` paths, testing and demos)
//!
//! All sources produce `Frame` instances with capture-time sequence
//! numbers. The capture layer is responsible for:
//! - Assigning strictly monotonic sequence numbers on successful reads
//! - Keeping device reads bounded so the control thread's tick length
//!   stays predictable
//! - Degrading transient device failures to "no frame this tick" instead
//!   of failing the pipeline

mod camera;

pub use camera::{CameraConfig, CameraSource, CameraStats};
