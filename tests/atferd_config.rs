use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use atfer_core::config::AtferdConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ATFER_CONFIG",
        "ATFER_CAMERA_DEVICE",
        "ATFER_TICK_MS",
        "ATFER_SUBMISSION_PERIOD",
        "ATFER_MIRROR",
        "ATFER_ENFORCE_DETECTION",
        "ATFER_DETECTOR_BACKEND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "device": "stub://bench_camera",
            "target_fps": 15,
            "width": 320,
            "height": 240
        },
        "pipeline": {
            "tick_interval_ms": 33,
            "submission_period": 10,
            "mirror": false
        },
        "classifier": {
            "enforce_detection": true,
            "detector_backend": "retinaface"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("ATFER_CONFIG", file.path());
    std::env::set_var("ATFER_CAMERA_DEVICE", "stub://override_camera");
    std::env::set_var("ATFER_SUBMISSION_PERIOD", "20");

    let cfg = AtferdConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://override_camera");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.camera.width, 320);
    assert_eq!(cfg.camera.height, 240);
    assert_eq!(cfg.pipeline.tick_interval, Duration::from_millis(33));
    assert_eq!(cfg.pipeline.submission_period, 20);
    assert!(!cfg.pipeline.mirror);
    assert!(cfg.classifier.enforce_detection);
    assert_eq!(cfg.classifier.detector_backend, "retinaface");

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AtferdConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://front_camera");
    assert_eq!(cfg.camera.width, 640);
    assert_eq!(cfg.camera.height, 480);
    assert_eq!(cfg.pipeline.tick_interval, Duration::from_millis(10));
    assert_eq!(cfg.pipeline.submission_period, 15);
    assert!(cfg.pipeline.mirror);
    assert!(!cfg.classifier.enforce_detection);
    assert_eq!(cfg.classifier.detector_backend, "opencv");
}

#[test]
fn rejects_zero_submission_period() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ATFER_SUBMISSION_PERIOD", "0");
    assert!(AtferdConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_env_integers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ATFER_TICK_MS", "soon");
    assert!(AtferdConfig::load().is_err());

    clear_env();
}
