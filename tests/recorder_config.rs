use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use rtsp_clip_recorder::config::RecorderConfig;
use rtsp_clip_recorder::ClipFormat;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RECORDER_CONFIG",
        "RECORDER_SOURCE_URL",
        "RECORDER_OUTPUT_DIR",
        "RECORDER_CLIP_COUNT",
        "RECORDER_CLIP_SECS",
        "RECORDER_FPS",
        "RECORDER_BITRATE",
        "RECORDER_CLIP_FORMAT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "source": {
                "locator": "rtsp://camera-1/stream",
                "target_frame_rate": 25
            },
            "recording": {
                "output_dir": "/var/lib/recorder/clips",
                "clip_count": 4,
                "clip_duration_secs": 2.5,
                "bitrate": 4000000,
                "inter_clip_pause_ms": 100,
                "preview": false
            },
            "live": {
                "reconnect_delay_ms": 2000
            }
        }"#,
    );

    std::env::set_var("RECORDER_CONFIG", file.path());
    std::env::set_var("RECORDER_CLIP_COUNT", "6");
    std::env::set_var("RECORDER_SOURCE_URL", "stub://override");

    let cfg = RecorderConfig::load().expect("load config");

    assert_eq!(cfg.source_locator, "stub://override");
    assert_eq!(cfg.target_frame_rate, 25.0);
    assert_eq!(cfg.output_dir, PathBuf::from("/var/lib/recorder/clips"));
    assert_eq!(cfg.clip_count, 6);
    assert_eq!(cfg.clip_duration, Duration::from_millis(2500));
    assert_eq!(cfg.bitrate, 4_000_000);
    assert_eq!(cfg.inter_clip_pause, Duration::from_millis(100));
    assert!(!cfg.preview_while_recording);
    assert_eq!(cfg.reconnect_delay, Some(Duration::from_secs(2)));
    assert_eq!(cfg.clip_format, ClipFormat::Rclip);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RecorderConfig::load().expect("load defaults");
    assert_eq!(cfg, RecorderConfig::default());
    assert_eq!(cfg.source_locator, "stub://camera");
    assert_eq!(cfg.target_frame_rate, 30.0);
    assert_eq!(cfg.bitrate, 2_000_000);
    assert_eq!(cfg.reconnect_delay, None);
}

#[test]
fn explicit_path_wins_over_environment_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let ignored = write_config(r#"{"recording": {"clip_count": 9}}"#);
    let chosen = write_config(r#"{"recording": {"clip_count": 2}}"#);
    std::env::set_var("RECORDER_CONFIG", ignored.path());

    let cfg = RecorderConfig::load_from(Some(chosen.path())).expect("load config");
    assert_eq!(cfg.clip_count, 2);

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("RECORDER_CLIP_COUNT", "three"),
        ("RECORDER_CLIP_COUNT", "0"),
        ("RECORDER_CLIP_SECS", "-2"),
        ("RECORDER_FPS", "0"),
        ("RECORDER_BITRATE", "fast"),
        ("RECORDER_CLIP_FORMAT", "avi"),
        ("RECORDER_SOURCE_URL", "ftp://camera/stream"),
    ] {
        std::env::set_var(key, value);
        assert!(
            RecorderConfig::load().is_err(),
            "{key}={value} should be rejected"
        );
        std::env::remove_var(key);
    }

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"recording": {"clip_count": "lots"}}"#);
    let err = RecorderConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    let missing = RecorderConfig::load_from(Some(std::path::Path::new(
        "/definitely/not/here/recorder.json",
    )));
    assert!(missing.is_err());
}
