use audiocache::settings::{AppSettings, load_settings, save_settings};
use std::fs;
use std::time::Duration;

#[test]
fn settings_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path();

    let s = AppSettings {
        path_prefix: "/player/".to_owned(),
        audio_cache_limit: 50,
        max_parallel_loads: 3,
        api_cache_max_age_secs: Some(600),
        ..AppSettings::default()
    };
    save_settings(data_dir, &s).expect("save_settings");

    let loaded = load_settings(data_dir);
    assert_eq!(loaded.path_prefix, "/player/");
    assert_eq!(loaded.audio_cache_limit, 50);
    assert_eq!(loaded.max_parallel_loads, 3);

    let worker = loaded.worker_config();
    assert_eq!(worker.path_prefix, "/player/");
    assert_eq!(worker.audio_cache_limit, 50);
    assert_eq!(worker.api_cache_max_age, Some(Duration::from_secs(600)));

    let queue = loaded.queue_config();
    assert_eq!(queue.max_parallel_loads, 3);
    assert_eq!(queue.path_prefix, "/player/");
}

#[test]
fn settings_missing_fields_use_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path();
    fs::write(data_dir.join("settings.json"), br#"{"audio_cache_limit": 7}"#).expect("write");

    let loaded = load_settings(data_dir);
    assert_eq!(loaded.audio_cache_limit, 7);
    assert_eq!(loaded.queue_capacity, AppSettings::default().queue_capacity);
    assert_eq!(loaded.path_prefix, "/");
}

#[test]
fn settings_corrupt_file_falls_back_to_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path();
    fs::create_dir_all(data_dir).expect("create_dir_all");
    fs::write(data_dir.join("settings.json"), b"{not-json").expect("write");

    let loaded = load_settings(data_dir);
    assert_eq!(loaded.audio_cache_limit, AppSettings::default().audio_cache_limit);
}

#[test]
fn settings_invalid_prefix_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = AppSettings {
        path_prefix: "player".to_owned(),
        ..AppSettings::default()
    };
    assert!(save_settings(dir.path(), &s).is_err());
}
