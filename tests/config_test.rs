//! Config Store Tests
//!
//! Validation, debounced persistence, flush semantics and failure handling
//! of the settings store. Every test works in its own temp directory.

use std::time::Duration;

use castplay::config::{ConfigStore, StoreEvent};
use castplay::models::{GpuInfo, GpuKind, LoopMode, PlayMode};
use castplay::settings::{Settings, SettingsPatch};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn settings_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("settings.json")
}

fn read_json(dir: &TempDir) -> serde_json::Value {
    let text = std::fs::read_to_string(settings_path(dir)).unwrap();
    serde_json::from_str(&text).unwrap()
}

// =============================================================================
// Load
// =============================================================================

#[test]
fn test_load_missing_file_returns_defaults() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(settings_path(&dir));

    assert_eq!(store.load(), Settings::default());
}

#[test]
fn test_load_non_object_returns_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(settings_path(&dir), "[1, 2, 3]").unwrap();

    let store = ConfigStore::open(settings_path(&dir));
    assert_eq!(store.settings(), &Settings::default());
}

#[test]
fn test_load_ignores_unknown_and_clamps_out_of_range() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        settings_path(&dir),
        r#"{
            "volume": 3.5,
            "windowWidth": 50,
            "windowHeight": 99999,
            "cacheSizeGB": 0,
            "loopMode": "all",
            "theme": "dark"
        }"#,
    )
    .unwrap();

    let settings = ConfigStore::open(settings_path(&dir)).load();
    assert_eq!(settings.volume, 1.0);
    assert_eq!(settings.window_width, 400);
    assert_eq!(settings.window_height, 10000);
    assert_eq!(settings.cache_size_gb, 1);
    assert_eq!(settings.loop_mode, LoopMode::All);
    assert_eq!(settings.play_mode, PlayMode::Local);
}

#[test]
fn test_load_accepts_legacy_keys() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        settings_path(&dir),
        r#"{
            "last_directory": "/media/films",
            "chromecast_device": "Living Room",
            "loop_mode": "ONE",
            "auto_convert_mkv": false,
            "cache_size_gb": 25
        }"#,
    )
    .unwrap();

    let settings = ConfigStore::open(settings_path(&dir)).load();
    assert_eq!(settings.last_directory, std::path::PathBuf::from("/media/films"));
    assert_eq!(settings.cast_device.as_deref(), Some("Living Room"));
    assert_eq!(settings.loop_mode, LoopMode::One);
    assert!(!settings.auto_convert_container);
    assert_eq!(settings.cache_size_gb, 25);
}

#[test]
fn test_wrong_typed_field_keeps_default() {
    let dir = TempDir::new().unwrap();
    std::fs::write(settings_path(&dir), r#"{"volume": "loud", "windowWidth": 1280}"#).unwrap();

    let settings = ConfigStore::open(settings_path(&dir)).load();
    assert_eq!(settings.volume, 1.0);
    assert_eq!(settings.window_width, 1280);
}

#[test]
fn test_gpu_decides_hardware_default() {
    let dir = TempDir::new().unwrap();
    let unknown = GpuInfo {
        kind: GpuKind::Unknown,
        name: String::new(),
        vram_mb: 0,
    };
    let store = ConfigStore::open_with_defaults(settings_path(&dir), Settings::defaults_for(&unknown));
    assert!(!store.settings().hardware_acceleration);

    let intel = GpuInfo {
        kind: GpuKind::Intel,
        name: "Iris Xe".into(),
        vram_mb: 128,
    };
    assert!(Settings::defaults_for(&intel).hardware_acceleration);
}

// =============================================================================
// Update / Flush
// =============================================================================

#[test]
fn test_round_trip_changes_only_updated_field() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));
    let before = store.update(SettingsPatch::new().window_size(1280, 720));
    store.flush().unwrap();

    store.update(SettingsPatch::new().volume(0.8));
    store.flush().unwrap();

    let loaded = store.load();
    assert_eq!(loaded.volume, 0.8);
    assert_eq!(
        Settings {
            volume: before.volume,
            ..loaded
        },
        before
    );
}

#[test]
fn test_update_validates_at_the_boundary() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));

    assert_eq!(store.update(SettingsPatch::new().volume(1.5)).volume, 1.0);
    assert_eq!(store.update(SettingsPatch::new().volume(-0.2)).volume, 0.0);
    assert_eq!(store.update(SettingsPatch::new().window_width(50)).window_width, 400);
    assert_eq!(store.update(SettingsPatch::new().cache_size_gb(-3)).cache_size_gb, 1);
    assert_eq!(store.update(SettingsPatch::new().volume(f64::NAN)).volume, 0.0);
}

#[test]
fn test_update_normalizes_subtitle_languages() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));
    let settings = store.update(SettingsPatch::new().subtitle_languages(["DE", "en", "de", "english", "pt-br"]));

    assert_eq!(settings.subtitle_languages, vec!["de", "en", "pt-br"]);
}

#[test]
fn test_flush_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));

    store.flush().unwrap();
    assert_eq!(store.persisted_writes(), 0);

    store.update(SettingsPatch::new().loop_mode(LoopMode::All));
    store.flush().unwrap();
    store.flush().unwrap();
    assert_eq!(store.persisted_writes(), 1);
}

#[test]
fn test_written_file_uses_camel_case_keys() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));
    store.update(SettingsPatch::new().cast_device(Some("Kitchen".into())).cache_size_gb(20));
    store.flush().unwrap();

    let json = read_json(&dir);
    assert_eq!(json["castDevice"], "Kitchen");
    assert_eq!(json["cacheSizeGB"], 20);
    assert_eq!(json["playMode"], "local");
    assert!(json.get("cast_device").is_none());
}

#[test]
fn test_reset_restores_defaults() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));
    store.update(SettingsPatch::new().volume(0.2));
    store.flush().unwrap();

    assert_eq!(store.reset(), Settings::default());
    store.flush().unwrap();
    assert_eq!(store.load(), Settings::default());
}

// =============================================================================
// Debounce
// =============================================================================

#[tokio::test]
async fn test_updates_within_window_coalesce_into_one_write() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir));

    store.update(SettingsPatch::new().volume(0.3));
    store.update(SettingsPatch::new().window_width(1600));
    store.update(SettingsPatch::new().volume(0.7));
    store.flush().unwrap();

    assert_eq!(store.persisted_writes(), 1);
    let saved = store.load();
    assert_eq!(saved.volume, 0.7);
    assert_eq!(saved.window_width, 1600);
}

#[tokio::test]
async fn test_timer_writes_after_quiet_period() {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::open(settings_path(&dir)).with_debounce(Duration::from_millis(30));

    store.update(SettingsPatch::new().volume(0.25));
    store.update(SettingsPatch::new().volume(0.5));
    assert_eq!(store.persisted_writes(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(store.persisted_writes(), 1);
    assert!(!store.is_dirty());
    assert_eq!(read_json(&dir)["volume"], 0.5);
}

#[tokio::test]
async fn test_store_reports_saves_on_channel() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut store = ConfigStore::open(settings_path(&dir)).with_events(tx);

    store.update(SettingsPatch::new().equalizer(Some("rock".into())));
    store.flush().unwrap();

    assert!(matches!(rx.recv().await, Some(StoreEvent::Saved { .. })));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_write_failure_keeps_memory_and_reports() {
    let dir = TempDir::new().unwrap();
    // A regular file where the settings directory should be
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut store = ConfigStore::open(blocker.join("settings.json")).with_events(tx);
    store.update(SettingsPatch::new().volume(0.6));

    assert!(store.flush().is_err());
    assert_eq!(store.settings().volume, 0.6);
    assert!(store.is_dirty());
    assert!(matches!(
        rx.recv().await,
        Some(StoreEvent::SaveFailed { .. })
    ));
}

#[test]
fn test_drop_flushes_pending_write() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = ConfigStore::open(settings_path(&dir));
        store.update(SettingsPatch::new().hardware_acceleration(false));
    }

    let reopened = ConfigStore::open(settings_path(&dir));
    assert!(!reopened.settings().hardware_acceleration);
}
