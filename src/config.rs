//! Configuration management for castplay
//!
//! Handles settings file loading and debounced, crash-safe saving.
//! Settings are stored at ~/.config/castplay/settings.json

use crate::settings::{Settings, SettingsPatch};
use serde_json::error::Category;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Quiet period before a settings change hits the disk
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Errors from settings persistence
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Settings writer lock poisoned")]
    Poisoned,
}

/// Persistence outcome, delivered to whoever listens on the store's channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Saved { generation: u64 },
    SaveFailed { generation: u64, reason: String },
}

// =============================================================================
// Debounce Timer
// =============================================================================

/// Single-flight delayed task: arming it again cancels the armed task.
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel whatever is armed and run `task` on the blocking pool once the
    /// delay elapses. Returns false (arming nothing) outside a tokio runtime.
    pub fn schedule<F>(&mut self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let Ok(runtime) = Handle::try_current() else {
            return false;
        };

        let delay = self.delay;
        self.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!(error = %e, "debounced task failed");
            }
        }));
        true
    }

    /// Cancel the armed task, if any. A task already past its delay still
    /// finishes its blocking part.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =============================================================================
// Settings File
// =============================================================================

#[derive(Debug, Default)]
struct WriteState {
    /// Generation of the settings currently on disk
    written_generation: u64,
    writes: u64,
}

/// The on-disk file, shared between the store and its timer tasks
#[derive(Debug)]
struct SettingsFile {
    path: PathBuf,
    state: Mutex<WriteState>,
}

impl SettingsFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(WriteState::default()),
        }
    }

    /// Write `settings` unless the file already holds this generation or a
    /// newer one. Returns whether a write happened.
    fn write(&self, generation: u64, settings: &Settings) -> Result<bool, ConfigError> {
        let mut state = self.state.lock().map_err(|_| ConfigError::Poisoned)?;
        if state.written_generation >= generation {
            return Ok(false);
        }

        write_atomic(&self.path, settings)?;
        state.written_generation = generation;
        state.writes += 1;
        Ok(true)
    }

    fn written_generation(&self) -> u64 {
        self.state
            .lock()
            .map(|s| s.written_generation)
            .unwrap_or_default()
    }

    fn writes(&self) -> u64 {
        self.state.lock().map(|s| s.writes).unwrap_or_default()
    }
}

/// Write to a sibling temp file, fsync, then rename over the target
fn write_atomic(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(settings)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path).map_err(io_err)?;
    file.write_all(json.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(io_err)
}

/// Read settings, falling back to `defaults` on any problem
fn read_settings(path: &Path, defaults: &Settings) -> Settings {
    match fs::read_to_string(path) {
        Ok(text) => match Settings::from_json_lenient(&text, defaults.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                let kind = match e.classify() {
                    Category::Syntax | Category::Eof => "malformed",
                    _ => "invalid",
                };
                warn!(path = %path.display(), error = %e, "{} settings file, using defaults", kind);
                defaults.clone()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            defaults.clone()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read settings, using defaults");
            defaults.clone()
        }
    }
}

// =============================================================================
// Config Store
// =============================================================================

/// Owns the in-memory settings and their debounced persistence.
///
/// The in-memory copy is authoritative: a failed write never rolls it back,
/// and the unsaved state goes out with the next debounced write or `flush`.
#[derive(Debug)]
pub struct ConfigStore {
    file: Arc<SettingsFile>,
    settings: Settings,
    defaults: Settings,
    /// Bumped on every effective change
    generation: u64,
    timer: DebounceTimer,
    events: Option<UnboundedSender<StoreEvent>>,
}

impl ConfigStore {
    /// Get config file path (~/.config/castplay/settings.json)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("castplay").join("settings.json"))
    }

    /// Open the store at `path`, loading what is there
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_defaults(path, Settings::default())
    }

    /// Open with custom defaults (e.g. derived from the GPU)
    pub fn open_with_defaults(path: impl Into<PathBuf>, defaults: Settings) -> Self {
        let file = Arc::new(SettingsFile::new(path.into()));
        let settings = read_settings(&file.path, &defaults);
        info!(path = %file.path.display(), "settings loaded");

        Self {
            file,
            settings,
            defaults,
            generation: 0,
            timer: DebounceTimer::new(DEFAULT_DEBOUNCE),
            events: None,
        }
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.timer = DebounceTimer::new(delay);
        self
    }

    /// Deliver persistence outcomes on `events`
    pub fn with_events(mut self, events: UnboundedSender<StoreEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Read the persisted settings. Never fails: a missing or malformed
    /// file yields validated defaults.
    pub fn load(&self) -> Settings {
        read_settings(&self.file.path, &self.defaults)
    }

    /// Merge and validate `patch`, then schedule a debounced write
    pub fn update(&mut self, patch: SettingsPatch) -> Settings {
        let before = self.settings.clone();
        self.settings.apply(patch);

        if self.settings != before {
            self.generation += 1;
            self.schedule_write();
        }
        self.settings.clone()
    }

    /// Replace everything with the defaults and schedule a write
    pub fn reset(&mut self) -> Settings {
        if self.settings != self.defaults {
            self.settings = self.defaults.clone();
            self.generation += 1;
            self.schedule_write();
        }
        self.settings.clone()
    }

    /// Whether in-memory settings are newer than the file
    pub fn is_dirty(&self) -> bool {
        self.file.written_generation() < self.generation
    }

    /// Number of completed disk writes
    pub fn persisted_writes(&self) -> u64 {
        self.file.writes()
    }

    /// Cancel the pending timer and write unsaved settings before returning.
    /// Safe to call repeatedly and with nothing pending.
    pub fn flush(&mut self) -> Result<(), ConfigError> {
        self.timer.cancel();
        if !self.is_dirty() {
            return Ok(());
        }

        let generation = self.generation;
        let result = self.file.write(generation, &self.settings);
        report(self.events.as_ref(), generation, &result);
        result.map(|_| ())
    }

    fn schedule_write(&mut self) {
        let file = Arc::clone(&self.file);
        let snapshot = self.settings.clone();
        let generation = self.generation;
        let events = self.events.clone();

        let armed = self.timer.schedule(move || {
            let result = file.write(generation, &snapshot);
            report(events.as_ref(), generation, &result);
        });

        if !armed {
            debug!(generation, "no async runtime, settings write waits for flush");
        }
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "settings not saved on shutdown");
        }
    }
}

fn report(
    events: Option<&UnboundedSender<StoreEvent>>,
    generation: u64,
    result: &Result<bool, ConfigError>,
) {
    let event = match result {
        Ok(true) => {
            debug!(generation, "settings saved");
            StoreEvent::Saved { generation }
        }
        Ok(false) => {
            debug!(generation, "settings write superseded");
            return;
        }
        Err(e) => {
            warn!(generation, error = %e, "settings write failed");
            StoreEvent::SaveFailed {
                generation,
                reason: e.to_string(),
            }
        }
    };

    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
