//! User settings model and validation
//!
//! `Settings` always holds valid values. Every change goes through a
//! `SettingsPatch` which is clamped or rejected field by field before it is
//! merged, so a bad value never reaches the store or the disk.

use crate::models::{GpuInfo, LoopMode, PlayMode};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

/// Allowed window width (inclusive)
pub const WINDOW_WIDTH_RANGE: (i64, i64) = (400, 10_000);
/// Allowed window height (inclusive)
pub const WINDOW_HEIGHT_RANGE: (i64, i64) = (300, 10_000);
/// Smallest accepted cache size
pub const MIN_CACHE_SIZE_GB: i64 = 1;

// =============================================================================
// Settings
// =============================================================================

/// Persisted user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub last_directory: PathBuf,
    /// 0.0 - 1.0
    pub volume: f64,
    pub window_width: u32,
    pub window_height: u32,
    /// Preferred cast receiver name
    pub cast_device: Option<String>,
    pub play_mode: PlayMode,
    pub loop_mode: LoopMode,
    /// Equalizer preset name
    pub equalizer: Option<String>,
    pub hardware_acceleration: bool,
    /// Remux containers the receiver cannot play (mkv -> mp4) before casting
    pub auto_convert_container: bool,
    #[serde(rename = "cacheSizeGB")]
    pub cache_size_gb: u32,
    /// Subtitle languages in preference order
    pub subtitle_languages: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_directory: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            volume: 1.0,
            window_width: 1000,
            window_height: 700,
            cast_device: None,
            play_mode: PlayMode::Local,
            loop_mode: LoopMode::None,
            equalizer: None,
            hardware_acceleration: true,
            auto_convert_container: true,
            cache_size_gb: 10,
            subtitle_languages: vec!["en".to_string()],
        }
    }
}

impl Settings {
    /// Defaults with hardware decoding decided by the detected GPU
    pub fn defaults_for(gpu: &GpuInfo) -> Self {
        Self {
            hardware_acceleration: gpu.supports_hardware_decoding(),
            ..Self::default()
        }
    }

    /// Parse a persisted settings document on top of `base`.
    ///
    /// Unknown keys are ignored, missing keys keep the `base` value and a key
    /// holding the wrong JSON type is skipped with a warning. Only a document
    /// that is not a JSON object is an error.
    pub fn from_json_lenient(text: &str, base: Settings) -> Result<Settings, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(serde::de::Error::custom("settings root is not a JSON object"));
        };

        let mut settings = base;
        settings.apply(SettingsPatch::from_json_map(&map));
        Ok(settings)
    }

    /// Merge a patch, validating every field it carries
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(dir) = patch.last_directory {
            if dir.as_os_str().is_empty() {
                warn!("ignoring empty lastDirectory");
            } else {
                self.last_directory = dir;
            }
        }

        if let Some(volume) = patch.volume {
            if volume.is_finite() {
                self.volume = volume.clamp(0.0, 1.0);
            } else {
                warn!(volume, "ignoring non-finite volume");
            }
        }

        if let Some(width) = patch.window_width {
            self.window_width = width.clamp(WINDOW_WIDTH_RANGE.0, WINDOW_WIDTH_RANGE.1) as u32;
        }

        if let Some(height) = patch.window_height {
            self.window_height = height.clamp(WINDOW_HEIGHT_RANGE.0, WINDOW_HEIGHT_RANGE.1) as u32;
        }

        if let Some(device) = patch.cast_device {
            self.cast_device = non_blank(device);
        }

        if let Some(mode) = patch.play_mode {
            self.play_mode = mode;
        }

        if let Some(mode) = patch.loop_mode {
            self.loop_mode = mode;
        }

        if let Some(preset) = patch.equalizer {
            self.equalizer = non_blank(preset);
        }

        if let Some(enabled) = patch.hardware_acceleration {
            self.hardware_acceleration = enabled;
        }

        if let Some(enabled) = patch.auto_convert_container {
            self.auto_convert_container = enabled;
        }

        if let Some(size) = patch.cache_size_gb {
            self.cache_size_gb = size.clamp(MIN_CACHE_SIZE_GB, u32::MAX as i64) as u32;
        }

        if let Some(languages) = patch.subtitle_languages {
            self.subtitle_languages = normalize_languages(&languages);
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn language_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]{2,3}(-[a-z]{2})?$").expect("static regex"))
}

/// Lowercase, drop malformed codes and collapse duplicates (first wins)
pub fn normalize_languages(languages: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for code in languages {
        let code = code.trim().to_lowercase();
        if !language_pattern().is_match(&code) {
            warn!(code = %code, "dropping malformed subtitle language code");
            continue;
        }
        if !normalized.contains(&code) {
            normalized.push(code);
        }
    }
    normalized
}

// =============================================================================
// Settings Patch
// =============================================================================

/// Partial settings update. `None` leaves a field untouched; the nested
/// options of `cast_device`/`equalizer` distinguish "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub last_directory: Option<PathBuf>,
    pub volume: Option<f64>,
    pub window_width: Option<i64>,
    pub window_height: Option<i64>,
    pub cast_device: Option<Option<String>>,
    pub play_mode: Option<PlayMode>,
    pub loop_mode: Option<LoopMode>,
    pub equalizer: Option<Option<String>>,
    pub hardware_acceleration: Option<bool>,
    pub auto_convert_container: Option<bool>,
    pub cache_size_gb: Option<i64>,
    pub subtitle_languages: Option<Vec<String>>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.last_directory = Some(dir.into());
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn window_size(mut self, width: i64, height: i64) -> Self {
        self.window_width = Some(width);
        self.window_height = Some(height);
        self
    }

    pub fn window_width(mut self, width: i64) -> Self {
        self.window_width = Some(width);
        self
    }

    pub fn window_height(mut self, height: i64) -> Self {
        self.window_height = Some(height);
        self
    }

    pub fn cast_device(mut self, device: Option<String>) -> Self {
        self.cast_device = Some(device);
        self
    }

    pub fn play_mode(mut self, mode: PlayMode) -> Self {
        self.play_mode = Some(mode);
        self
    }

    pub fn loop_mode(mut self, mode: LoopMode) -> Self {
        self.loop_mode = Some(mode);
        self
    }

    pub fn equalizer(mut self, preset: Option<String>) -> Self {
        self.equalizer = Some(preset);
        self
    }

    pub fn hardware_acceleration(mut self, enabled: bool) -> Self {
        self.hardware_acceleration = Some(enabled);
        self
    }

    pub fn auto_convert_container(mut self, enabled: bool) -> Self {
        self.auto_convert_container = Some(enabled);
        self
    }

    pub fn cache_size_gb(mut self, size: i64) -> Self {
        self.cache_size_gb = Some(size);
        self
    }

    pub fn subtitle_languages<S: Into<String>>(mut self, languages: impl IntoIterator<Item = S>) -> Self {
        self.subtitle_languages = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Build a patch from a JSON object, accepting legacy snake_case keys
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        Self {
            last_directory: field(map, &["lastDirectory", "last_directory"]),
            volume: field(map, &["volume"]),
            window_width: field(map, &["windowWidth", "window_width"]),
            window_height: field(map, &["windowHeight", "window_height"]),
            cast_device: nullable_field(map, &["castDevice", "chromecast_device", "cast_device"]),
            play_mode: field(map, &["playMode", "play_mode"]),
            loop_mode: field(map, &["loopMode", "loop_mode"]),
            equalizer: nullable_field(map, &["equalizer"]),
            hardware_acceleration: field(map, &["hardwareAcceleration", "hardware_acceleration"]),
            auto_convert_container: field(
                map,
                &["autoConvertContainer", "auto_convert_mkv", "auto_convert_container"],
            ),
            cache_size_gb: field(map, &["cacheSizeGB", "cache_size_gb"]),
            subtitle_languages: field(map, &["subtitleLanguages", "subtitle_languages"]),
        }
    }

    /// Parse a `key=value` pair as typed on the command line
    pub fn from_key_value(key: &str, raw: &str) -> Result<Self, String> {
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        let mut map = Map::new();
        map.insert(key.to_string(), value);

        let patch = Self::from_json_map(&map);
        if patch.is_empty() {
            return Err(format!("unknown or invalid setting: {}={}", key, raw));
        }
        Ok(patch)
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
    keys.iter()
        .find_map(|key| map.get_key_value(*key))
        .map(|(k, v)| (k.as_str(), v))
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, keys: &[&str]) -> Option<T> {
    let (key, value) = lookup(map, keys)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, error = %e, "ignoring setting with invalid type");
            None
        }
    }
}

fn nullable_field(map: &Map<String, Value>, keys: &[&str]) -> Option<Option<String>> {
    let (key, value) = lookup(map, keys)?;
    match value {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        other => {
            warn!(key, value = %other, "ignoring setting with invalid type");
            None
        }
    }
}
