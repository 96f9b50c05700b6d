//! Data structures and types for castplay
//!
//! Contains the shared models used across the playback core organized by domain:
//! - **Playback**: play/loop modes, session snapshot
//! - **Playlist**: playlist items and canonical playable references
//! - **Subtitles**: subtitle candidates and formats
//! - **Cast**: receiver info and `catt` status parsing
//! - **Hardware**: GPU facts used to pick decoding defaults

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

// =============================================================================
// Playback Modes
// =============================================================================

/// Where playback happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    /// Local renderer (mpv)
    #[default]
    Local,
    /// Network cast receiver
    Cast,
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayMode::Local => write!(f, "local"),
            PlayMode::Cast => write!(f, "cast"),
        }
    }
}

/// Playlist repeat behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Stop at the ends of the playlist
    #[default]
    #[serde(alias = "NONE", alias = "None")]
    None,
    /// Repeat the current item
    #[serde(alias = "ONE", alias = "One")]
    One,
    /// Wrap around the playlist
    #[serde(alias = "ALL", alias = "All")]
    All,
}

impl LoopMode {
    /// Cycle none -> all -> one -> none (toolbar button order)
    pub fn cycle(self) -> Self {
        match self {
            LoopMode::None => LoopMode::All,
            LoopMode::All => LoopMode::One,
            LoopMode::One => LoopMode::None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::None => write!(f, "none"),
            LoopMode::One => write!(f, "one"),
            LoopMode::All => write!(f, "all"),
        }
    }
}

// =============================================================================
// Playable References
// =============================================================================

/// Kind of a canonical playable reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Local,
    Remote,
}

/// Validated, normalized form of a user supplied path or URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PlayableRef {
    /// Local filesystem path (existence is checked by the caller)
    Local(PathBuf),
    /// Remote http(s) URL with a host
    Remote(Url),
}

impl PlayableRef {
    pub fn kind(&self) -> MediaKind {
        match self {
            PlayableRef::Local(_) => MediaKind::Local,
            PlayableRef::Remote(_) => MediaKind::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, PlayableRef::Remote(_))
    }

    /// Local path, if this reference points at a file
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            PlayableRef::Local(path) => Some(path),
            PlayableRef::Remote(_) => None,
        }
    }

    /// String form handed to sinks (path or URL)
    pub fn value(&self) -> String {
        match self {
            PlayableRef::Local(path) => path.to_string_lossy().into_owned(),
            PlayableRef::Remote(url) => url.as_str().to_string(),
        }
    }
}

impl fmt::Display for PlayableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayableRef::Local(path) => write!(f, "{}", path.display()),
            PlayableRef::Remote(url) => write!(f, "{}", url),
        }
    }
}

// =============================================================================
// Playlist Models
// =============================================================================

/// One playlist entry. Identity is `path`; `display` is a derived label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Absolute local path or URL
    pub path: String,
    /// Human readable label (may repeat across items)
    pub display: String,
}

impl PlaylistItem {
    pub fn new(path: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display: display.into(),
        }
    }

    /// Build an item from a canonical reference, deriving the label
    pub fn from_ref(media: &PlayableRef) -> Self {
        let display = match media {
            PlayableRef::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            PlayableRef::Remote(url) => display_for_url(url),
        };
        Self::new(media.value(), display)
    }
}

impl fmt::Display for PlaylistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

/// Last non-empty path segment (percent-decoded), falling back to the host
fn display_for_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        });

    segment
        .or_else(|| url.host_str().map(String::from))
        .unwrap_or_else(|| url.as_str().to_string())
}

// =============================================================================
// Session Models
// =============================================================================

/// Snapshot of the playback session owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub mode: PlayMode,
    pub active_receiver: Option<String>,
    pub current_item: Option<PlaylistItem>,
    pub position_ms: u64,
    pub is_playing: bool,
    pub subtitles: Vec<SubtitleCandidate>,
}

impl PlaybackSession {
    /// Position as HH:MM:SS or MM:SS
    pub fn format_position(&self) -> String {
        format_duration(Duration::from_millis(self.position_ms))
    }
}

// =============================================================================
// Subtitle Models
// =============================================================================

/// Subtitle file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubFormat {
    Srt,
    Ass,
    Ssa,
    WebVtt,
    Sub,
}

impl SubFormat {
    /// Extensions probed next to a video, in lookup order
    pub const LOOKUP_ORDER: [SubFormat; 5] = [
        SubFormat::Srt,
        SubFormat::Ass,
        SubFormat::Ssa,
        SubFormat::WebVtt,
        SubFormat::Sub,
    ];

    /// Parse format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "srt" => Some(SubFormat::Srt),
            "ass" => Some(SubFormat::Ass),
            "ssa" => Some(SubFormat::Ssa),
            "vtt" | "webvtt" => Some(SubFormat::WebVtt),
            "sub" => Some(SubFormat::Sub),
            _ => None,
        }
    }

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            SubFormat::Srt => "srt",
            SubFormat::Ass => "ass",
            SubFormat::Ssa => "ssa",
            SubFormat::WebVtt => "vtt",
            SubFormat::Sub => "sub",
        }
    }
}

impl fmt::Display for SubFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubFormat::Srt => write!(f, "SRT"),
            SubFormat::Ass => write!(f, "ASS"),
            SubFormat::Ssa => write!(f, "SSA"),
            SubFormat::WebVtt => write!(f, "WebVTT"),
            SubFormat::Sub => write!(f, "SUB"),
        }
    }
}

/// Where a subtitle candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleSource {
    /// Found next to the video
    Local,
    /// Fetched from a subtitle provider
    Downloaded,
}

/// A subtitle file usable for the loaded video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCandidate {
    pub path: PathBuf,
    pub language_code: String,
    pub source: SubtitleSource,
}

impl SubtitleCandidate {
    pub fn format(&self) -> Option<SubFormat> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SubFormat::from_extension)
    }
}

impl fmt::Display for SubtitleCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.source {
            SubtitleSource::Local => "local",
            SubtitleSource::Downloaded => "downloaded",
        };
        write!(
            f,
            "[{}] {} ({})",
            self.language_code,
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            origin
        )
    }
}

// =============================================================================
// Cast Models
// =============================================================================

/// Cast receiver discovered on the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastDevice {
    pub id: String,
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

impl CastDevice {
    /// Parse devices from catt scan output
    /// Format: "192.168.1.36 - Device Name - Google Inc. Chromecast"
    pub fn parse_catt_scan(output: &str) -> Vec<CastDevice> {
        let mut devices = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Scanning") || line.contains("No devices") {
                continue;
            }

            let parts: Vec<&str> = line.splitn(3, " - ").collect();
            if parts.len() >= 2 {
                let ip_str = parts[0].trim();
                if let Ok(addr) = ip_str.parse::<IpAddr>() {
                    devices.push(CastDevice {
                        id: ip_str.to_string(),
                        name: parts[1].trim().to_string(),
                        address: addr,
                        port: 8009, // Default Chromecast port
                        model: parts.get(2).map(|m| m.trim().to_string()),
                    });
                }
            }
        }

        devices
    }
}

impl fmt::Display for CastDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{} ({}) - {}", self.name, model, self.address),
            None => write!(f, "{} - {}", self.name, self.address),
        }
    }
}

/// Receiver-side playback state as reported by catt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastState {
    Idle,
    Buffering,
    Playing,
    Paused,
    Stopped,
}

impl CastState {
    /// Parse state from catt status output
    pub fn from_catt_state(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PLAYING" => CastState::Playing,
            "PAUSED" => CastState::Paused,
            "BUFFERING" => CastState::Buffering,
            "STOPPED" => CastState::Stopped,
            _ => CastState::Idle,
        }
    }
}

/// Receiver status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastStatus {
    pub state: CastState,
    pub position: Duration,
    pub duration: Duration,
    pub volume: f32,
}

impl CastStatus {
    /// Parse status from catt status output
    /// Format:
    /// ```text
    /// State: PLAYING
    /// Duration: 10234.5
    /// Current time: 1234.5
    /// Volume: 80
    /// ```
    /// Returns None when the output carries no recognizable field.
    pub fn parse_catt_status(output: &str) -> Option<Self> {
        let mut status = CastStatus {
            state: CastState::Idle,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            volume: 1.0,
        };
        let mut seen = false;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "state" => {
                    status.state = CastState::from_catt_state(value);
                    seen = true;
                }
                "duration" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        status.duration = Duration::from_secs_f64(secs.max(0.0));
                        seen = true;
                    }
                }
                "current time" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        status.position = Duration::from_secs_f64(secs.max(0.0));
                        seen = true;
                    }
                }
                "volume" => {
                    if let Ok(vol) = value.parse::<f32>() {
                        status.volume = (vol / 100.0).clamp(0.0, 1.0); // catt reports 0-100
                        seen = true;
                    }
                }
                _ => {}
            }
        }

        seen.then_some(status)
    }

    pub fn position_ms(&self) -> u64 {
        self.position.as_millis() as u64
    }
}

impl fmt::Display for CastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} / {} ({}%)",
            self.state,
            format_duration(self.position),
            format_duration(self.duration),
            (self.volume * 100.0) as u8
        )
    }
}

// =============================================================================
// Hardware Models
// =============================================================================

/// GPU vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuKind {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl GpuKind {
    /// mpv `--hwdec` backend for this vendor
    pub fn hwdec_backend(&self) -> &'static str {
        match self {
            GpuKind::Nvidia => "nvdec",
            GpuKind::Amd | GpuKind::Intel => "vaapi",
            GpuKind::Unknown => "auto-safe",
        }
    }
}

/// GPU fact supplied by the platform layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    #[serde(rename = "type")]
    pub kind: GpuKind,
    pub name: String,
    #[serde(rename = "vramMB", alias = "vram")]
    pub vram_mb: u32,
}

impl GpuInfo {
    /// Whether hardware decoding should be on by default
    pub fn supports_hardware_decoding(&self) -> bool {
        self.kind != GpuKind::Unknown
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Format a Duration as HH:MM:SS or MM:SS
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Mode Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_loop_mode_accepts_legacy_uppercase() {
        let parsed: LoopMode = serde_json::from_str("\"NONE\"").unwrap();
        assert_eq!(parsed, LoopMode::None);
        let parsed: LoopMode = serde_json::from_str("\"ALL\"").unwrap();
        assert_eq!(parsed, LoopMode::All);
        assert_eq!(serde_json::to_string(&LoopMode::One).unwrap(), "\"one\"");
    }

    #[test]
    fn test_loop_mode_cycle() {
        assert_eq!(LoopMode::None.cycle(), LoopMode::All);
        assert_eq!(LoopMode::All.cycle(), LoopMode::One);
        assert_eq!(LoopMode::One.cycle(), LoopMode::None);
    }

    // -------------------------------------------------------------------------
    // PlaylistItem Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_item_from_local_ref_uses_file_name() {
        let item = PlaylistItem::from_ref(&PlayableRef::Local("/videos/movie.mp4".into()));
        assert_eq!(item.path, "/videos/movie.mp4");
        assert_eq!(item.display, "movie.mp4");
    }

    #[test]
    fn test_item_from_url_decodes_last_segment() {
        let url = Url::parse("https://cdn.example.com/media/My%20Movie.mkv").unwrap();
        let item = PlaylistItem::from_ref(&PlayableRef::Remote(url));
        assert_eq!(item.display, "My Movie.mkv");
        assert_eq!(item.path, "https://cdn.example.com/media/My%20Movie.mkv");
    }

    #[test]
    fn test_item_from_bare_host_url_uses_host() {
        let url = Url::parse("http://example.com/").unwrap();
        let item = PlaylistItem::from_ref(&PlayableRef::Remote(url));
        assert_eq!(item.display, "example.com");
    }

    #[test]
    fn test_playable_ref_serde_shape() {
        let media = PlayableRef::Local("/videos/a.mp4".into());
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["kind"], "local");
        assert_eq!(json["value"], "/videos/a.mp4");
    }

    // -------------------------------------------------------------------------
    // Subtitle Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_sub_format_from_extension() {
        assert_eq!(SubFormat::from_extension(".SRT"), Some(SubFormat::Srt));
        assert_eq!(SubFormat::from_extension("vtt"), Some(SubFormat::WebVtt));
        assert_eq!(SubFormat::from_extension("ssa"), Some(SubFormat::Ssa));
        assert_eq!(SubFormat::from_extension("txt"), None);
    }

    #[test]
    fn test_candidate_format_and_display() {
        let candidate = SubtitleCandidate {
            path: "/videos/movie.de.ass".into(),
            language_code: "de".to_string(),
            source: SubtitleSource::Local,
        };
        assert_eq!(candidate.format(), Some(SubFormat::Ass));
        assert_eq!(candidate.to_string(), "[de] movie.de.ass (local)");
    }

    // -------------------------------------------------------------------------
    // Cast Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_catt_scan() {
        let output = "Scanning Chromecasts...\n192.168.1.50 - Living Room TV - Google Inc. Chromecast\n10.0.0.7 - Bedroom";
        let devices = CastDevice::parse_catt_scan(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Living Room TV");
        assert_eq!(devices[0].model.as_deref(), Some("Google Inc. Chromecast"));
        assert_eq!(devices[1].model, None);
        assert_eq!(devices[1].port, 8009);
    }

    #[test]
    fn test_parse_catt_status() {
        let output = "Title: Movie\nCurrent time: 125.5\nDuration: 3600\nVolume: 80\nState: PAUSED";
        let status = CastStatus::parse_catt_status(output).unwrap();
        assert_eq!(status.state, CastState::Paused);
        assert_eq!(status.position_ms(), 125_500);
        assert!((status.volume - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_catt_status_rejects_noise() {
        assert!(CastStatus::parse_catt_status("Error: no device").is_none());
        assert!(CastStatus::parse_catt_status("").is_none());
    }

    // -------------------------------------------------------------------------
    // Hardware Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_gpu_info_deserializes_fact() {
        let gpu: GpuInfo =
            serde_json::from_str(r#"{"type":"nvidia","name":"GeForce RTX 3080","vram":10240}"#)
                .unwrap();
        assert_eq!(gpu.kind, GpuKind::Nvidia);
        assert_eq!(gpu.vram_mb, 10240);
        assert!(gpu.supports_hardware_decoding());
        assert_eq!(gpu.kind.hwdec_backend(), "nvdec");
        assert!(!GpuInfo::default().supports_hardware_decoding());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
