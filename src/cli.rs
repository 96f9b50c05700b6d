//! CLI - Command Line Interface for castplay
//!
//! Every subcommand is scriptable and all output is JSON-parseable with
//! `--json` (the default when stdout is not a terminal).
//!
//! # Examples
//!
//! ```bash
//! # Play files locally, looping the whole list
//! castplay play movie.mkv https://example.com/trailer.mp4 --loop all
//!
//! # Start on a cast receiver
//! castplay play movie.mkv --device "Living Room TV"
//!
//! # Settings
//! castplay config show
//! castplay config set volume 0.6
//! ```

use castplay::events::Intent;
use castplay::models::{GpuInfo, GpuKind, LoopMode};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Device not found
    DeviceNotFound = 4,
    /// Nothing playable
    NothingToPlay = 5,
    /// Cast failed
    CastFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// castplay - play local files and URLs, locally or on a cast receiver
#[derive(Parser, Debug)]
#[command(
    name = "castplay",
    version,
    author = "Gorka & Hermes",
    about = "Play videos locally or on a cast receiver",
    long_about = "Plays local files and http(s) URLs in mpv or on a \
                  Chromecast through catt, with a persistent playlist \
                  session and subtitle lookup.",
    after_help = "EXAMPLES:\n\
                  castplay play a.mkv b.mkv              Play a playlist locally\n\
                  castplay play a.mkv -d TV              Cast to a receiver\n\
                  castplay subtitles a.mkv --online      List subtitles\n\
                  castplay config set loopMode all       Change a setting"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Target cast receiver name
    #[arg(long, short = 'd', global = true)]
    pub device: Option<String>,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to settings file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log more (repeat for trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play files or URLs
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Show or change settings
    #[command(visible_alias = "cfg")]
    Config(ConfigCmd),

    /// List subtitles for a video
    #[command(visible_alias = "sub")]
    Subtitles(SubtitlesCmd),

    /// List available cast receivers
    #[command(visible_alias = "dev")]
    Devices(DevicesCmd),
}

// =============================================================================
// Play Command
// =============================================================================

/// Play a playlist. Reads transport commands from stdin while playing.
#[derive(Args, Debug)]
pub struct PlayCmd {
    /// Files or http(s) URLs, in playlist order
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Loop mode (default: saved setting)
    #[arg(long, short = 'l', value_enum)]
    pub r#loop: Option<LoopChoice>,

    /// Start position (seconds, MM:SS or HH:MM:SS)
    #[arg(long, short = 's')]
    pub start: Option<String>,

    /// GPU vendor, used to pick the hardware decoder
    #[arg(long, value_enum)]
    pub gpu: Option<GpuChoice>,

    /// GPU model name
    #[arg(long, requires = "gpu")]
    pub gpu_name: Option<String>,

    /// GPU memory in MB
    #[arg(long, default_value = "0")]
    pub vram: u32,

    /// Also fetch subtitles from OpenSubtitles
    #[arg(long, short = 'o')]
    pub online_subtitles: bool,

    /// Path to mpv binary
    #[arg(long, default_value = "mpv")]
    pub mpv: String,

    /// Path to catt binary
    #[arg(long, default_value = "catt")]
    pub catt: String,
}

impl PlayCmd {
    /// GPU fact from the flags, if a vendor was given
    pub fn gpu_info(&self) -> Option<GpuInfo> {
        self.gpu.map(|choice| GpuInfo {
            kind: choice.into(),
            name: self.gpu_name.clone().unwrap_or_default(),
            vram_mb: self.vram,
        })
    }

    pub fn start_secs(&self) -> Option<u64> {
        self.start.as_deref().and_then(parse_position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoopChoice {
    None,
    One,
    All,
}

impl From<LoopChoice> for LoopMode {
    fn from(choice: LoopChoice) -> Self {
        match choice {
            LoopChoice::None => LoopMode::None,
            LoopChoice::One => LoopMode::One,
            LoopChoice::All => LoopMode::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GpuChoice {
    Nvidia,
    Amd,
    Intel,
    Unknown,
}

impl From<GpuChoice> for GpuKind {
    fn from(choice: GpuChoice) -> Self {
        match choice {
            GpuChoice::Nvidia => GpuKind::Nvidia,
            GpuChoice::Amd => GpuKind::Amd,
            GpuChoice::Intel => GpuKind::Intel,
            GpuChoice::Unknown => GpuKind::Unknown,
        }
    }
}

// =============================================================================
// Config Command
// =============================================================================

#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print current settings
    Show,
    /// Change one setting (camelCase key, JSON or plain value)
    Set {
        key: String,
        value: String,
    },
    /// Print the settings file path
    Path,
    /// Restore defaults
    Reset,
}

// =============================================================================
// Subtitles Command
// =============================================================================

/// List subtitle files next to a video, optionally fetching more
#[derive(Args, Debug)]
pub struct SubtitlesCmd {
    /// Video file
    #[arg(required = true)]
    pub video: PathBuf,

    /// Language codes, comma-separated (default: saved setting)
    #[arg(long, short = 'l')]
    pub lang: Option<String>,

    /// Also query OpenSubtitles
    #[arg(long, short = 'o')]
    pub online: bool,

    /// IMDB ID for a better online match
    #[arg(long)]
    pub imdb: Option<String>,
}

impl SubtitlesCmd {
    /// Parse language codes into a vector
    pub fn languages(&self) -> Option<Vec<String>> {
        self.lang
            .as_ref()
            .map(|lang| lang.split(',').map(|s| s.trim().to_string()).collect())
    }
}

// =============================================================================
// Devices Command
// =============================================================================

/// List cast receivers on the network
#[derive(Args, Debug)]
pub struct DevicesCmd {
    /// Path to catt binary
    #[arg(long, default_value = "catt")]
    pub catt: String,
}

// =============================================================================
// Interactive Controls
// =============================================================================

/// One line typed while `play` runs
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Intent(Intent),
    /// Relative seek in seconds
    SeekBy(i64),
    /// Relative volume change in percent
    VolumeBy(i8),
    /// Step to the next loop mode
    CycleLoop,
    Status,
    Playlist,
    Help,
    Quit,
}

impl Control {
    /// Parse a control line such as `seek +30`, `vol 40` or `cast Kitchen`
    pub fn parse(line: &str) -> Result<Control, String> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        let control = match word.to_lowercase().as_str() {
            "" | "status" | "st" => Control::Status,
            "p" | "toggle" => Control::Intent(Intent::Toggle),
            "play" => Control::Intent(Intent::Play),
            "pause" => Control::Intent(Intent::Pause),
            "stop" => Control::Intent(Intent::Stop),
            "clear" => Control::Intent(Intent::Clear),
            "n" | "next" => Control::Intent(Intent::Next),
            "prev" | "previous" => Control::Intent(Intent::Previous),
            "list" | "ls" => Control::Playlist,
            "open" | "o" if !rest.is_empty() => Control::Intent(Intent::Open(rest.to_string())),
            "add" | "a" if !rest.is_empty() => Control::Intent(Intent::Enqueue(
                rest.split_whitespace().map(String::from).collect(),
            )),
            "goto" | "g" => Control::Intent(Intent::PlayIndex(parse_index(rest)?)),
            "rm" | "remove" => Control::Intent(Intent::Remove(parse_index(rest)?)),
            "mv" | "move" => {
                let (from, to) = rest.split_once(char::is_whitespace).ok_or("usage: mv FROM TO")?;
                Control::Intent(Intent::Move {
                    from: parse_index(from)?,
                    to: parse_index(to.trim())?,
                })
            }
            "seek" => {
                let invalid = || format!("invalid position: {}", rest);
                match parse_seek(rest) {
                    SeekPosition::Absolute(secs) => Control::Intent(Intent::Seek(
                        secs.checked_mul(1000).ok_or_else(invalid)?,
                    )),
                    SeekPosition::Forward(secs) => {
                        Control::SeekBy(i64::try_from(secs).map_err(|_| invalid())?)
                    }
                    SeekPosition::Backward(secs) => {
                        Control::SeekBy(-i64::try_from(secs).map_err(|_| invalid())?)
                    }
                    SeekPosition::Invalid(s) => return Err(format!("invalid position: {}", s)),
                }
            }
            "vol" | "volume" => match parse_volume(rest) {
                VolumeLevel::Absolute(level) => {
                    Control::Intent(Intent::SetVolume(f64::from(level) / 100.0))
                }
                VolumeLevel::Relative(delta) => Control::VolumeBy(delta),
                VolumeLevel::Invalid(s) => return Err(format!("invalid volume: {}", s)),
            },
            "loop" => match rest.to_lowercase().as_str() {
                "" => Control::CycleLoop,
                "none" | "off" => Control::Intent(Intent::SetLoopMode(LoopMode::None)),
                "one" => Control::Intent(Intent::SetLoopMode(LoopMode::One)),
                "all" => Control::Intent(Intent::SetLoopMode(LoopMode::All)),
                other => return Err(format!("invalid loop mode: {}", other)),
            },
            "cast" if !rest.is_empty() => Control::Intent(Intent::SwitchToCast(rest.to_string())),
            "local" => Control::Intent(Intent::SwitchToLocal),
            "reset" => Control::Intent(Intent::Reset),
            "fallback" => Control::Intent(Intent::FallBack),
            "h" | "help" | "?" => Control::Help,
            "q" | "quit" | "exit" => Control::Quit,
            _ => return Err(format!("unknown command: {} (try 'help')", line)),
        };
        Ok(control)
    }
}

pub const CONTROLS_HELP: &str = "\
p | play | pause | stop        transport
n | prev | goto N              playlist navigation
seek SECS|+N|-N|MM:SS          seek
vol 0-100|+N|-N                volume
loop [none|one|all]            loop mode (cycles without argument)
open PATH | add PATH...        play now / append
rm N | mv FROM TO | ls | clear edit and show playlist
cast NAME | local              switch sink
reset | fallback               leave the error state
status | q";

/// Playlist positions are typed 1-based
fn parse_index(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(format!("invalid playlist position: {}", s)),
    }
}

/// Parsed seek position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekPosition {
    /// Absolute position in seconds
    Absolute(u64),
    /// Seek forward by seconds
    Forward(u64),
    /// Seek backward by seconds
    Backward(u64),
    /// Invalid position string
    Invalid(String),
}

pub fn parse_seek(s: &str) -> SeekPosition {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix('+') {
        if let Some(secs) = parse_digits(stripped) {
            return SeekPosition::Forward(secs);
        }
    } else if let Some(stripped) = s.strip_prefix('-') {
        if let Some(secs) = parse_digits(stripped) {
            return SeekPosition::Backward(secs);
        }
    } else if let Some(secs) = parse_position(s) {
        return SeekPosition::Absolute(secs);
    }
    SeekPosition::Invalid(s.to_string())
}

/// Seconds, MM:SS or HH:MM:SS
pub fn parse_position(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(secs);
    }
    let parts: Vec<&str> = s.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    parts.iter().try_fold(0u64, |total, part| {
        total.checked_mul(60)?.checked_add(parse_digits(part)?)
    })
}

/// Unsigned decimal without a sign
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Position after a relative seek of `delta_secs`, clamped to the valid range
pub fn seek_target(position_ms: u64, delta_secs: i64) -> u64 {
    let step = delta_secs.unsigned_abs().saturating_mul(1000);
    if delta_secs >= 0 {
        position_ms.saturating_add(step)
    } else {
        position_ms.saturating_sub(step)
    }
}

/// Parsed volume level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeLevel {
    /// Absolute volume (0-100)
    Absolute(u8),
    /// Relative volume change
    Relative(i8),
    /// Invalid level string
    Invalid(String),
}

pub fn parse_volume(s: &str) -> VolumeLevel {
    let s = s.trim();
    // Steps beyond the whole range are capped at 100
    let step = |digits: &str| parse_digits(digits).map(|d| d.min(100) as i8);
    if let Some(stripped) = s.strip_prefix('+') {
        if let Some(delta) = step(stripped) {
            return VolumeLevel::Relative(delta);
        }
    } else if let Some(stripped) = s.strip_prefix('-') {
        if let Some(delta) = step(stripped) {
            return VolumeLevel::Relative(-delta);
        }
    } else if let Some(vol) = parse_digits(s) {
        return VolumeLevel::Absolute(vol.min(100) as u8);
    }
    VolumeLevel::Invalid(s.to_string())
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print a line for humans, or `data` as JSON
    pub fn print_either<T: Serialize>(
        &self,
        human: impl std::fmt::Display,
        data: T,
    ) -> anyhow::Result<()> {
        if self.json {
            self.print(data)
        } else {
            if !self.quiet {
                println!("{}", human);
            }
            Ok(())
        }
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
