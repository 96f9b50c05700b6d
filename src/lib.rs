//! castplay - playback session core for local and cast playback
//!
//! Plays local files and http(s) URLs either in a local player or on a
//! network cast receiver, keeping one playlist and one position across
//! mode switches.
//!
//! # Modules
//!
//! - `models` - Data structures shared by every layer
//! - `settings` / `config` - Validated settings and debounced persistence
//! - `playlist` - Ordered, deduplicated playlist with loop modes
//! - `resolver` - Raw input to canonical playable reference
//! - `subtitles` - Subtitle candidate matching
//! - `api` - Subtitle provider clients
//! - `stream` - Playback sinks (mpv, catt)
//! - `events` - Serialized intent/event queue
//! - `controller` - Playback mode state machine

pub mod models;
pub mod settings;
pub mod config;
pub mod playlist;
pub mod resolver;
pub mod subtitles;
pub mod api;
pub mod stream;
pub mod events;
pub mod controller;

// Re-export commonly used types
pub use models::{
    PlayMode, LoopMode, MediaKind, PlayableRef,
    PlaylistItem, PlaybackSession,
    SubFormat, SubtitleCandidate, SubtitleSource,
    CastDevice, CastState, CastStatus,
    GpuInfo, GpuKind,
};

pub use config::{ConfigError, ConfigStore, StoreEvent};
pub use controller::{ControllerError, PlaybackController, PlaybackState};
pub use events::{Event, EventSender, Intent, Message};
pub use playlist::{PlaylistEngine, PlaylistError, PreviousWrap};
pub use resolver::{InputResolver, ResolveError};
pub use settings::{Settings, SettingsPatch};
pub use stream::{CastSink, CattCaster, MpvPlayer, Sink, SinkError, SinkEvent, SinkKind};
pub use subtitles::{FsProbe, PathProbe, SubtitleMatcher};
