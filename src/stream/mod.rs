//! Playback sinks
//!
//! - `Sink`: transport commands every playback target understands
//! - `CastSink`: a sink that must connect to a receiver first
//! - Player: local playback through mpv
//! - Cast: network receivers through catt
//!
//! Commands return as soon as the sink has accepted them. Progress and
//! failures come back later as events on the controller's queue.

pub mod cast;
pub mod player;

use crate::models::PlayableRef;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub use cast::CattCaster;
pub use player::MpvPlayer;

/// Identifies one cast connection attempt
pub type AttemptId = Uuid;

/// Counts loads on one sink. Events carry the id of the load they belong to.
pub type LoadId = u64;

/// Which sink an event or failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Local,
    Cast,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Local => write!(f, "local player"),
            SinkKind::Cast => write!(f, "cast receiver"),
        }
    }
}

/// Errors a sink reports when it refuses a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("'{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start '{program}': {reason}")]
    StartFailed { program: String, reason: String },
    #[error("Nothing loaded")]
    NotLoaded,
    #[error("No receiver connected")]
    NotConnected,
    #[error("Command rejected: {0}")]
    Rejected(String),
}

/// Asynchronous notifications from a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    PositionUpdate(u64),
    Ended,
    Error(String),
}

/// Transport capability shared by the local player and cast receivers
pub trait Sink: Send {
    fn kind(&self) -> SinkKind;

    /// Id of the most recent load; bumped by every `load` and `stop`
    fn current_load(&self) -> LoadId;

    /// Start playing `media` from `start_ms`
    fn load(&mut self, media: &PlayableRef, start_ms: u64) -> Result<(), SinkError>;

    fn play(&mut self) -> Result<(), SinkError>;

    fn pause(&mut self) -> Result<(), SinkError>;

    fn seek(&mut self, position_ms: u64) -> Result<(), SinkError>;

    /// 0.0 - 1.0
    fn set_volume(&mut self, volume: f64) -> Result<(), SinkError>;

    fn stop(&mut self) -> Result<(), SinkError>;

    /// Attach a subtitle file to the current (or next) load
    fn set_subtitle(&mut self, _path: Option<&Path>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A sink that talks to a remote receiver
pub trait CastSink: Sink {
    /// Begin connecting to `receiver`. The outcome arrives later as
    /// `Event::ReceiverReady` or `Event::ReceiverFailed` tagged with `attempt`.
    fn connect(&mut self, receiver: &str, attempt: AttemptId) -> Result<(), SinkError>;

    /// Forget the current receiver
    fn disconnect(&mut self);
}

/// Map a spawn error the way every sink reports it
pub(crate) fn spawn_error(program: &str, e: std::io::Error) -> SinkError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SinkError::NotFound(program.to_string())
    } else {
        SinkError::StartFailed {
            program: program.to_string(),
            reason: e.to_string(),
        }
    }
}
