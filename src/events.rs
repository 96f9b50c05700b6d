//! Serialized intent/event queue
//!
//! Front-end intents and asynchronous completions (sink status, cast
//! connection results, subtitle downloads, settings writes) all travel on
//! one unbounded channel, so the controller applies them strictly in order
//! on a single task.

use crate::config::StoreEvent;
use crate::models::{LoopMode, PlaylistItem, SubtitleCandidate};
use crate::stream::{AttemptId, LoadId, SinkEvent, SinkKind};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Something the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Resolve raw input, add it to the playlist and play it
    Open(String),
    /// Add raw inputs to the playlist without playing
    Enqueue(Vec<String>),
    Load(PlaylistItem),
    PlayIndex(usize),
    Remove(usize),
    Move { from: usize, to: usize },
    Next,
    Previous,
    Play,
    Pause,
    Toggle,
    Stop,
    /// Stop playback and empty the playlist
    Clear,
    Seek(u64),
    SetVolume(f64),
    SetLoopMode(LoopMode),
    SwitchToCast(String),
    SwitchToLocal,
    Reset,
    FallBack,
    Shutdown,
}

/// Completion of some asynchronous work
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Sink {
        from: SinkKind,
        load: LoadId,
        event: SinkEvent,
    },
    ReceiverReady {
        attempt: AttemptId,
        receiver: String,
    },
    ReceiverFailed {
        attempt: AttemptId,
        receiver: String,
        reason: String,
    },
    SubtitlesFetched {
        path: String,
        candidates: Vec<SubtitleCandidate>,
    },
    Store(StoreEvent),
}

/// Everything the controller consumes
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Intent(Intent),
    Event(Event),
}

/// Cloneable handle for pushing onto the queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<Message>,
}

impl EventSender {
    /// Push an event; false once the controller is gone
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(Message::Event(event)).is_ok()
    }

    /// Push an intent; false once the controller is gone
    pub fn intent(&self, intent: Intent) -> bool {
        self.tx.send(Message::Intent(intent)).is_ok()
    }

    pub fn sink_event(&self, from: SinkKind, load: LoadId, event: SinkEvent) -> bool {
        self.send(Event::Sink { from, load, event })
    }
}

/// Create the queue shared by the front end, the sinks and the controller
pub fn queue() -> (EventSender, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Forward settings-store notifications onto the queue
pub fn forward_store_events(events: EventSender) -> UnboundedSender<StoreEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !events.send(Event::Store(event)) {
                break;
            }
        }
    });
    tx
}
