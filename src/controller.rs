//! Playback mode controller
//!
//! Owns the playlist, the settings store and both sinks, and moves the
//! session between local playback and a cast receiver. All mutation goes
//! through `&mut self`; asynchronous completions arrive as `Event`s on the
//! queue and are applied by `handle_event` on the same task.
//!
//! Switching sinks always loads the item on the new sink first and stops
//! the old one only once that load was accepted, so two sinks never play
//! at the same time and a failed switch leaves the old sink untouched.

use crate::api::subtitles::{query_or_empty, SubtitleProvider, VideoIdentity};
use crate::config::{ConfigError, ConfigStore, StoreEvent};
use crate::events::{Event, EventSender, Intent, Message};
use crate::models::{
    LoopMode, PlayMode, PlayableRef, PlaybackSession, PlaylistItem, SubtitleCandidate,
};
use crate::playlist::{PlaylistEngine, PlaylistError};
use crate::resolver::{InputResolver, ResolveError};
use crate::settings::{Settings, SettingsPatch};
use crate::stream::{AttemptId, CastSink, LoadId, Sink, SinkError, SinkEvent, SinkKind};
use crate::subtitles::SubtitleMatcher;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Idle,
    LocalPlaying,
    LocalPaused,
    CastConnecting,
    CastPlaying,
    CastPaused,
    Error,
}

impl PlaybackState {
    pub fn is_local(self) -> bool {
        matches!(self, PlaybackState::LocalPlaying | PlaybackState::LocalPaused)
    }

    pub fn is_cast(self) -> bool {
        matches!(self, PlaybackState::CastPlaying | PlaybackState::CastPaused)
    }

    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::LocalPlaying | PlaybackState::CastPlaying)
    }

    fn active(kind: SinkKind, paused: bool) -> Self {
        match (kind, paused) {
            (SinkKind::Local, false) => PlaybackState::LocalPlaying,
            (SinkKind::Local, true) => PlaybackState::LocalPaused,
            (SinkKind::Cast, false) => PlaybackState::CastPlaying,
            (SinkKind::Cast, true) => PlaybackState::CastPaused,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::LocalPlaying => "playing locally",
            PlaybackState::LocalPaused => "paused locally",
            PlaybackState::CastConnecting => "connecting to receiver",
            PlaybackState::CastPlaying => "casting",
            PlaybackState::CastPaused => "cast paused",
            PlaybackState::Error => "in error",
        };
        write!(f, "{}", text)
    }
}

/// Where `fall_back()` returns to after a cast failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fallback {
    pub state: PlaybackState,
    /// The local sink was already stopped and must load the item again
    pub reload: bool,
}

/// Last sink failure, shown while in `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkFailure {
    pub sink: SinkKind,
    pub reason: String,
    pub fallback: Option<Fallback>,
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.sink, self.reason)
    }
}

#[derive(Debug, Clone)]
struct PendingConnect {
    attempt: AttemptId,
    receiver: String,
    /// State to return to if the connection is abandoned
    previous: PlaybackState,
    /// The local player no longer holds the item and must load it again
    local_stopped: bool,
}

/// Errors from controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Playlist(#[from] PlaylistError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Playback is in error state ({0}). Reset first.")]
    InErrorState(String),
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: PlaybackState,
    },
    #[error("A cast connection is already in progress")]
    ConnectInProgress,
    #[error("No cast receiver configured")]
    NoReceiver,
    #[error("No fallback after {0} failure")]
    NoFallback(SinkKind),
    #[error("Invalid volume: {0}")]
    InvalidVolume(f64),
}

// =============================================================================
// Controller
// =============================================================================

/// Playback session state machine over a local sink `L` and a cast sink `C`
pub struct PlaybackController<L: Sink, C: CastSink> {
    local: L,
    cast: C,
    playlist: PlaylistEngine,
    config: ConfigStore,
    resolver: InputResolver,
    matcher: SubtitleMatcher,
    provider: Option<Arc<dyn SubtitleProvider>>,
    events: EventSender,
    state: PlaybackState,
    session: PlaybackSession,
    /// Canonical reference of `session.current_item`
    media: Option<PlayableRef>,
    pending: Option<PendingConnect>,
    last_error: Option<SinkFailure>,
    last_save_error: Option<String>,
}

impl<L: Sink, C: CastSink> PlaybackController<L, C> {
    /// Controller starting idle in the persisted play mode
    pub fn new(local: L, cast: C, config: ConfigStore, events: EventSender) -> Self {
        let settings = config.settings().clone();
        Self {
            local,
            cast,
            playlist: PlaylistEngine::new().with_loop_mode(settings.loop_mode),
            resolver: InputResolver::new(),
            matcher: SubtitleMatcher::with_fs(settings.subtitle_languages.clone()),
            provider: None,
            events,
            config,
            state: PlaybackState::Idle,
            session: PlaybackSession {
                mode: settings.play_mode,
                ..PlaybackSession::default()
            },
            media: None,
            pending: None,
            last_error: None,
            last_save_error: None,
        }
    }

    pub fn with_playlist(mut self, playlist: PlaylistEngine) -> Self {
        self.playlist = playlist;
        self
    }

    pub fn with_resolver(mut self, resolver: InputResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_matcher(mut self, matcher: SubtitleMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Look up subtitles online on every local load
    pub fn with_provider(mut self, provider: Arc<dyn SubtitleProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn playlist(&self) -> &PlaylistEngine {
        &self.playlist
    }

    pub fn settings(&self) -> &Settings {
        self.config.settings()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn last_error(&self) -> Option<&SinkFailure> {
        self.last_error.as_ref()
    }

    /// Most recent settings write failure, if the last write failed
    pub fn last_save_error(&self) -> Option<&str> {
        self.last_save_error.as_deref()
    }

    /// Attempt id of the connection in flight
    pub fn pending_attempt(&self) -> Option<AttemptId> {
        self.pending.as_ref().map(|p| p.attempt)
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn cast(&self) -> &C {
        &self.cast
    }

    // -------------------------------------------------------------------------
    // Playlist Intents
    // -------------------------------------------------------------------------

    /// Resolve `raw`, add it to the playlist and play it
    pub fn open(&mut self, raw: &str) -> Result<PlaylistItem, ControllerError> {
        self.guard()?;
        let media = self.resolver.resolve(raw)?;
        let item = PlaylistItem::from_ref(&media);
        self.playlist.add([item.clone()]);

        if let Some(dir) = media.local_path().and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                self.config.update(SettingsPatch::new().last_directory(dir));
            }
        }

        self.load(item.clone())?;
        Ok(item)
    }

    /// Resolve every input and append them. Nothing is added unless all
    /// inputs are valid.
    pub fn enqueue<S: AsRef<str>>(&mut self, inputs: &[S]) -> Result<usize, ControllerError> {
        self.guard()?;
        let items = inputs
            .iter()
            .map(|raw| self.resolver.resolve(raw.as_ref()).map(|m| PlaylistItem::from_ref(&m)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.playlist.add(items))
    }

    pub fn play_index(&mut self, index: usize) -> Result<(), ControllerError> {
        self.guard()?;
        self.load_index(index).map(drop)
    }

    pub fn next(&mut self) -> Result<Option<PlaylistItem>, ControllerError> {
        self.guard()?;
        match self.playlist.next_index() {
            Some(index) => self.load_index(index).map(Some),
            None => Ok(None),
        }
    }

    pub fn previous(&mut self) -> Result<Option<PlaylistItem>, ControllerError> {
        self.guard()?;
        match self.playlist.previous_index() {
            Some(index) => self.load_index(index).map(Some),
            None => Ok(None),
        }
    }

    /// Remove an entry; removing the playing item stops playback
    pub fn remove(&mut self, index: usize) -> Result<PlaylistItem, ControllerError> {
        self.guard()?;
        let removed = self.playlist.remove(index)?;
        let was_current = self
            .session
            .current_item
            .as_ref()
            .is_some_and(|item| item.path == removed.path);
        if was_current {
            self.stop()?;
        }
        Ok(removed)
    }

    /// Stop playback and empty the playlist
    pub fn clear_playlist(&mut self) -> Result<(), ControllerError> {
        self.guard()?;
        self.stop()?;
        self.playlist.clear();
        info!("playlist cleared");
        Ok(())
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), ControllerError> {
        self.guard()?;
        Ok(self.playlist.move_item(from, to)?)
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) -> Result<(), ControllerError> {
        self.guard()?;
        self.playlist.set_loop_mode(mode);
        self.config.update(SettingsPatch::new().loop_mode(mode));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transport Intents
    // -------------------------------------------------------------------------

    /// Play `item` on the sink of the current mode. Nothing changes unless
    /// the item resolves and the mode has somewhere to play it.
    pub fn load(&mut self, item: PlaylistItem) -> Result<(), ControllerError> {
        let index = self.playlist.index_of(&item.path);
        self.load_item(item, index)
    }

    fn load_index(&mut self, index: usize) -> Result<PlaylistItem, ControllerError> {
        let item = self
            .playlist
            .get(index)
            .cloned()
            .ok_or(PlaylistError::IndexOutOfRange {
                index,
                len: self.playlist.len(),
            })?;
        self.load_item(item.clone(), Some(index))?;
        Ok(item)
    }

    fn load_item(&mut self, item: PlaylistItem, index: Option<usize>) -> Result<(), ControllerError> {
        self.guard()?;
        let media = self.resolver.resolve(&item.path)?;

        let connecting = self.state == PlaybackState::CastConnecting;
        let target = match self.session.mode {
            PlayMode::Local => Target::Start(SinkKind::Local),
            PlayMode::Cast if connecting => Target::AwaitReceiver,
            PlayMode::Cast if self.session.active_receiver.is_some() => {
                Target::Start(SinkKind::Cast)
            }
            PlayMode::Cast => {
                let receiver = self.config.settings().cast_device.clone();
                Target::Connect(receiver.ok_or(ControllerError::NoReceiver)?)
            }
        };

        if let Some(index) = index.or_else(|| self.playlist.index_of(&media.value())) {
            self.playlist.select(index)?;
        }

        if connecting && self.session.mode == PlayMode::Local {
            if let Some(pending) = self.cancel_pending() {
                info!(receiver = %pending.receiver, "cast connection cancelled by load");
            }
        }

        let previous = self.state;
        info!(item = %item, "loading");
        self.session.current_item = Some(item);
        self.session.position_ms = 0;
        self.media = Some(media.clone());
        self.refresh_subtitles(&media);

        match target {
            Target::Start(kind) => self.start_on(kind, &media, 0),
            Target::Connect(receiver) => self.begin_connect(receiver, previous),
            Target::AwaitReceiver => {
                // The receiver loads whatever is current once it is ready
                if let Some(pending) = self.pending.as_mut() {
                    if pending.previous.is_local() && !pending.local_stopped {
                        pending.local_stopped = true;
                        stop_quietly(&mut self.local);
                    }
                }
                Ok(())
            }
        }
    }

    pub fn play(&mut self) -> Result<(), ControllerError> {
        self.guard()?;
        match self.state {
            PlaybackState::LocalPaused => self.local.play()?,
            PlaybackState::CastPaused => self.cast.play()?,
            PlaybackState::LocalPlaying | PlaybackState::CastPlaying => return Ok(()),
            state => return Err(ControllerError::InvalidTransition { action: "play", state }),
        }
        self.set_paused(false);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ControllerError> {
        self.guard()?;
        match self.state {
            PlaybackState::LocalPlaying => self.local.pause()?,
            PlaybackState::CastPlaying => self.cast.pause()?,
            PlaybackState::LocalPaused | PlaybackState::CastPaused => return Ok(()),
            state => return Err(ControllerError::InvalidTransition { action: "pause", state }),
        }
        self.set_paused(true);
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<(), ControllerError> {
        if self.state.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    pub fn seek(&mut self, position_ms: u64) -> Result<(), ControllerError> {
        self.guard()?;
        match self.active_sink() {
            Some(kind) => self.sink_mut(kind).seek(position_ms)?,
            // Applied when the receiver loads the item
            None if self.state == PlaybackState::CastConnecting => {}
            None => {
                return Err(ControllerError::InvalidTransition {
                    action: "seek",
                    state: self.state,
                })
            }
        }
        self.session.position_ms = position_ms;
        Ok(())
    }

    /// Set volume (0.0 - 1.0) on the active sink and remember it
    pub fn set_volume(&mut self, volume: f64) -> Result<(), ControllerError> {
        self.guard()?;
        if !volume.is_finite() {
            return Err(ControllerError::InvalidVolume(volume));
        }
        let volume = volume.clamp(0.0, 1.0);
        if let Some(kind) = self.active_sink() {
            self.sink_mut(kind).set_volume(volume)?;
        }
        self.config.update(SettingsPatch::new().volume(volume));
        Ok(())
    }

    /// Stop playback. The playlist is kept.
    pub fn stop(&mut self) -> Result<(), ControllerError> {
        self.guard()?;
        match self.state {
            PlaybackState::LocalPlaying | PlaybackState::LocalPaused => {
                stop_quietly(&mut self.local)
            }
            PlaybackState::CastPlaying | PlaybackState::CastPaused => stop_quietly(&mut self.cast),
            PlaybackState::CastConnecting => {
                if let Some(pending) = self.cancel_pending() {
                    if pending.previous.is_local() {
                        stop_quietly(&mut self.local);
                    }
                }
            }
            PlaybackState::Idle | PlaybackState::Error => {}
        }
        self.state = PlaybackState::Idle;
        self.clear_item();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mode Switching
    // -------------------------------------------------------------------------

    /// Start moving playback to `receiver`
    pub fn switch_to_cast(&mut self, receiver: &str) -> Result<(), ControllerError> {
        self.guard()?;
        let receiver = receiver.trim();
        if receiver.is_empty() {
            return Err(ControllerError::NoReceiver);
        }
        let connected_to = |session: &PlaybackSession| {
            session.mode == PlayMode::Cast && session.active_receiver.as_deref() == Some(receiver)
        };

        match self.state {
            PlaybackState::CastConnecting => Err(ControllerError::ConnectInProgress),
            PlaybackState::Idle if connected_to(&self.session) => Ok(()),
            PlaybackState::Idle | PlaybackState::LocalPlaying | PlaybackState::LocalPaused => {
                self.begin_connect(receiver.to_string(), self.state)
            }
            PlaybackState::CastPlaying | PlaybackState::CastPaused if connected_to(&self.session) => {
                Ok(())
            }
            state => Err(ControllerError::InvalidTransition {
                action: "switch receivers",
                state,
            }),
        }
    }

    /// Move playback back to the local player
    pub fn switch_to_local(&mut self) -> Result<(), ControllerError> {
        self.guard()?;
        match self.state {
            PlaybackState::LocalPlaying | PlaybackState::LocalPaused => return Ok(()),
            PlaybackState::CastConnecting => {
                if let Some(pending) = self.cancel_pending() {
                    info!(receiver = %pending.receiver, "cast connection abandoned");
                    if pending.previous.is_local() {
                        self.resume_local(pending.previous, pending.local_stopped)?;
                    } else {
                        self.state = pending.previous;
                        self.session.is_playing = false;
                    }
                }
            }
            PlaybackState::CastPlaying | PlaybackState::CastPaused => {
                let paused = self.state == PlaybackState::CastPaused;
                match self.media.clone() {
                    Some(media) => {
                        let position = self.session.position_ms;
                        self.start_on(SinkKind::Local, &media, position)?;
                        stop_quietly(&mut self.cast);
                        if paused {
                            self.pause_after_switch(SinkKind::Local);
                        }
                    }
                    None => {
                        stop_quietly(&mut self.cast);
                        self.state = PlaybackState::Idle;
                    }
                }
                self.cast.disconnect();
            }
            PlaybackState::Idle => self.cast.disconnect(),
            PlaybackState::Error => {}
        }
        self.set_mode(PlayMode::Local, None);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Error Recovery
    // -------------------------------------------------------------------------

    /// Back to `Idle` from anywhere: stops both sinks and drops the item
    pub fn reset(&mut self) {
        self.cancel_pending();
        stop_quietly(&mut self.local);
        stop_quietly(&mut self.cast);
        self.cast.disconnect();
        self.last_error = None;
        self.state = PlaybackState::Idle;
        self.clear_item();
        self.set_mode(PlayMode::Local, None);
    }

    /// Leave `Error` for the local state recorded when the receiver failed
    pub fn fall_back(&mut self) -> Result<(), ControllerError> {
        if self.state != PlaybackState::Error {
            return Err(ControllerError::InvalidTransition {
                action: "fall back",
                state: self.state,
            });
        }
        let Some(failure) = self.last_error.clone() else {
            return Err(ControllerError::NoFallback(SinkKind::Local));
        };
        let Some(fallback) = failure.fallback else {
            return Err(ControllerError::NoFallback(failure.sink));
        };

        self.cast.disconnect();
        self.set_mode(PlayMode::Local, None);
        self.last_error = None;
        info!(state = %fallback.state, "falling back to local playback");

        self.resume_local(fallback.state, fallback.reload)
    }

    /// Enter the local `state`, loading the item again when `reload` is set.
    /// Without a local state or an item the session goes idle.
    fn resume_local(&mut self, state: PlaybackState, reload: bool) -> Result<(), ControllerError> {
        match self.media.clone() {
            Some(media) if state.is_local() && reload => {
                self.state = PlaybackState::Idle;
                let position = self.session.position_ms;
                self.start_on(SinkKind::Local, &media, position)?;
                if state == PlaybackState::LocalPaused {
                    self.pause_after_switch(SinkKind::Local);
                }
            }
            Some(_) if state.is_local() => {
                self.state = state;
                self.session.is_playing = state.is_playing();
            }
            _ => {
                self.state = PlaybackState::Idle;
                self.clear_item();
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    /// Apply one user intent
    pub fn apply(&mut self, intent: Intent) -> Result<(), ControllerError> {
        match intent {
            Intent::Open(raw) => self.open(&raw).map(drop),
            Intent::Enqueue(inputs) => self.enqueue(&inputs).map(drop),
            Intent::Load(item) => self.load(item),
            Intent::PlayIndex(index) => self.play_index(index),
            Intent::Remove(index) => self.remove(index).map(drop),
            Intent::Move { from, to } => self.move_item(from, to),
            Intent::Next => self.next().map(drop),
            Intent::Previous => self.previous().map(drop),
            Intent::Play => self.play(),
            Intent::Pause => self.pause(),
            Intent::Toggle => self.toggle(),
            Intent::Stop => self.stop(),
            Intent::Clear => self.clear_playlist(),
            Intent::Seek(ms) => self.seek(ms),
            Intent::SetVolume(volume) => self.set_volume(volume),
            Intent::SetLoopMode(mode) => self.set_loop_mode(mode),
            Intent::SwitchToCast(receiver) => self.switch_to_cast(&receiver),
            Intent::SwitchToLocal => self.switch_to_local(),
            Intent::Reset => {
                self.reset();
                Ok(())
            }
            Intent::FallBack => self.fall_back(),
            Intent::Shutdown => self.shutdown(),
        }
    }

    pub fn dispatch(&mut self, message: Message) -> Result<(), ControllerError> {
        match message {
            Message::Intent(intent) => self.apply(intent),
            Message::Event(event) => {
                self.handle_event(event);
                Ok(())
            }
        }
    }

    /// Consume the queue until `Shutdown` or until every sender is gone
    pub async fn run(&mut self, mut rx: UnboundedReceiver<Message>) -> Result<(), ControllerError> {
        while let Some(message) = rx.recv().await {
            if matches!(message, Message::Intent(Intent::Shutdown)) {
                break;
            }
            if let Err(e) = self.dispatch(message) {
                warn!(error = %e, "intent rejected");
            }
        }
        self.shutdown()
    }

    /// Stop both sinks and write pending settings
    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        self.cancel_pending();
        stop_quietly(&mut self.local);
        stop_quietly(&mut self.cast);
        self.config.flush()?;
        Ok(())
    }

    /// Apply an asynchronous completion. Stale completions are dropped.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Sink { from, load, event } => self.on_sink_event(from, load, event),
            Event::ReceiverReady { attempt, receiver } => match self.take_pending(attempt) {
                Some(pending) => self.on_receiver_ready(pending),
                None => debug!(%attempt, %receiver, "stale receiver ready ignored"),
            },
            Event::ReceiverFailed {
                attempt,
                receiver,
                reason,
            } => match self.take_pending(attempt) {
                Some(pending) => {
                    self.cast.disconnect();
                    let fallback = Fallback {
                        state: pending.previous,
                        reload: pending.local_stopped,
                    };
                    self.fail(SinkKind::Cast, reason, Some(fallback));
                }
                None => debug!(%attempt, %receiver, "stale receiver failure ignored"),
            },
            Event::SubtitlesFetched { path, candidates } => self.on_subtitles(&path, candidates),
            Event::Store(StoreEvent::Saved { generation }) => {
                debug!(generation, "settings saved");
                self.last_save_error = None;
            }
            Event::Store(StoreEvent::SaveFailed { generation, reason }) => {
                warn!(generation, %reason, "settings not saved");
                self.last_save_error = Some(reason);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Event Handlers
    // -------------------------------------------------------------------------

    fn on_sink_event(&mut self, from: SinkKind, load: LoadId, event: SinkEvent) {
        if self.active_sink() != Some(from) {
            debug!(sink = %from, ?event, "event from inactive sink ignored");
            return;
        }
        if self.sink_ref(from).current_load() != load {
            debug!(sink = %from, load, ?event, "event from a replaced load ignored");
            return;
        }

        match event {
            SinkEvent::PositionUpdate(ms) => self.session.position_ms = ms,
            SinkEvent::Ended => self.on_ended(),
            SinkEvent::Error(reason) => {
                let fallback = match self.state {
                    PlaybackState::CastPlaying => Some(PlaybackState::LocalPlaying),
                    PlaybackState::CastPaused => Some(PlaybackState::LocalPaused),
                    _ => None,
                }
                .map(|state| Fallback {
                    state,
                    reload: true,
                });
                self.cancel_pending();
                self.fail(from, reason, fallback);
            }
        }
    }

    fn on_ended(&mut self) {
        info!("playback ended");
        let next = self.playlist.next_index();

        if self.state == PlaybackState::CastConnecting {
            // The local player finished; the receiver picks up whatever is
            // current once it is ready
            if let Some(pending) = self.pending.as_mut() {
                pending.local_stopped = true;
            }
            let advanced = next.and_then(|index| {
                let item = self.playlist.get(index)?.clone();
                let media = self.resolver.resolve(&item.path).ok()?;
                Some((index, item, media))
            });
            match advanced {
                Some((index, item, media)) => {
                    if let Err(e) = self.playlist.select(index) {
                        warn!(error = %e, "could not advance playlist");
                    }
                    self.session.current_item = Some(item);
                    self.session.position_ms = 0;
                    self.media = Some(media.clone());
                    self.refresh_subtitles(&media);
                }
                None => self.clear_item(),
            }
            return;
        }

        match next {
            Some(index) => {
                if let Err(e) = self.load_index(index) {
                    warn!(error = %e, "could not advance playlist");
                }
            }
            None => {
                if let Err(e) = self.stop() {
                    warn!(error = %e, "could not stop after playlist end");
                }
            }
        }
    }

    fn on_receiver_ready(&mut self, pending: PendingConnect) {
        info!(receiver = %pending.receiver, "cast receiver ready");
        self.set_mode(PlayMode::Cast, Some(pending.receiver.clone()));
        self.config
            .update(SettingsPatch::new().cast_device(Some(pending.receiver)));

        let Some(media) = self.media.clone() else {
            self.state = PlaybackState::Idle;
            return;
        };

        let position = self.session.position_ms;
        let subtitle = self.preferred_subtitle();
        let loaded = self
            .cast
            .set_subtitle(subtitle.as_deref())
            .and_then(|()| self.cast.load(&media, position));
        if let Err(e) = loaded {
            let fallback = Fallback {
                state: pending.previous,
                reload: pending.local_stopped,
            };
            self.fail(SinkKind::Cast, e.to_string(), Some(fallback));
            return;
        }

        if pending.previous.is_local() && !pending.local_stopped {
            stop_quietly(&mut self.local);
        }
        self.state = PlaybackState::CastPlaying;
        self.session.is_playing = true;
        if pending.previous == PlaybackState::LocalPaused {
            self.pause_after_switch(SinkKind::Cast);
        }
    }

    fn on_subtitles(&mut self, path: &str, downloaded: Vec<SubtitleCandidate>) {
        let is_current = self
            .session
            .current_item
            .as_ref()
            .is_some_and(|item| item.path == path);
        if !is_current {
            debug!(path, "subtitles for a previous item ignored");
            return;
        }

        let had_subtitle = self.preferred_subtitle().is_some();
        let local = std::mem::take(&mut self.session.subtitles);
        self.session.subtitles = SubtitleMatcher::merge(local, downloaded);
        info!(count = self.session.subtitles.len(), "subtitles available");

        if had_subtitle {
            return;
        }
        if let (Some(kind), Some(subtitle)) = (self.active_sink(), self.preferred_subtitle()) {
            if let Err(e) = self.sink_mut(kind).set_subtitle(Some(subtitle.as_path())) {
                warn!(error = %e, "could not attach subtitle");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn guard(&self) -> Result<(), ControllerError> {
        if self.state != PlaybackState::Error {
            return Ok(());
        }
        let reason = self
            .last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        Err(ControllerError::InErrorState(reason))
    }

    /// The sink whose events count. While connecting, the local player keeps
    /// playing until the receiver takes over.
    fn active_sink(&self) -> Option<SinkKind> {
        match self.state {
            state if state.is_local() => Some(SinkKind::Local),
            state if state.is_cast() => Some(SinkKind::Cast),
            PlaybackState::CastConnecting => self
                .pending
                .as_ref()
                .filter(|p| p.previous.is_local() && !p.local_stopped)
                .map(|_| SinkKind::Local),
            _ => None,
        }
    }

    fn sink_ref(&self, kind: SinkKind) -> &dyn Sink {
        match kind {
            SinkKind::Local => &self.local,
            SinkKind::Cast => &self.cast,
        }
    }

    fn sink_mut(&mut self, kind: SinkKind) -> &mut dyn Sink {
        match kind {
            SinkKind::Local => &mut self.local,
            SinkKind::Cast => &mut self.cast,
        }
    }

    /// Load on `kind` and make it the active sink
    fn start_on(
        &mut self,
        kind: SinkKind,
        media: &PlayableRef,
        start_ms: u64,
    ) -> Result<(), ControllerError> {
        let subtitle = self.preferred_subtitle();
        let sink = self.sink_mut(kind);
        let loaded = sink
            .set_subtitle(subtitle.as_deref())
            .and_then(|()| sink.load(media, start_ms));

        if let Err(e) = loaded {
            let fallback = (kind == SinkKind::Cast).then_some(Fallback {
                state: PlaybackState::LocalPlaying,
                reload: true,
            });
            self.fail(kind, e.to_string(), fallback);
            return Err(e.into());
        }

        self.state = PlaybackState::active(kind, false);
        self.session.is_playing = true;
        Ok(())
    }

    fn begin_connect(
        &mut self,
        receiver: String,
        previous: PlaybackState,
    ) -> Result<(), ControllerError> {
        let attempt = Uuid::new_v4();
        if let Err(e) = self.cast.connect(&receiver, attempt) {
            let fallback = Fallback {
                state: previous,
                reload: false,
            };
            self.fail(SinkKind::Cast, e.to_string(), Some(fallback));
            return Err(e.into());
        }

        info!(%receiver, %attempt, "connecting to cast receiver");
        self.pending = Some(PendingConnect {
            attempt,
            receiver,
            previous,
            local_stopped: false,
        });
        self.state = PlaybackState::CastConnecting;
        Ok(())
    }

    fn take_pending(&mut self, attempt: AttemptId) -> Option<PendingConnect> {
        if self.state != PlaybackState::CastConnecting {
            return None;
        }
        match &self.pending {
            Some(pending) if pending.attempt == attempt => self.pending.take(),
            _ => None,
        }
    }

    /// Forget the attempt in flight so its callback is discarded
    fn cancel_pending(&mut self) -> Option<PendingConnect> {
        let pending = self.pending.take()?;
        self.cast.disconnect();
        Some(pending)
    }

    /// Pause right after a switch; a refusal leaves the new sink playing
    fn pause_after_switch(&mut self, kind: SinkKind) {
        match self.sink_mut(kind).pause() {
            Ok(()) => self.set_paused(true),
            Err(e) => warn!(sink = %kind, error = %e, "could not restore pause"),
        }
    }

    fn set_paused(&mut self, paused: bool) {
        let kind = if self.state.is_cast() {
            SinkKind::Cast
        } else {
            SinkKind::Local
        };
        self.state = PlaybackState::active(kind, paused);
        self.session.is_playing = !paused;
    }

    fn set_mode(&mut self, mode: PlayMode, receiver: Option<String>) {
        self.session.mode = mode;
        self.session.active_receiver = receiver;
        if self.config.settings().play_mode != mode {
            self.config.update(SettingsPatch::new().play_mode(mode));
        }
    }

    fn fail(&mut self, sink: SinkKind, reason: String, fallback: Option<Fallback>) {
        error!(sink = %sink, %reason, "playback failed");
        self.state = PlaybackState::Error;
        self.session.is_playing = false;
        self.last_error = Some(SinkFailure {
            sink,
            reason,
            fallback,
        });
    }

    fn clear_item(&mut self) {
        self.session.current_item = None;
        self.session.position_ms = 0;
        self.session.is_playing = false;
        self.session.subtitles.clear();
        self.media = None;
    }

    fn preferred_subtitle(&self) -> Option<PathBuf> {
        self.matcher
            .preferred(&self.session.subtitles)
            .map(|c| c.path.clone())
    }

    /// Local candidates now, provider results later as an event
    fn refresh_subtitles(&mut self, media: &PlayableRef) {
        self.session.subtitles.clear();
        let Some(video) = media.local_path() else {
            return;
        };
        self.session.subtitles = self.matcher.local_candidates(video);

        if let Some(provider) = &self.provider {
            spawn_lookup(
                Arc::clone(provider),
                self.events.clone(),
                video.to_path_buf(),
                media.value(),
            );
        }
    }
}

enum Target {
    Start(SinkKind),
    Connect(String),
    /// A connection is already in flight for the cast mode
    AwaitReceiver,
}

fn stop_quietly(sink: &mut dyn Sink) {
    if let Err(e) = sink.stop() {
        warn!(sink = %sink.kind(), error = %e, "stop failed");
    }
}

/// Hash the video off-thread, ask the provider, report back on the queue
fn spawn_lookup(
    provider: Arc<dyn SubtitleProvider>,
    events: EventSender,
    video: PathBuf,
    key: String,
) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("no runtime, skipping subtitle lookup");
        return;
    };

    handle.spawn(async move {
        let file = video.display().to_string();
        let identity = match tokio::task::spawn_blocking(move || VideoIdentity::from_file(&video)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(%file, error = %e, "could not identify video");
                return;
            }
            Err(e) => {
                warn!(%file, error = %e, "video hashing task failed");
                return;
            }
        };
        let candidates = query_or_empty(provider.as_ref(), &identity).await;
        events.send(Event::SubtitlesFetched {
            path: key,
            candidates,
        });
    });
}
