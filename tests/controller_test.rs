//! Playback Controller Tests
//!
//! Drives the mode state machine with recording sinks. Both sinks write
//! into one shared command log so the order of commands across sinks is
//! observable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use castplay::controller::{ControllerError, Fallback, PlaybackController, PlaybackState};
use castplay::events::{self, Event, EventSender, Intent, Message};
use castplay::models::{LoopMode, PlayMode, PlaylistItem, SubtitleCandidate, SubtitleSource};
use castplay::playlist::{PlaylistEngine, PreviousWrap};
use castplay::config::{ConfigStore, StoreEvent};
use castplay::settings::SettingsPatch;
use castplay::stream::{AttemptId, CastSink, LoadId, Sink, SinkError, SinkEvent, SinkKind};
use castplay::subtitles::SubtitleMatcher;
use castplay::PlayableRef;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

// =============================================================================
// Recording Sinks
// =============================================================================

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    refused: Arc<Mutex<Vec<String>>>,
    receivers: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Make `"<sink> <verb>"` fail from now on
    fn refuse(&self, command: &str) {
        self.refused.lock().unwrap().push(command.to_string());
    }

    fn receivers(&self) -> Vec<String> {
        self.receivers.lock().unwrap().clone()
    }

    fn record(&self, sink: &str, verb: &str, detail: Option<String>) -> Result<(), SinkError> {
        let key = format!("{} {}", sink, verb);
        if self.refused.lock().unwrap().contains(&key) {
            return Err(SinkError::Rejected(format!("{} refused", key)));
        }
        let entry = match detail {
            Some(detail) => format!("{} {}", key, detail),
            None => key,
        };
        self.log.lock().unwrap().push(entry);
        Ok(())
    }
}

struct RecordingSink {
    kind: SinkKind,
    rec: Recorder,
    loads: LoadId,
}

impl RecordingSink {
    fn name(&self) -> &'static str {
        match self.kind {
            SinkKind::Local => "local",
            SinkKind::Cast => "cast",
        }
    }
}

impl Sink for RecordingSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn current_load(&self) -> LoadId {
        self.loads
    }

    fn load(&mut self, media: &PlayableRef, start_ms: u64) -> Result<(), SinkError> {
        self.rec
            .record(self.name(), "load", Some(format!("{} at {}", media.value(), start_ms)))?;
        self.loads += 1;
        Ok(())
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.rec.record(self.name(), "play", None)
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.rec.record(self.name(), "pause", None)
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), SinkError> {
        self.rec.record(self.name(), "seek", Some(position_ms.to_string()))
    }

    fn set_volume(&mut self, volume: f64) -> Result<(), SinkError> {
        self.rec.record(self.name(), "volume", Some(format!("{:.2}", volume)))
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.loads += 1;
        self.rec.record(self.name(), "stop", None)
    }

    fn set_subtitle(&mut self, path: Option<&Path>) -> Result<(), SinkError> {
        match path {
            Some(path) => self
                .rec
                .record(self.name(), "subtitle", Some(path.display().to_string())),
            None => Ok(()),
        }
    }
}

impl CastSink for RecordingSink {
    fn connect(&mut self, receiver: &str, _attempt: AttemptId) -> Result<(), SinkError> {
        if self.rec.refused.lock().unwrap().iter().any(|c| c == "cast connect") {
            return Err(SinkError::NotFound("catt".into()));
        }
        self.rec.receivers.lock().unwrap().push(receiver.to_string());
        Ok(())
    }

    fn disconnect(&mut self) {}
}

// =============================================================================
// Harness
// =============================================================================

type Controller = PlaybackController<RecordingSink, RecordingSink>;

struct Harness {
    controller: Controller,
    rec: Recorder,
    events: EventSender,
    rx: UnboundedReceiver<Message>,
    _dir: TempDir,
}

fn harness_with(patch: SettingsPatch) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = ConfigStore::open(dir.path().join("settings.json"));
    config.update(patch);

    let rec = Recorder::default();
    let (events, rx) = events::queue();
    let local = RecordingSink {
        kind: SinkKind::Local,
        rec: rec.clone(),
        loads: 0,
    };
    let cast = RecordingSink {
        kind: SinkKind::Cast,
        rec: rec.clone(),
        loads: 0,
    };
    let controller = PlaybackController::new(local, cast, config, events.clone())
        .with_matcher(SubtitleMatcher::new(vec!["en".into()], |_: &Path| false));

    Harness {
        controller,
        rec,
        events,
        rx,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(SettingsPatch::new())
}

/// Harness with two items queued and the first one playing locally
fn playing_locally() -> Harness {
    let mut h = harness();
    h.controller
        .enqueue(&["/videos/a.mp4", "/videos/b.mp4"])
        .unwrap();
    h.controller.play_index(0).unwrap();
    h
}

/// Event from the load `from` is currently playing
fn sink_event(controller: &Controller, from: SinkKind, event: SinkEvent) -> Event {
    let load = match from {
        SinkKind::Local => controller.local().current_load(),
        SinkKind::Cast => controller.cast().current_load(),
    };
    Event::Sink { from, load, event }
}

impl Harness {
    fn sink(&mut self, from: SinkKind, event: SinkEvent) {
        let event = sink_event(&self.controller, from, event);
        self.controller.handle_event(event);
    }
}

fn ready(controller: &Controller, receiver: &str) -> Event {
    Event::ReceiverReady {
        attempt: controller.pending_attempt().expect("connection in flight"),
        receiver: receiver.to_string(),
    }
}

// =============================================================================
// Local Playback
// =============================================================================

#[test]
fn test_load_plays_locally() {
    let h = playing_locally();

    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.rec.commands(), vec!["local load /videos/a.mp4 at 0"]);
    assert_eq!(h.controller.playlist().current_index(), Some(0));
    assert!(h.controller.session().is_playing);
}

#[test]
fn test_open_adds_plays_and_remembers_directory() {
    let mut h = harness();
    let item = h.controller.open("/media/films/clip.mkv").unwrap();

    assert_eq!(item.display, "clip.mkv");
    assert_eq!(h.controller.playlist().len(), 1);
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(
        h.controller.settings().last_directory,
        PathBuf::from("/media/films")
    );
}

#[test]
fn test_enqueue_is_all_or_nothing() {
    let mut h = harness();
    let result = h.controller.enqueue(&["/videos/a.mp4", "ftp://host/b.mp4"]);

    assert!(matches!(result, Err(ControllerError::Resolve(_))));
    assert!(h.controller.playlist().is_empty());
}

#[test]
fn test_pause_play_toggle() {
    let mut h = playing_locally();

    h.controller.pause().unwrap();
    assert_eq!(h.controller.state(), PlaybackState::LocalPaused);
    h.controller.toggle().unwrap();
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);

    assert_eq!(
        h.rec.commands()[1..],
        ["local pause".to_string(), "local play".to_string()]
    );
}

#[test]
fn test_refused_command_keeps_state() {
    let mut h = playing_locally();
    h.rec.refuse("local pause");

    let result = h.controller.pause();

    assert!(matches!(
        result,
        Err(ControllerError::Sink(SinkError::Rejected(_)))
    ));
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
}

#[test]
fn test_pause_when_idle_is_invalid() {
    let mut h = harness();
    assert!(matches!(
        h.controller.pause(),
        Err(ControllerError::InvalidTransition { action: "pause", .. })
    ));
}

#[test]
fn test_volume_reaches_sink_and_settings() {
    let mut h = playing_locally();
    h.controller.set_volume(0.4).unwrap();

    assert!(h.rec.commands().contains(&"local volume 0.40".to_string()));
    assert_eq!(h.controller.settings().volume, 0.4);
    assert!(matches!(
        h.controller.set_volume(f64::NAN),
        Err(ControllerError::InvalidVolume(_))
    ));
}

#[test]
fn test_stop_clears_item_but_keeps_playlist() {
    let mut h = playing_locally();
    h.controller.stop().unwrap();

    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.session().current_item, None);
    assert_eq!(h.controller.session().position_ms, 0);
    assert_eq!(h.controller.playlist().len(), 2);
    assert_eq!(h.rec.commands().last().unwrap(), "local stop");
}

#[test]
fn test_clear_stops_and_empties_playlist() {
    let mut h = playing_locally();
    h.rec.clear();

    h.controller.apply(Intent::Clear).unwrap();

    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert!(h.controller.playlist().is_empty());
    assert_eq!(h.controller.playlist().current_index(), None);
    assert_eq!(h.controller.session().current_item, None);
    assert_eq!(h.rec.commands(), vec!["local stop"]);
}

#[test]
fn test_removing_current_item_stops() {
    let mut h = playing_locally();
    let removed = h.controller.remove(0).unwrap();

    assert_eq!(removed.path, "/videos/a.mp4");
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.playlist().len(), 1);
}

#[test]
fn test_previous_at_start_follows_playlist_policy() {
    let h = harness();
    let mut playlist = PlaylistEngine::from_items([
        PlaylistItem::new("/videos/a.mp4", "a.mp4"),
        PlaylistItem::new("/videos/b.mp4", "b.mp4"),
    ])
    .with_loop_mode(LoopMode::All);
    playlist.set_previous_wrap(PreviousWrap::Stop);
    let mut controller = h.controller.with_playlist(playlist);

    controller.play_index(0).unwrap();
    h.rec.clear();

    assert_eq!(controller.previous().unwrap(), None);
    assert_eq!(controller.playlist().current_index(), Some(0));
    assert!(h.rec.commands().is_empty());
}

#[test]
fn test_loop_mode_is_persisted_in_settings() {
    let mut h = harness();
    h.controller.set_loop_mode(LoopMode::All).unwrap();

    assert_eq!(h.controller.playlist().loop_mode(), LoopMode::All);
    assert_eq!(h.controller.settings().loop_mode, LoopMode::All);
}

// =============================================================================
// Playlist End
// =============================================================================

#[test]
fn test_ended_advances_then_stops() {
    let mut h = playing_locally();
    h.rec.clear();

    h.sink(SinkKind::Local, SinkEvent::Ended);
    assert_eq!(h.rec.commands(), vec!["local load /videos/b.mp4 at 0"]);
    assert_eq!(
        h.controller.session().current_item.as_ref().unwrap().path,
        "/videos/b.mp4"
    );

    h.sink(SinkKind::Local, SinkEvent::Ended);
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.session().current_item, None);
    assert_eq!(h.controller.playlist().len(), 2);
}

#[test]
fn test_ended_with_loop_one_replays() {
    let mut h = playing_locally();
    h.controller.set_loop_mode(LoopMode::One).unwrap();
    h.rec.clear();

    h.sink(SinkKind::Local, SinkEvent::Ended);
    assert_eq!(h.rec.commands(), vec!["local load /videos/a.mp4 at 0"]);
}

#[test]
fn test_events_from_inactive_sink_are_ignored() {
    let mut h = playing_locally();
    h.sink(SinkKind::Local, SinkEvent::PositionUpdate(7_000));

    h.sink(SinkKind::Cast, SinkEvent::PositionUpdate(99_000));
    h.sink(SinkKind::Cast, SinkEvent::Error("boom".into()));
    h.sink(SinkKind::Cast, SinkEvent::Ended);

    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.session().position_ms, 7_000);
    assert_eq!(h.controller.playlist().current_index(), Some(0));
}

// =============================================================================
// Switching To Cast
// =============================================================================

#[test]
fn test_switch_to_cast_loads_then_stops_local() {
    let mut h = playing_locally();
    h.sink(SinkKind::Local, SinkEvent::PositionUpdate(42_000));
    h.rec.clear();

    h.controller.switch_to_cast("Living Room").unwrap();
    assert_eq!(h.controller.state(), PlaybackState::CastConnecting);
    assert!(h.rec.commands().is_empty());
    assert_eq!(h.rec.receivers(), vec!["Living Room"]);

    let event = ready(&h.controller, "Living Room");
    h.controller.handle_event(event);

    assert_eq!(
        h.rec.commands(),
        vec!["cast load /videos/a.mp4 at 42000", "local stop"]
    );
    assert_eq!(h.controller.state(), PlaybackState::CastPlaying);
    assert_eq!(h.controller.session().position_ms, 42_000);
    assert_eq!(h.controller.session().mode, PlayMode::Cast);
    assert_eq!(
        h.controller.session().active_receiver.as_deref(),
        Some("Living Room")
    );
    assert_eq!(
        h.controller.settings().cast_device.as_deref(),
        Some("Living Room")
    );
}

#[test]
fn test_switch_to_cast_keeps_pause() {
    let mut h = playing_locally();
    h.sink(SinkKind::Local, SinkEvent::PositionUpdate(12_500));
    h.controller.pause().unwrap();
    h.rec.clear();

    h.controller.switch_to_cast("Kitchen").unwrap();
    let event = ready(&h.controller, "Kitchen");
    h.controller.handle_event(event);

    assert_eq!(
        h.rec.commands(),
        vec!["cast load /videos/a.mp4 at 12500", "local stop", "cast pause"]
    );
    assert_eq!(h.controller.state(), PlaybackState::CastPaused);
}

#[test]
fn test_local_keeps_playing_while_connecting() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("Kitchen").unwrap();

    h.sink(SinkKind::Local, SinkEvent::PositionUpdate(3_000));
    h.controller.seek(4_000).unwrap();

    assert_eq!(h.controller.session().position_ms, 4_000);
    assert!(h.rec.commands().contains(&"local seek 4000".to_string()));
}

#[test]
fn test_second_connect_is_rejected() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("Kitchen").unwrap();
    let attempt = h.controller.pending_attempt();

    assert!(matches!(
        h.controller.switch_to_cast("Bedroom"),
        Err(ControllerError::ConnectInProgress)
    ));
    assert_eq!(h.controller.pending_attempt(), attempt);
}

#[test]
fn test_cancelled_connect_ignores_late_ready() {
    let mut h = playing_locally();
    h.sink(SinkKind::Local, SinkEvent::PositionUpdate(10_000));
    h.rec.clear();

    h.controller.switch_to_cast("Kitchen").unwrap();
    let late = ready(&h.controller, "Kitchen");
    h.controller.switch_to_local().unwrap();

    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.pending_attempt(), None);

    h.controller.handle_event(late);

    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.session().position_ms, 10_000);
    assert_eq!(h.controller.session().mode, PlayMode::Local);
    assert!(h.rec.commands().is_empty());
}

#[test]
fn test_load_during_connect_cancels_it() {
    let mut h = harness();
    h.controller
        .enqueue(&["/videos/a.mp4", "/videos/b.mp4"])
        .unwrap();
    h.controller.switch_to_cast("TV").unwrap();
    let late = ready(&h.controller, "TV");

    h.controller.play_index(1).unwrap();

    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.rec.commands(), vec!["local load /videos/b.mp4 at 0"]);

    h.controller.handle_event(late);
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.session().active_receiver, None);
}

#[test]
fn test_cast_mode_load_during_connect_stays_on_cast() {
    let mut h = harness_with(
        SettingsPatch::new()
            .play_mode(PlayMode::Cast)
            .cast_device(Some("TV".into())),
    );
    h.controller
        .enqueue(&["/videos/a.mp4", "/videos/b.mp4"])
        .unwrap();
    h.controller.play_index(0).unwrap();
    let attempt = h.controller.pending_attempt();

    h.controller.play_index(1).unwrap();

    assert_eq!(h.controller.state(), PlaybackState::CastConnecting);
    assert_eq!(h.controller.pending_attempt(), attempt);
    assert_eq!(h.controller.playlist().current_index(), Some(1));
    assert_eq!(h.controller.settings().play_mode, PlayMode::Cast);
    assert!(h.rec.commands().is_empty());

    let event = ready(&h.controller, "TV");
    h.controller.handle_event(event);
    assert_eq!(h.rec.commands(), vec!["cast load /videos/b.mp4 at 0"]);
    assert_eq!(h.controller.state(), PlaybackState::CastPlaying);
}

#[test]
fn test_local_end_while_connecting_moves_to_next_item() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("Attic").unwrap();
    let attempt = h.controller.pending_attempt().unwrap();

    h.sink(SinkKind::Local, SinkEvent::Ended);
    assert_eq!(h.controller.state(), PlaybackState::CastConnecting);
    assert_eq!(
        h.controller.session().current_item.as_ref().unwrap().path,
        "/videos/b.mp4"
    );
    h.rec.clear();

    h.controller.handle_event(Event::ReceiverFailed {
        attempt,
        receiver: "Attic".into(),
        reason: "Receiver did not answer".into(),
    });
    assert_eq!(
        h.controller.last_error().unwrap().fallback,
        Some(Fallback {
            state: PlaybackState::LocalPlaying,
            reload: true,
        })
    );

    h.controller.fall_back().unwrap();
    assert_eq!(h.rec.commands(), vec!["local load /videos/b.mp4 at 0"]);
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
}

#[test]
fn test_switch_to_local_after_local_end_reloads() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("Attic").unwrap();
    h.sink(SinkKind::Local, SinkEvent::Ended);
    h.rec.clear();

    h.controller.switch_to_local().unwrap();

    assert_eq!(h.rec.commands(), vec!["local load /videos/b.mp4 at 0"]);
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.pending_attempt(), None);
}

#[test]
fn test_cast_mode_load_connects_to_configured_device() {
    let mut h = harness_with(
        SettingsPatch::new()
            .play_mode(PlayMode::Cast)
            .cast_device(Some("TV".into())),
    );
    h.controller.enqueue(&["/videos/a.mp4"]).unwrap();

    h.controller.play_index(0).unwrap();
    assert_eq!(h.controller.state(), PlaybackState::CastConnecting);
    assert_eq!(h.rec.receivers(), vec!["TV"]);

    // Applied once the receiver loads
    h.controller.seek(5_000).unwrap();

    let event = ready(&h.controller, "TV");
    h.controller.handle_event(event);
    assert_eq!(h.rec.commands(), vec!["cast load /videos/a.mp4 at 5000"]);
    assert_eq!(h.controller.state(), PlaybackState::CastPlaying);
}

#[test]
fn test_cast_mode_without_device_fails_before_change() {
    let mut h = harness_with(SettingsPatch::new().play_mode(PlayMode::Cast));
    h.controller.enqueue(&["/videos/a.mp4"]).unwrap();

    assert!(matches!(
        h.controller.play_index(0),
        Err(ControllerError::NoReceiver)
    ));
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.session().current_item, None);
    assert_eq!(h.controller.playlist().current_index(), None);
}

#[test]
fn test_failed_next_keeps_playlist_position() {
    let h = harness_with(SettingsPatch::new().play_mode(PlayMode::Cast));
    let mut playlist = PlaylistEngine::from_items([
        PlaylistItem::new("/videos/a.mp4", "a.mp4"),
        PlaylistItem::new("/videos/b.mp4", "b.mp4"),
    ]);
    playlist.select(0).unwrap();
    let mut controller = h.controller.with_playlist(playlist);

    assert!(matches!(controller.next(), Err(ControllerError::NoReceiver)));
    assert!(matches!(controller.previous(), Ok(None)));
    assert_eq!(controller.playlist().current_index(), Some(0));
    assert!(h.rec.commands().is_empty());
}

#[test]
fn test_switch_back_to_local_resumes_at_position() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("TV").unwrap();
    let event = ready(&h.controller, "TV");
    h.controller.handle_event(event);
    h.sink(SinkKind::Cast, SinkEvent::PositionUpdate(61_000));
    h.rec.clear();

    h.controller.switch_to_local().unwrap();

    assert_eq!(
        h.rec.commands(),
        vec!["local load /videos/a.mp4 at 61000", "cast stop"]
    );
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.settings().play_mode, PlayMode::Local);
}

#[test]
fn test_end_from_replaced_cast_load_is_ignored() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("TV").unwrap();
    let event = ready(&h.controller, "TV");
    h.controller.handle_event(event);
    let stale = sink_event(&h.controller, SinkKind::Cast, SinkEvent::Ended);
    h.rec.clear();

    h.controller.next().unwrap();
    h.controller.handle_event(stale);

    assert_eq!(h.rec.commands(), vec!["cast load /videos/b.mp4 at 0"]);
    assert_eq!(h.controller.state(), PlaybackState::CastPlaying);
    assert_eq!(h.controller.playlist().current_index(), Some(1));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_receiver_failure_enters_error_until_fall_back() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("Attic").unwrap();
    let attempt = h.controller.pending_attempt().unwrap();
    h.rec.clear();

    h.controller.handle_event(Event::ReceiverFailed {
        attempt,
        receiver: "Attic".into(),
        reason: "Receiver did not answer".into(),
    });

    assert_eq!(h.controller.state(), PlaybackState::Error);
    let failure = h.controller.last_error().unwrap();
    assert_eq!(failure.sink, SinkKind::Cast);
    assert!(matches!(h.controller.play(), Err(ControllerError::InErrorState(_))));
    assert!(matches!(h.controller.seek(1), Err(ControllerError::InErrorState(_))));
    assert!(matches!(
        h.controller.enqueue(&["/videos/c.mp4"]),
        Err(ControllerError::InErrorState(_))
    ));

    h.controller.fall_back().unwrap();

    // The local player never stopped
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert!(h.rec.commands().is_empty());
    assert_eq!(h.controller.last_error(), None);
}

#[test]
fn test_cast_error_falls_back_with_reload() {
    let mut h = playing_locally();
    h.controller.switch_to_cast("TV").unwrap();
    let event = ready(&h.controller, "TV");
    h.controller.handle_event(event);
    h.sink(SinkKind::Cast, SinkEvent::PositionUpdate(30_000));

    h.sink(SinkKind::Cast, SinkEvent::Error("connection lost".into()));
    assert_eq!(h.controller.state(), PlaybackState::Error);
    h.rec.clear();

    h.controller.fall_back().unwrap();

    assert_eq!(h.rec.commands(), vec!["local load /videos/a.mp4 at 30000"]);
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
    assert_eq!(h.controller.session().mode, PlayMode::Local);
}

#[test]
fn test_local_load_failure_needs_reset() {
    let mut h = harness();
    h.controller.enqueue(&["/videos/a.mp4"]).unwrap();
    h.rec.refuse("local load");

    assert!(h.controller.play_index(0).is_err());
    assert_eq!(h.controller.state(), PlaybackState::Error);
    assert!(matches!(
        h.controller.fall_back(),
        Err(ControllerError::NoFallback(SinkKind::Local))
    ));

    h.controller.reset();
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.session().current_item, None);
    assert_eq!(h.controller.playlist().len(), 1);
}

#[test]
fn test_connect_refusal_enters_error() {
    let mut h = playing_locally();
    h.rec.refuse("cast connect");

    assert!(h.controller.switch_to_cast("TV").is_err());
    assert_eq!(h.controller.state(), PlaybackState::Error);

    h.controller.fall_back().unwrap();
    assert_eq!(h.controller.state(), PlaybackState::LocalPlaying);
}

#[test]
fn test_reset_stops_everything() {
    let mut h = playing_locally();
    h.rec.clear();

    h.controller.reset();

    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.rec.commands(), vec!["local stop", "cast stop"]);
}

// =============================================================================
// Subtitles And Settings Events
// =============================================================================

#[test]
fn test_fetched_subtitles_attach_to_current_item() {
    let mut h = playing_locally();
    let downloaded = SubtitleCandidate {
        path: PathBuf::from("/cache/a.en.1.srt"),
        language_code: "en".into(),
        source: SubtitleSource::Downloaded,
    };

    h.controller.handle_event(Event::SubtitlesFetched {
        path: "/videos/old.mp4".into(),
        candidates: vec![downloaded.clone()],
    });
    assert!(h.controller.session().subtitles.is_empty());

    h.controller.handle_event(Event::SubtitlesFetched {
        path: "/videos/a.mp4".into(),
        candidates: vec![downloaded.clone()],
    });

    assert_eq!(h.controller.session().subtitles, vec![downloaded]);
    assert_eq!(
        h.rec.commands().last().unwrap(),
        "local subtitle /cache/a.en.1.srt"
    );
}

#[test]
fn test_save_failure_is_recorded() {
    let mut h = harness();
    h.controller.handle_event(Event::Store(StoreEvent::SaveFailed {
        generation: 3,
        reason: "disk full".into(),
    }));
    assert_eq!(h.controller.last_save_error(), Some("disk full"));

    h.controller
        .handle_event(Event::Store(StoreEvent::Saved { generation: 4 }));
    assert_eq!(h.controller.last_save_error(), None);
}

// =============================================================================
// Queue
// =============================================================================

#[test]
fn test_dispatch_applies_intents_in_order() {
    let mut h = harness();
    let messages = [
        Message::Intent(Intent::Enqueue(vec!["/videos/a.mp4".into(), "/videos/b.mp4".into()])),
        Message::Intent(Intent::PlayIndex(1)),
    ];
    for message in messages {
        h.controller.dispatch(message).unwrap();
    }
    let position = sink_event(&h.controller, SinkKind::Local, SinkEvent::PositionUpdate(2_000));
    h.controller.dispatch(Message::Event(position)).unwrap();
    h.controller.dispatch(Message::Intent(Intent::Pause)).unwrap();

    assert_eq!(h.controller.state(), PlaybackState::LocalPaused);
    assert_eq!(h.controller.session().position_ms, 2_000);
}

#[tokio::test]
async fn test_run_stops_sinks_on_shutdown() {
    let Harness {
        mut controller,
        rec,
        events,
        rx,
        _dir,
    } = harness();

    events.intent(Intent::Enqueue(vec!["/videos/a.mp4".into()]));
    events.intent(Intent::PlayIndex(0));
    events.intent(Intent::SetLoopMode(LoopMode::All));
    events.intent(Intent::Shutdown);

    controller.run(rx).await.unwrap();

    assert_eq!(
        rec.commands(),
        vec!["local load /videos/a.mp4 at 0", "local stop", "cast stop"]
    );
    assert!(!controller.config().is_dirty());
}
