//! Chromecast control via catt CLI
//!
//! Controls cast receivers using catt. Each load gets one session task that
//! owns the `catt cast` process, polls `catt status` into position and end
//! events, and runs transport commands one at a time in the order they were
//! issued. Commands issued before the receiver reports the media are held
//! until it does.

use super::{spawn_error, AttemptId, CastSink, LoadId, Sink, SinkError, SinkEvent, SinkKind};
use crate::events::{Event, EventSender};
use crate::models::{CastState, CastStatus, PlayableRef};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the receiver is polled while something is cast
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound for the connection probe
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// One load on the receiver
struct CastSession {
    commands: UnboundedSender<Vec<String>>,
    task: JoinHandle<()>,
}

/// Cast receiver driven through catt
pub struct CattCaster {
    /// Path to catt binary
    catt_path: String,
    /// Receiver name or address commands go to
    device: Option<String>,
    subtitle: Option<PathBuf>,
    poll_interval: Duration,
    events: EventSender,
    /// Id of the current load; bumped on load, stop and disconnect
    current: Arc<AtomicU64>,
    session: Option<CastSession>,
}

impl CattCaster {
    pub fn new(events: EventSender) -> Self {
        Self::with_path("catt", events)
    }

    /// Create with custom catt path
    pub fn with_path(path: impl Into<String>, events: EventSender) -> Self {
        Self {
            catt_path: path.into(),
            device: None,
            subtitle: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            events,
            current: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Receiver commands currently go to
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// `catt -d <device> cast` arguments for `target` from `start_ms`
    pub fn cast_args(&self, device: &str, target: &str, start_ms: u64) -> Vec<String> {
        let mut args = device_args(device, ["cast", target]);
        if start_ms > 0 {
            args.push("--seek-to".to_string());
            args.push(format!("{}", start_ms / 1000));
        }
        if let Some(sub) = &self.subtitle {
            args.push("--subtitles".to_string());
            args.push(sub.display().to_string());
        }
        args
    }

    fn connected_device(&self) -> Result<&str, SinkError> {
        self.device.as_deref().ok_or(SinkError::NotConnected)
    }

    /// Queue a transport command behind the ones already sent for this load
    fn command(&self, command: &[&str]) -> Result<(), SinkError> {
        let args = device_args(self.connected_device()?, command.iter().copied());
        let session = self.session.as_ref().ok_or(SinkError::NotLoaded)?;
        session
            .commands
            .send(args)
            .map_err(|_| SinkError::Rejected("cast session has ended".to_string()))
    }

    /// Abort the session task; events it still reports belong to a stale load
    fn end_session(&mut self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
    }
}

impl Sink for CattCaster {
    fn kind(&self) -> SinkKind {
        SinkKind::Cast
    }

    fn current_load(&self) -> LoadId {
        self.current.load(Ordering::SeqCst)
    }

    fn load(&mut self, media: &PlayableRef, start_ms: u64) -> Result<(), SinkError> {
        let device = self.connected_device()?.to_string();
        let args = self.cast_args(&device, &media.value(), start_ms);
        self.end_session();

        // Local files are served by catt itself, so the cast process keeps
        // running for as long as the receiver plays them.
        let child = Command::new(&self.catt_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.catt_path, e))?;

        let load = self.current_load();
        info!(media = %media, device = %device, start_ms, load, "casting");

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SessionWorker {
            program: self.catt_path.clone(),
            device,
            interval: self.poll_interval,
            events: self.events.clone(),
            current: Arc::clone(&self.current),
            load,
        };
        self.session = Some(CastSession {
            commands: tx,
            task: tokio::spawn(worker.run(child, rx)),
        });
        Ok(())
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.command(&["play"])
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.command(&["pause"])
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), SinkError> {
        let secs = (position_ms / 1000).to_string();
        self.command(&["seek", &secs])
    }

    fn set_volume(&mut self, volume: f64) -> Result<(), SinkError> {
        // catt volume accepts 0-100
        let level = ((volume.clamp(0.0, 1.0)) * 100.0).round().to_string();
        self.command(&["volume", &level])
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.end_session();
        let Some(device) = self.device.as_deref() else {
            return Ok(());
        };
        let args = device_args(device, ["stop"]);
        let program = self.catt_path.clone();
        tokio::spawn(async move {
            if let Err(e) = run_catt(&program, &args).await {
                warn!(error = %e, "catt stop failed");
            }
        });
        Ok(())
    }

    fn set_subtitle(&mut self, path: Option<&Path>) -> Result<(), SinkError> {
        self.subtitle = path.map(Path::to_path_buf);
        Ok(())
    }
}

impl CastSink for CattCaster {
    fn connect(&mut self, receiver: &str, attempt: AttemptId) -> Result<(), SinkError> {
        self.end_session();
        self.device = Some(receiver.to_string());

        let program = self.catt_path.clone();
        let events = self.events.clone();
        let receiver = receiver.to_string();
        tokio::spawn(async move {
            let args = device_args(&receiver, ["status"]);
            let outcome = tokio::time::timeout(CONNECT_TIMEOUT, run_catt(&program, &args)).await;
            let event = match outcome {
                Ok(Ok(_)) => Event::ReceiverReady { attempt, receiver },
                Ok(Err(e)) => Event::ReceiverFailed {
                    attempt,
                    receiver,
                    reason: e.to_string(),
                },
                Err(_) => Event::ReceiverFailed {
                    attempt,
                    receiver,
                    reason: "Receiver did not answer".to_string(),
                },
            };
            events.send(event);
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.end_session();
        self.device = None;
    }
}

impl Drop for CattCaster {
    fn drop(&mut self) {
        self.end_session();
    }
}

// =============================================================================
// catt Helpers
// =============================================================================

fn device_args<'a>(device: &str, command: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut args = vec!["-d".to_string(), device.to_string()];
    args.extend(command.into_iter().map(str::to_string));
    args
}

/// Run catt to completion; stdout on success
async fn run_catt(program: &str, args: &[String]) -> Result<String, SinkError> {
    let result = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    if result.status.success() {
        Ok(String::from_utf8_lossy(&result.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&result.stderr);
        Err(SinkError::Rejected(stderr.trim().to_string()))
    }
}

struct SessionWorker {
    program: String,
    device: String,
    interval: Duration,
    events: EventSender,
    current: Arc<AtomicU64>,
    load: LoadId,
}

impl SessionWorker {
    fn emit(&self, event: SinkEvent) {
        if self.current.load(Ordering::SeqCst) == self.load {
            self.events.sink_event(SinkKind::Cast, self.load, event);
        }
    }

    async fn run_command(&self, args: &[String]) {
        match run_catt(&self.program, args).await {
            Ok(_) => debug!(?args, "catt command done"),
            Err(e) => warn!(?args, error = %e, "catt command failed"),
        }
    }

    async fn run(self, mut child: tokio::process::Child, mut commands: UnboundedReceiver<Vec<String>>) {
        let args = device_args(&self.device, ["status"]);
        let mut tracker = StatusTracker::default();
        let mut ticker = tokio::time::interval(self.interval);
        let mut held: VecDeque<Vec<String>> = VecDeque::new();
        let mut cast_running = true;

        loop {
            tokio::select! {
                status = child.wait(), if cast_running => {
                    cast_running = false;
                    match status {
                        Ok(status) if status.success() => {}
                        Ok(status) => {
                            self.emit(SinkEvent::Error(format!("catt cast exited with {}", status)));
                            return;
                        }
                        Err(e) => {
                            self.emit(SinkEvent::Error(e.to_string()));
                            return;
                        }
                    }
                }
                Some(command) = commands.recv() => {
                    if tracker.started() {
                        self.run_command(&command).await;
                    } else {
                        held.push_back(command);
                    }
                }
                _ = ticker.tick() => {
                    let output = match run_catt(&self.program, &args).await {
                        Ok(output) => output,
                        Err(e) => {
                            debug!(error = %e, "catt status failed");
                            continue;
                        }
                    };
                    let Some(status) = CastStatus::parse_catt_status(&output) else {
                        continue;
                    };
                    match tracker.observe(&status) {
                        Some(SinkEvent::Ended) => {
                            self.emit(SinkEvent::Ended);
                            return;
                        }
                        Some(event) => self.emit(event),
                        None => {}
                    }
                    if tracker.started() {
                        while let Some(command) = held.pop_front() {
                            self.run_command(&command).await;
                        }
                    }
                }
            }
        }
    }
}

/// Turns successive receiver snapshots into sink events
#[derive(Debug, Default)]
pub struct StatusTracker {
    started: bool,
    last_position: Option<u64>,
}

impl StatusTracker {
    /// The receiver has reported the media at least once
    pub fn started(&self) -> bool {
        self.started
    }

    /// Ended once the receiver goes idle after having played
    pub fn observe(&mut self, status: &CastStatus) -> Option<SinkEvent> {
        match status.state {
            CastState::Playing | CastState::Paused | CastState::Buffering => {
                self.started = true;
                let position = status.position_ms();
                if self.last_position == Some(position) {
                    return None;
                }
                self.last_position = Some(position);
                Some(SinkEvent::PositionUpdate(position))
            }
            CastState::Idle | CastState::Stopped if self.started => Some(SinkEvent::Ended),
            CastState::Idle | CastState::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, Message};
    use uuid::Uuid;

    fn status(state: CastState, secs: u64) -> CastStatus {
        CastStatus {
            state,
            position: Duration::from_secs(secs),
            duration: Duration::from_secs(600),
            volume: 1.0,
        }
    }

    #[test]
    fn test_cast_args() {
        let (tx, _rx) = events::queue();
        let mut caster = CattCaster::new(tx);
        assert_eq!(
            caster.cast_args("Living Room", "http://x/movie.mp4", 0),
            vec!["-d", "Living Room", "cast", "http://x/movie.mp4"]
        );

        caster.set_subtitle(Some(Path::new("/v/movie.en.srt"))).unwrap();
        assert_eq!(
            caster.cast_args("Living Room", "/v/movie.mp4", 83_900),
            vec![
                "-d", "Living Room", "cast", "/v/movie.mp4",
                "--seek-to", "83", "--subtitles", "/v/movie.en.srt",
            ]
        );
    }

    #[test]
    fn test_commands_need_receiver() {
        let (tx, _rx) = events::queue();
        let mut caster = CattCaster::new(tx);
        let media = PlayableRef::Local("/v/movie.mp4".into());
        assert_eq!(caster.load(&media, 0), Err(SinkError::NotConnected));
        assert_eq!(caster.pause(), Err(SinkError::NotConnected));
        assert_eq!(caster.stop(), Ok(()));
    }

    #[tokio::test]
    async fn test_commands_need_a_load() {
        let (tx, _rx) = events::queue();
        let mut caster = CattCaster::with_path("castplay-no-such-catt", tx);
        caster.connect("Kitchen", Uuid::new_v4()).unwrap();

        assert_eq!(caster.pause(), Err(SinkError::NotLoaded));
        assert_eq!(caster.seek(5_000), Err(SinkError::NotLoaded));
    }

    #[test]
    fn test_tracker_reports_positions_then_end() {
        let mut tracker = StatusTracker::default();
        assert_eq!(tracker.observe(&status(CastState::Idle, 0)), None);
        assert!(!tracker.started());
        assert_eq!(
            tracker.observe(&status(CastState::Buffering, 0)),
            Some(SinkEvent::PositionUpdate(0))
        );
        assert_eq!(
            tracker.observe(&status(CastState::Playing, 12)),
            Some(SinkEvent::PositionUpdate(12_000))
        );
        assert_eq!(tracker.observe(&status(CastState::Paused, 12)), None);
        assert_eq!(tracker.observe(&status(CastState::Idle, 0)), Some(SinkEvent::Ended));
    }

    #[tokio::test]
    async fn test_connect_without_catt_fails_attempt() {
        let (tx, mut rx) = events::queue();
        let mut caster = CattCaster::with_path("castplay-no-such-catt", tx);
        let attempt = Uuid::new_v4();
        caster.connect("Kitchen", attempt).unwrap();

        match rx.recv().await {
            Some(Message::Event(Event::ReceiverFailed { attempt: a, receiver, .. })) => {
                assert_eq!(a, attempt);
                assert_eq!(receiver, "Kitchen");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
