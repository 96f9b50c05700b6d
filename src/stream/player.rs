//! Local Player - mpv playback
//!
//! Plays media in an mpv window and drives it over mpv's JSON IPC socket.
//! Each `load` starts a fresh mpv process; events from a replaced or stopped
//! process are dropped so the controller only hears about the current one.

use super::{spawn_error, LoadId, Sink, SinkError, SinkEvent, SinkKind};
use crate::events::EventSender;
use crate::models::PlayableRef;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Observer id for `time-pos` property changes
const TIME_POS_OBSERVER: u64 = 1;
/// Smallest position change worth reporting
const POSITION_STEP_MS: u64 = 250;

/// Local player backed by mpv
pub struct MpvPlayer {
    program: String,
    /// `--hwdec` value; None disables hardware decoding
    hwdec: Option<String>,
    volume: f64,
    subtitle: Option<PathBuf>,
    events: EventSender,
    /// Generation of the live mpv process; bumped on load and stop
    current: Arc<AtomicU64>,
    session: Option<UnboundedSender<Value>>,
}

impl MpvPlayer {
    /// Create a player running `mpv` from PATH
    pub fn new(events: EventSender) -> Self {
        Self::with_program("mpv", events)
    }

    /// Create with custom mpv path
    pub fn with_program(program: impl Into<String>, events: EventSender) -> Self {
        Self {
            program: program.into(),
            hwdec: None,
            volume: 1.0,
            subtitle: None,
            events,
            current: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    /// Use hardware decoding through `backend` (e.g. "nvdec", "vaapi")
    pub fn with_hwdec(mut self, backend: Option<String>) -> Self {
        self.hwdec = backend;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Command line for playing `target` from `start_ms`
    pub fn args(&self, target: &str, start_ms: u64, ipc_path: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-terminal".to_string(),
            "--force-window=immediate".to_string(),
            format!("--input-ipc-server={}", ipc_path.display()),
            format!("--start={:.3}", start_ms as f64 / 1000.0),
            format!("--volume={}", (self.volume * 100.0).round() as u32),
            format!("--hwdec={}", self.hwdec.as_deref().unwrap_or("no")),
        ];
        if let Some(sub) = &self.subtitle {
            args.push(format!("--sub-file={}", sub.display()));
        }
        args.push("--".to_string());
        args.push(target.to_string());
        args
    }

    fn send(&self, command: Value) -> Result<(), SinkError> {
        let session = self.session.as_ref().ok_or(SinkError::NotLoaded)?;
        session
            .send(command)
            .map_err(|_| SinkError::Rejected("mpv is no longer running".to_string()))
    }
}

impl Sink for MpvPlayer {
    fn kind(&self) -> SinkKind {
        SinkKind::Local
    }

    fn current_load(&self) -> LoadId {
        self.current.load(Ordering::SeqCst)
    }

    fn load(&mut self, media: &PlayableRef, start_ms: u64) -> Result<(), SinkError> {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.session = None; // drops the old process

        let ipc_path = std::env::temp_dir().join(format!(
            "castplay-mpv-{}-{}.sock",
            std::process::id(),
            generation
        ));

        let child = Command::new(&self.program)
            .args(self.args(&media.value(), start_ms, &ipc_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        info!(media = %media, start_ms, "mpv started");

        let (tx, rx) = mpsc::unbounded_channel();
        self.session = Some(tx);

        let ctx = SessionContext {
            events: self.events.clone(),
            current: Arc::clone(&self.current),
            generation,
        };
        tokio::spawn(run_session(child, ipc_path, rx, ctx));
        Ok(())
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.send(json!({ "command": ["set_property", "pause", false] }))
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.send(json!({ "command": ["set_property", "pause", true] }))
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), SinkError> {
        let secs = position_ms as f64 / 1000.0;
        self.send(json!({ "command": ["seek", secs, "absolute"] }))
    }

    fn set_volume(&mut self, volume: f64) -> Result<(), SinkError> {
        self.volume = volume.clamp(0.0, 1.0);
        if self.session.is_none() {
            return Ok(()); // applied on next load
        }
        self.send(json!({ "command": ["set_property", "volume", self.volume * 100.0] }))
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.current.fetch_add(1, Ordering::SeqCst);
        if self.session.take().is_some() {
            debug!("mpv stopped");
        }
        Ok(())
    }

    fn set_subtitle(&mut self, path: Option<&Path>) -> Result<(), SinkError> {
        self.subtitle = path.map(Path::to_path_buf);
        match (path, self.session.is_some()) {
            (Some(path), true) => self.send(json!({
                "command": ["sub-add", path.to_string_lossy(), "select"]
            })),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionContext {
    events: EventSender,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl SessionContext {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn emit(&self, event: SinkEvent) {
        if self.is_current() {
            self.events.sink_event(SinkKind::Local, self.generation, event);
        }
    }
}

/// Owns one mpv process: forwards commands, reports position and exit.
/// Dropping the command sender kills the process.
async fn run_session(
    mut child: Child,
    ipc_path: PathBuf,
    mut commands: UnboundedReceiver<Value>,
    ctx: SessionContext,
) {
    let mut ipc = match ipc::IpcChannel::connect(&ipc_path).await {
        Ok(mut channel) => {
            let observe = json!({ "command": ["observe_property", TIME_POS_OBSERVER, "time-pos"] });
            if let Err(e) = channel.send(&observe).await {
                warn!(error = %e, "mpv position updates unavailable");
            }
            Some(channel)
        }
        Err(e) => {
            warn!(error = %e, "mpv IPC unavailable, transport commands will be ignored");
            None
        }
    };
    let mut last_position: Option<u64> = None;

    loop {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => ctx.emit(SinkEvent::Ended),
                    Ok(status) => ctx.emit(SinkEvent::Error(format!("mpv exited with {}", status))),
                    Err(e) => ctx.emit(SinkEvent::Error(e.to_string())),
                }
                break;
            }
            command = commands.recv() => match command {
                Some(command) => {
                    if let Some(channel) = ipc.as_mut() {
                        if let Err(e) = channel.send(&command).await {
                            warn!(error = %e, "mpv command failed");
                        }
                    }
                }
                None => {
                    let _ = child.kill().await;
                    break;
                }
            },
            Some(message) = recv_ipc(&mut ipc) => {
                if let Some(ms) = position_from_message(&message) {
                    let moved = last_position.map_or(true, |last| last.abs_diff(ms) >= POSITION_STEP_MS);
                    if moved {
                        last_position = Some(ms);
                        ctx.emit(SinkEvent::PositionUpdate(ms));
                    }
                }
            }
        }
    }

    let _ = tokio::fs::remove_file(&ipc_path).await;
}

/// Next IPC message; pends forever once the socket is gone
async fn recv_ipc(ipc: &mut Option<ipc::IpcChannel>) -> Option<Value> {
    let Some(channel) = ipc.as_mut() else {
        return std::future::pending().await;
    };

    match channel.next_message().await {
        Ok(Some(message)) => Some(message),
        _ => {
            *ipc = None;
            None
        }
    }
}

/// `time-pos` property change in milliseconds
pub fn position_from_message(message: &Value) -> Option<u64> {
    if message.get("event")?.as_str()? != "property-change"
        || message.get("name")?.as_str()? != "time-pos"
    {
        return None;
    }
    let secs = message.get("data")?.as_f64()?;
    (secs >= 0.0).then(|| (secs * 1000.0).round() as u64)
}

#[cfg(unix)]
mod ipc {
    use serde_json::Value;
    use std::io;
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::UnixStream;

    const CONNECT_ATTEMPTS: u32 = 40;
    const CONNECT_RETRY: Duration = Duration::from_millis(50);

    pub struct IpcChannel {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl IpcChannel {
        /// mpv creates the socket shortly after start; retry until it does
        pub async fn connect(path: &Path) -> io::Result<Self> {
            let mut last_error = io::Error::new(io::ErrorKind::NotFound, "socket not created");
            for _ in 0..CONNECT_ATTEMPTS {
                match UnixStream::connect(path).await {
                    Ok(stream) => {
                        let (read, writer) = stream.into_split();
                        return Ok(Self {
                            lines: BufReader::new(read).lines(),
                            writer,
                        });
                    }
                    Err(e) => last_error = e,
                }
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(last_error)
        }

        pub async fn send(&mut self, command: &Value) -> io::Result<()> {
            let mut line = command.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await
        }

        pub async fn next_message(&mut self) -> io::Result<Option<Value>> {
            while let Some(line) = self.lines.next_line().await? {
                if let Ok(value) = serde_json::from_str(&line) {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        }
    }
}

#[cfg(not(unix))]
mod ipc {
    use serde_json::Value;
    use std::io;
    use std::path::Path;

    pub struct IpcChannel;

    impl IpcChannel {
        pub async fn connect(_path: &Path) -> io::Result<Self> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "mpv IPC needs unix sockets",
            ))
        }

        pub async fn send(&mut self, _command: &Value) -> io::Result<()> {
            Ok(())
        }

        pub async fn next_message(&mut self) -> io::Result<Option<Value>> {
            Ok(None)
        }
    }
}
