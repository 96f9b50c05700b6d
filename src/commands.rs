//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the castplay library.
//! Each handler takes CLI args and Output, returns ExitCode.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use castplay::api::subtitles::query_or_empty;
use castplay::api::{StremioSubtitles, VideoIdentity};
use castplay::config::ConfigStore;
use castplay::controller::{ControllerError, PlaybackController, PlaybackState};
use castplay::events::{self, Event, Intent, Message};
use castplay::models::{
    CastDevice, GpuInfo, LoopMode, PlayMode, PlaylistItem, SubtitleCandidate,
};
use castplay::resolver::InputResolver;
use castplay::settings::{normalize_languages, Settings, SettingsPatch};
use castplay::stream::{CastSink, CattCaster, MpvPlayer, Sink, SinkEvent, SinkKind};
use castplay::subtitles::SubtitleMatcher;

use crate::cli::{
    seek_target, ConfigAction, ConfigCmd, Control, DevicesCmd, ExitCode, Output, PlayCmd,
    SubtitlesCmd, CONTROLS_HELP,
};

/// Resolve the settings file: `--config` or the per-user default
fn settings_path(config: Option<PathBuf>) -> Option<PathBuf> {
    config.or_else(ConfigStore::default_path)
}

// =============================================================================
// Play Command
// =============================================================================

/// Session snapshot printed by `status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView<'a> {
    state: PlaybackState,
    mode: PlayMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item: Option<&'a PlaylistItem>,
    position_ms: u64,
    position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    playlist_len: usize,
    loop_mode: LoopMode,
    volume: f64,
    subtitles: &'a [SubtitleCandidate],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn status_view<L: Sink, C: CastSink>(controller: &PlaybackController<L, C>) -> StatusView<'_> {
    let session = controller.session();
    StatusView {
        state: controller.state(),
        mode: session.mode,
        receiver: session.active_receiver.as_deref(),
        item: session.current_item.as_ref(),
        position_ms: session.position_ms,
        position: session.format_position(),
        index: controller.playlist().current_index(),
        playlist_len: controller.playlist().len(),
        loop_mode: controller.playlist().loop_mode(),
        volume: controller.settings().volume,
        subtitles: &session.subtitles,
        error: controller.last_error().map(ToString::to_string),
    }
}

fn status_line<L: Sink, C: CastSink>(controller: &PlaybackController<L, C>) -> String {
    let session = controller.session();
    let mut line = format!("[{}]", controller.state());
    if let Some(item) = &session.current_item {
        line.push_str(&format!(" {} @ {}", item.display, session.format_position()));
    }
    if let Some(receiver) = &session.active_receiver {
        line.push_str(&format!(" on {}", receiver));
    }
    if let Some(failure) = controller.last_error() {
        line.push_str(&format!(" ({})", failure));
    }
    line
}

fn print_status<L: Sink, C: CastSink>(controller: &PlaybackController<L, C>, output: &Output) {
    if let Err(e) = output.print_either(status_line(controller), status_view(controller)) {
        tracing::warn!(error = %e, "could not print status");
    }
}

fn print_playlist<L: Sink, C: CastSink>(controller: &PlaybackController<L, C>, output: &Output) {
    let playlist = controller.playlist();
    let human = playlist
        .items()
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = if playlist.current_index() == Some(i) { '>' } else { ' ' };
            format!("{} {:>3}. {}", marker, i + 1, item.display)
        })
        .collect::<Vec<_>>()
        .join("\n");
    if let Err(e) = output.print_either(human, playlist.items()) {
        tracing::warn!(error = %e, "could not print playlist");
    }
}

/// Exit code for a session that ended in `Error`
fn failure_code<L: Sink, C: CastSink>(controller: &PlaybackController<L, C>) -> ExitCode {
    match controller.last_error().map(|f| f.sink) {
        Some(SinkKind::Cast) => ExitCode::CastFailed,
        _ => ExitCode::Error,
    }
}

pub async fn play_cmd(
    cmd: PlayCmd,
    device: Option<&str>,
    config: Option<PathBuf>,
    output: &Output,
) -> ExitCode {
    let Some(path) = settings_path(config) else {
        return output.error("Could not determine config directory", ExitCode::Error);
    };

    let gpu = cmd.gpu_info();
    let defaults = gpu.as_ref().map(Settings::defaults_for).unwrap_or_default();
    let (tx, mut rx) = events::queue();
    let mut store = ConfigStore::open_with_defaults(path, defaults)
        .with_events(events::forward_store_events(tx.clone()));

    if let Some(device) = device {
        store.update(
            SettingsPatch::new()
                .play_mode(PlayMode::Cast)
                .cast_device(Some(device.to_string())),
        );
    }

    let settings = store.settings().clone();
    let hwdec = settings
        .hardware_acceleration
        .then(|| hwdec_backend(gpu.as_ref()).to_string());

    let local = MpvPlayer::with_program(cmd.mpv.clone(), tx.clone())
        .with_hwdec(hwdec)
        .with_volume(settings.volume);
    let cast = CattCaster::with_path(cmd.catt.clone(), tx.clone());

    let mut resolver = InputResolver::new();
    resolver.set_base_dir(std::env::current_dir().ok());

    let mut controller = PlaybackController::new(local, cast, store, tx.clone())
        .with_resolver(resolver);
    if cmd.online_subtitles {
        let provider = StremioSubtitles::new(settings.subtitle_languages.clone());
        controller = controller.with_provider(Arc::new(provider));
    }

    if let Some(choice) = cmd.r#loop {
        if let Err(e) = controller.set_loop_mode(choice.into()) {
            return output.error(e.to_string(), ExitCode::Error);
        }
    }

    match controller.enqueue(&cmd.inputs) {
        Ok(0) => return output.error("Nothing to play", ExitCode::NothingToPlay),
        Ok(count) => output.info(format!("{} item(s) in playlist", count)),
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    }

    if let Err(e) = controller.play_index(0) {
        let code = match e {
            ControllerError::NoReceiver => ExitCode::DeviceNotFound,
            _ => failure_code(&controller),
        };
        return output.error(e.to_string(), code);
    }
    if let Some(secs) = cmd.start_secs() {
        if let Err(e) = controller.seek(secs.saturating_mul(1000)) {
            output.info(format!("Could not seek: {}", e));
        }
    }

    output.info("Type 'help' for controls.");
    print_status(&controller, output);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let before = (controller.state(), controller.session().current_item.clone());

        tokio::select! {
            line = stdin.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => {
                        stdin_open = false;
                        continue;
                    }
                };
                match Control::parse(&line) {
                    Ok(Control::Quit) => break,
                    Ok(Control::Help) => output.info(CONTROLS_HELP),
                    Ok(Control::Status) => print_status(&controller, output),
                    Ok(Control::Playlist) => print_playlist(&controller, output),
                    Ok(Control::SeekBy(delta)) => {
                        let position = seek_target(controller.session().position_ms, delta);
                        submit(&mut controller, Intent::Seek(position), output);
                    }
                    Ok(Control::CycleLoop) => {
                        let mode = controller.playlist().loop_mode().cycle();
                        submit(&mut controller, Intent::SetLoopMode(mode), output);
                    }
                    Ok(Control::VolumeBy(delta)) => {
                        let volume = controller.settings().volume + f64::from(delta) / 100.0;
                        submit(&mut controller, Intent::SetVolume(volume.clamp(0.0, 1.0)), output);
                    }
                    Ok(Control::Intent(intent)) => submit(&mut controller, intent, output),
                    Err(e) => output.info(e),
                }
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                let ended = matches!(
                    message,
                    Message::Event(Event::Sink { event: SinkEvent::Ended, .. })
                );
                if let Err(e) = controller.dispatch(message) {
                    output.info(format!("Error: {}", e));
                }
                if ended && controller.state() == PlaybackState::Idle {
                    output.info("Playlist finished.");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        let after = (controller.state(), controller.session().current_item.clone());
        if before != after {
            print_status(&controller, output);
        }
        // Nobody left to reset or fall back
        if !stdin_open && controller.state() == PlaybackState::Error {
            break;
        }
    }

    let code = if controller.state() == PlaybackState::Error {
        failure_code(&controller)
    } else {
        ExitCode::Success
    };

    if let Err(e) = controller.shutdown() {
        output.error(format!("Failed to save settings: {}", e), ExitCode::Error);
    }
    if let Some(failure) = controller.last_error() {
        return output.error(failure.to_string(), code);
    }
    code
}

/// Apply a typed intent, reporting rejections without leaving the session
fn submit<L: Sink, C: CastSink>(
    controller: &mut PlaybackController<L, C>,
    intent: Intent,
    output: &Output,
) {
    if let Err(e) = controller.apply(intent) {
        output.info(format!("Error: {}", e));
    }
}

/// mpv decoder for the GPU fact; "auto-safe" when the vendor is unknown
fn hwdec_backend(gpu: Option<&GpuInfo>) -> &'static str {
    gpu.map(|g| g.kind.hwdec_backend()).unwrap_or("auto-safe")
}

// =============================================================================
// Config Command
// =============================================================================

pub async fn config_cmd(cmd: ConfigCmd, config: Option<PathBuf>, output: &Output) -> ExitCode {
    let Some(path) = settings_path(config) else {
        return output.error("Could not determine config directory", ExitCode::Error);
    };

    if let ConfigAction::Path = cmd.action {
        #[derive(Serialize)]
        struct PathOut {
            path: PathBuf,
        }
        let human = path.display().to_string();
        if let Err(e) = output.print_either(human, PathOut { path }) {
            return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
        }
        return ExitCode::Success;
    }

    let mut store = ConfigStore::open(path);
    let settings = match cmd.action {
        ConfigAction::Show | ConfigAction::Path => store.settings().clone(),
        ConfigAction::Set { key, value } => match SettingsPatch::from_key_value(&key, &value) {
            Ok(patch) => store.update(patch),
            Err(e) => return output.error(e, ExitCode::InvalidArgs),
        },
        ConfigAction::Reset => store.reset(),
    };

    if let Err(e) = store.flush() {
        return output.error(e.to_string(), ExitCode::Error);
    }
    if let Err(e) = output.print(&settings) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

// =============================================================================
// Subtitles Command
// =============================================================================

pub async fn subtitles_cmd(
    cmd: SubtitlesCmd,
    config: Option<PathBuf>,
    output: &Output,
) -> ExitCode {
    let languages = match cmd.languages() {
        Some(requested) => normalize_languages(&requested),
        None => settings_path(config)
            .map(|path| ConfigStore::open(path).settings().subtitle_languages.clone())
            .unwrap_or_else(|| Settings::default().subtitle_languages),
    };
    if languages.is_empty() {
        return output.error("No valid language codes", ExitCode::InvalidArgs);
    }

    output.info(format!(
        "Looking for subtitles for {} ({})",
        cmd.video.display(),
        languages.join(",")
    ));

    let matcher = SubtitleMatcher::with_fs(languages.clone());
    let local = matcher.local_candidates(&cmd.video);

    let downloaded = if cmd.online {
        let video = cmd.video.clone();
        let identity = match tokio::task::spawn_blocking(move || VideoIdentity::from_file(&video)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                return output.error(
                    format!("Cannot read {}: {}", cmd.video.display(), e),
                    ExitCode::InvalidArgs,
                )
            }
            Err(e) => return output.error(e.to_string(), ExitCode::Error),
        };
        let identity = VideoIdentity {
            imdb_id: cmd.imdb.clone(),
            ..identity
        };
        let provider = StremioSubtitles::new(languages);
        query_or_empty(&provider, &identity).await
    } else {
        Vec::new()
    };

    let candidates = SubtitleMatcher::merge(local, downloaded);
    if candidates.is_empty() {
        return output.error("No subtitles found", ExitCode::NothingToPlay);
    }

    let human = candidates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    if let Err(e) = output.print_either(human, &candidates) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

// =============================================================================
// Devices Command
// =============================================================================

pub async fn devices_cmd(cmd: DevicesCmd, output: &Output) -> ExitCode {
    output.info("Scanning for cast receivers...");

    // Use catt scan to discover devices (no timeout flag in catt 0.13+)
    match tokio::process::Command::new(&cmd.catt)
        .arg("scan")
        .output()
        .await
    {
        Ok(result) => {
            let stdout = String::from_utf8_lossy(&result.stdout);
            let stderr = String::from_utf8_lossy(&result.stderr);

            // catt sometimes reports devices on stderr
            let mut devices = CastDevice::parse_catt_scan(&stdout);
            if devices.is_empty() {
                devices = CastDevice::parse_catt_scan(&stderr);
            }
            if devices.is_empty() {
                return output.error("No cast receivers found", ExitCode::DeviceNotFound);
            }

            let human = devices
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            if let Err(e) = output.print_either(human, &devices) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => {
            if e.kind() == std::io::ErrorKind::NotFound {
                output.error(
                    "catt not found. Install with: pip install catt",
                    ExitCode::Error,
                )
            } else {
                output.error(format!("Device scan failed: {}", e), ExitCode::NetworkError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castplay::models::GpuKind;

    #[test]
    fn test_hwdec_backend_follows_gpu() {
        let nvidia = GpuInfo {
            kind: GpuKind::Nvidia,
            name: "RTX 3070".into(),
            vram_mb: 8192,
        };
        assert_eq!(hwdec_backend(Some(&nvidia)), "nvdec");
        assert_eq!(hwdec_backend(None), "auto-safe");
    }

    #[test]
    fn test_settings_path_prefers_flag() {
        let path = settings_path(Some("/tmp/castplay.json".into()));
        assert_eq!(path, Some(PathBuf::from("/tmp/castplay.json")));
    }
}
