//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the daemon client, the playback
//! session and the service. Each handler takes CLI args, the application
//! context and Output, and returns an ExitCode.

use tracing::{debug, error};

use crate::api::torrserver::download_torrent;
use crate::api::{ApiError, StreamingApi};
use crate::cli::{
    validate_info_hash, AddCmd, AddedResponse, Command, ExitCode, FileArg, FileRow, HashArg,
    Output, PlayCmd, PlayPathCmd, PlayResponse, PlaySourceCmd, RemoveCmd, SettingsAction,
    SettingsCmd, StatusOk, StatusResponse, TorrentSource,
};
use crate::context::AppContext;
use crate::models::{format_size, TorrentStatus};
use crate::service::{self, ServiceExit};
use crate::stream::{MediaKind, PlayError, PlayOutcome, PlayRequest};

/// Run one parsed command
pub async fn run(command: Command, ctx: &mut AppContext, output: &Output) -> ExitCode {
    match command {
        Command::Service => service_cmd(ctx, output).await,
        Command::Echo => echo_cmd(ctx, output).await,
        Command::Torrents => torrents_cmd(ctx, output).await,
        Command::Files(arg) => files_cmd(arg, ctx, output).await,
        Command::Status(arg) => status_cmd(arg, ctx, output).await,
        Command::Cat(arg) => cat_cmd(arg, ctx, output).await,
        Command::Add(cmd) => add_cmd(cmd, ctx, output).await,
        Command::Drop(arg) => drop_cmd(arg, ctx, output).await,
        Command::Remove(arg) => remove_cmd(arg, ctx, output).await,
        Command::Play(cmd) => play_cmd(cmd, ctx, output).await,
        Command::PlayMagnet(cmd) => play_magnet_cmd(cmd, ctx, output).await,
        Command::PlayPath(cmd) => play_path_cmd(cmd, ctx, output).await,
        Command::PlayUrl(cmd) => play_url_cmd(cmd, ctx, output).await,
        Command::BufferAndPlay(arg) => buffer_and_play_cmd(arg, ctx, output).await,
        Command::Settings(cmd) => settings_cmd(cmd, ctx, output).await,
    }
}

fn api_error(output: &Output, context: &str, e: ApiError) -> ExitCode {
    output.error(format!("{}: {}", context, e), ExitCode::NetworkError)
}

fn serialize_error(output: &Output, e: anyhow::Error) -> ExitCode {
    output.error(format!("Failed to serialize: {}", e), ExitCode::Error)
}

// =============================================================================
// Service Command
// =============================================================================

pub async fn service_cmd(ctx: &mut AppContext, output: &Output) -> ExitCode {
    output.info(format!(
        "Starting service (daemon on port {})",
        ctx.settings.service_port
    ));
    match service::run(ctx).await {
        Ok(ServiceExit::Aborted) => ExitCode::Success,
        Ok(ServiceExit::GaveUp) => output.error(
            "Daemon keeps crashing, supervision stopped",
            ExitCode::Error,
        ),
        Ok(ServiceExit::Disabled) => output.error(
            "TorrServer daemon not found, service disabled",
            ExitCode::DaemonNotFound,
        ),
        Err(e) => output.error(format!("{:#}", e), ExitCode::Error),
    }
}

// =============================================================================
// Echo Command
// =============================================================================

#[derive(serde::Serialize)]
struct EchoResponse {
    url: String,
    version: String,
}

pub async fn echo_cmd(ctx: &AppContext, output: &Output) -> ExitCode {
    match ctx.client.echo().await {
        Ok(version) => {
            let version = version.trim().to_string();
            let response = EchoResponse {
                url: ctx.client.base_url().to_string(),
                version: version.clone(),
            };
            match output.emit(response, || version) {
                Ok(()) => ExitCode::Success,
                Err(e) => serialize_error(output, e),
            }
        }
        Err(e) => api_error(output, "Daemon not reachable", e),
    }
}

// =============================================================================
// Browsing Commands
// =============================================================================

pub async fn torrents_cmd(ctx: &AppContext, output: &Output) -> ExitCode {
    let torrents = match ctx.client.torrents().await {
        Ok(torrents) => torrents,
        Err(e) => return api_error(output, "Failed to list torrents", e),
    };

    let text = || {
        if torrents.is_empty() {
            return "No torrents".to_string();
        }
        torrents
            .iter()
            .map(|t| {
                format!(
                    "{}  {:<18} {:>10}  {}",
                    t.hash,
                    t.state.to_string(),
                    format_size(t.torrent_size as f64),
                    t.display_name()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    match output.emit(&torrents, text) {
        Ok(()) => ExitCode::Success,
        Err(e) => serialize_error(output, e),
    }
}

/// Validated hash plus the daemon's view of the torrent
async fn lookup(
    hash: &str,
    ctx: &AppContext,
    output: &Output,
) -> Result<(String, TorrentStatus), ExitCode> {
    let hash = validate_info_hash(hash).map_err(|e| output.error(e, ExitCode::InvalidArgs))?;
    match ctx.client.torrent_info(&hash).await {
        Ok(info) => Ok((hash, info)),
        Err(e) => Err(api_error(output, "Failed to get torrent info", e)),
    }
}

pub async fn files_cmd(arg: HashArg, ctx: &AppContext, output: &Output) -> ExitCode {
    let (hash, info) = match lookup(&arg.hash, ctx, output).await {
        Ok(found) => found,
        Err(code) => return code,
    };
    if info.awaiting_metadata() {
        output.info("Metadata not available yet");
    }

    let rows: Vec<FileRow> = info
        .file_stats
        .iter()
        .map(|f| FileRow {
            id: f.id,
            path: f.path.clone(),
            length: f.length,
            kind: MediaKind::from_path(&f.path),
            stream_url: ctx.client.stream_url(&hash, &f.path, f.id),
        })
        .collect();

    let text = rows
        .iter()
        .map(|r| {
            format!(
                "{:>4}  {:<7} {:>10}  {}",
                r.id,
                r.kind.to_string(),
                format_size(r.length as f64),
                r.path
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    match output.emit(&rows, || text) {
        Ok(()) => ExitCode::Success,
        Err(e) => serialize_error(output, e),
    }
}

pub async fn status_cmd(arg: HashArg, ctx: &AppContext, output: &Output) -> ExitCode {
    let (hash, info) = match lookup(&arg.hash, ctx, output).await {
        Ok(found) => found,
        Err(code) => return code,
    };
    let (state, stats) = info.status_labels();
    let response = StatusResponse {
        hash,
        name: info.display_name().to_string(),
        state,
        stats,
        download_speed: info.download_speed,
        upload_speed: info.upload_speed,
    };
    let text = format!("{}\n{}\n{}", response.name, response.state, response.stats);
    match output.emit(&response, || text) {
        Ok(()) => ExitCode::Success,
        Err(e) => serialize_error(output, e),
    }
}

/// File path from the argument, or from the daemon's file list
async fn resolve_path(arg: &FileArg, ctx: &AppContext, output: &Output) -> Result<(String, String), ExitCode> {
    let (hash, info) = lookup(&arg.hash, ctx, output).await?;
    if let Some(path) = &arg.path {
        return Ok((hash, path.clone()));
    }
    match info.file(arg.file_id) {
        Some(file) => Ok((hash, file.path.clone())),
        None => Err(output.error(
            format!("No file with id {} in torrent", arg.file_id),
            ExitCode::InvalidArgs,
        )),
    }
}

#[derive(serde::Serialize)]
struct CatResponse {
    path: String,
    text: String,
}

pub async fn cat_cmd(arg: FileArg, ctx: &AppContext, output: &Output) -> ExitCode {
    let (hash, path) = match resolve_path(&arg, ctx, output).await {
        Ok(found) => found,
        Err(code) => return code,
    };
    if MediaKind::from_path(&path) != MediaKind::Text {
        debug!("'{}' does not look like a text file", path);
    }
    match ctx.client.read_text(&hash, &path, arg.file_id).await {
        Ok(text) => {
            let shown = text.clone();
            match output.emit(CatResponse { path, text }, || shown) {
                Ok(()) => ExitCode::Success,
                Err(e) => serialize_error(output, e),
            }
        }
        Err(e) => api_error(output, "Failed to read file", e),
    }
}

// =============================================================================
// Torrent Actions
// =============================================================================

/// Register any supported source with the daemon
async fn register(source: &TorrentSource, title: Option<&str>, ctx: &AppContext) -> Result<String, ApiError> {
    match source {
        TorrentSource::Magnet(link) => ctx.client.add_magnet(link, title.unwrap_or("")).await,
        TorrentSource::Url(url) => {
            let bytes = download_torrent(url).await?;
            let name = title
                .map(str::to_string)
                .or_else(|| url.rsplit('/').next().map(str::to_string))
                .unwrap_or_else(|| "file.torrent".to_string());
            ctx.client.add_torrent_bytes(&name, bytes).await
        }
        TorrentSource::Path(path) => ctx.client.add_torrent_file(path).await,
    }
}

pub async fn add_cmd(cmd: AddCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let source = TorrentSource::parse(&cmd.source);
    match register(&source, cmd.title.as_deref(), ctx).await {
        Ok(hash) => {
            ctx.host.notify("Torrent added");
            let text = hash.clone();
            match output.emit(AddedResponse { hash }, || text) {
                Ok(()) => ExitCode::Success,
                Err(e) => serialize_error(output, e),
            }
        }
        Err(e) => api_error(output, "Failed to add torrent", e),
    }
}

pub async fn drop_cmd(arg: HashArg, ctx: &AppContext, output: &Output) -> ExitCode {
    let hash = match validate_info_hash(&arg.hash) {
        Ok(hash) => hash,
        Err(e) => return output.error(e, ExitCode::InvalidArgs),
    };
    match ctx.client.drop_torrent(&hash).await {
        Ok(()) => match output.emit(StatusOk::default(), String::new) {
            Ok(()) => ExitCode::Success,
            Err(e) => serialize_error(output, e),
        },
        Err(e) => api_error(output, "Failed to drop torrent", e),
    }
}

pub async fn remove_cmd(arg: RemoveCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let hash = match validate_info_hash(&arg.hash) {
        Ok(hash) => hash,
        Err(e) => return output.error(e, ExitCode::InvalidArgs),
    };
    match ctx.client.remove_torrent(&hash, !arg.no_save_db).await {
        Ok(()) => match output.emit(StatusOk::default(), String::new) {
            Ok(()) => ExitCode::Success,
            Err(e) => serialize_error(output, e),
        },
        Err(e) => api_error(output, "Failed to remove torrent", e),
    }
}

// =============================================================================
// Play Commands
// =============================================================================

/// Run a playback session and report how it ended
async fn playback(hash: &str, request: PlayRequest, ctx: &AppContext, output: &Output) -> ExitCode {
    let mut session = ctx.session(hash);
    let outcome = session.run(request).await;

    let (label, code, error) = match &outcome {
        PlayOutcome::Played => ("played", ExitCode::Success, None),
        PlayOutcome::Cancelled { .. } => ("cancelled", ExitCode::Cancelled, None),
        PlayOutcome::Aborted => ("aborted", ExitCode::Cancelled, None),
        PlayOutcome::Failed(e) => {
            let code = match e {
                PlayError::NoCandidates(_) => ExitCode::NoCandidates,
                PlayError::Api(_) => ExitCode::NetworkError,
                _ => ExitCode::PlaybackFailed,
            };
            ("failed", code, Some(e.to_string()))
        }
    };

    if output.json {
        let response = PlayResponse {
            hash: hash.to_string(),
            outcome: label,
            error,
        };
        if let Err(e) = output.print(response) {
            return serialize_error(output, e);
        }
    }
    code
}

/// Failure before a session exists still retracts the resolved signal
fn registration_failed(ctx: &AppContext, output: &Output, e: ApiError) -> ExitCode {
    error!("Failed to register torrent: {}", e);
    ctx.host.resolved(None);
    ctx.host.notify(&e.to_string());
    api_error(output, "Failed to add torrent", e)
}

pub async fn play_cmd(cmd: PlayCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let hash = match validate_info_hash(&cmd.hash) {
        Ok(hash) => hash,
        Err(e) => return output.error(e, ExitCode::InvalidArgs),
    };
    let request = PlayRequest::InfoHash {
        buffer: !cmd.no_buffer,
    };
    playback(&hash, request, ctx, output).await
}

async fn play_source(
    source: TorrentSource,
    title: Option<&str>,
    no_buffer: bool,
    ctx: &AppContext,
    output: &Output,
) -> ExitCode {
    let hash = match register(&source, title, ctx).await {
        Ok(hash) => hash,
        Err(e) => return registration_failed(ctx, output, e),
    };
    output.info(format!("Registered {}", hash));
    let request = PlayRequest::InfoHash { buffer: !no_buffer };
    playback(&hash, request, ctx, output).await
}

pub async fn play_magnet_cmd(cmd: PlaySourceCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    if !cmd.source.starts_with("magnet:") {
        return output.error("Expected a magnet link", ExitCode::InvalidArgs);
    }
    let source = TorrentSource::Magnet(cmd.source.clone());
    play_source(source, cmd.title.as_deref(), cmd.no_buffer, ctx, output).await
}

pub async fn play_url_cmd(cmd: PlaySourceCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    let source = TorrentSource::parse(&cmd.source);
    if !matches!(source, TorrentSource::Url(_)) {
        return output.error("Expected an http(s) URL", ExitCode::InvalidArgs);
    }
    play_source(source, cmd.title.as_deref(), cmd.no_buffer, ctx, output).await
}

pub async fn play_path_cmd(cmd: PlayPathCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    if !cmd.path.is_file() {
        return output.error(
            format!("No such file: {}", cmd.path.display()),
            ExitCode::InvalidArgs,
        );
    }
    let source = TorrentSource::Path(cmd.path.clone());
    play_source(source, None, cmd.no_buffer, ctx, output).await
}

pub async fn buffer_and_play_cmd(arg: FileArg, ctx: &AppContext, output: &Output) -> ExitCode {
    let (hash, path) = match resolve_path(&arg, ctx, output).await {
        Ok(found) => found,
        Err(code) => return code,
    };
    let request = PlayRequest::BufferAndPlay {
        file_id: arg.file_id,
        path,
    };
    playback(&hash, request, ctx, output).await
}

// =============================================================================
// Settings Command
// =============================================================================

pub async fn settings_cmd(cmd: SettingsCmd, ctx: &AppContext, output: &Output) -> ExitCode {
    match cmd.action {
        SettingsAction::Show => match ctx.client.settings().await {
            Ok(settings) => match output.print(settings) {
                Ok(()) => ExitCode::Success,
                Err(e) => serialize_error(output, e),
            },
            Err(e) => api_error(output, "Failed to read daemon settings", e),
        },
        SettingsAction::Push => {
            let desired = ctx.settings.daemon_settings_json();
            match service::sync_daemon_settings(&ctx.client, &desired, ctx.host.as_ref()).await {
                Ok(changed) => {
                    let text = if changed {
                        "Daemon settings updated"
                    } else {
                        "Daemon settings already up to date"
                    };
                    match output.emit(StatusOk::default(), || text.to_string()) {
                        Ok(()) => ExitCode::Success,
                        Err(e) => serialize_error(output, e),
                    }
                }
                Err(e) => api_error(output, "Failed to push daemon settings", e),
            }
        }
    }
}
