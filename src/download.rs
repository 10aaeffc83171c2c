//! Sequential audio downloads into a destination directory.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::AudioItem;
use crate::session::{FileSubscription, FileWatchers};
use crate::td::types::{Audio, File};
use crate::td::{Gateway, GatewayError};

/// Audio extensions preferred when a mime type maps to several.
const PREFERRED_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "opus", "flac", "wav"];

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("download stopped before completing")]
    Stopped,
    #[error("client closed during download")]
    Closed,
    #[error("no local copy reported for file {0}")]
    MissingLocalPath(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub item: AudioItem,
    pub outcome: DownloadOutcome,
}

/// Progress reported while a batch runs.
pub enum DownloadEvent<'a> {
    Started(&'a AudioItem),
    Finished(&'a DownloadTask),
}

pub struct Downloader<'a> {
    gateway: &'a dyn Gateway,
    files: &'a FileWatchers,
    priority: i32,
}

impl<'a> Downloader<'a> {
    pub fn new(gateway: &'a dyn Gateway, files: &'a FileWatchers, priority: i32) -> Self {
        Self {
            gateway,
            files,
            priority,
        }
    }

    /// Downloads `items` one at a time into `destination`, creating it if needed.
    ///
    /// A failed item is recorded and the batch moves on. Once `cancel` fires, the
    /// in-flight item is aborted and it and everything after it end up `Cancelled`.
    /// Tasks come back in input order.
    pub async fn download_all(
        &self,
        items: Vec<AudioItem>,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(DownloadEvent<'_>),
    ) -> Result<Vec<DownloadTask>, DownloadError> {
        tokio::fs::create_dir_all(destination).await?;

        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            if cancel.is_cancelled() {
                tasks.push(DownloadTask {
                    item,
                    outcome: DownloadOutcome::Cancelled,
                });
                continue;
            }

            on_event(DownloadEvent::Started(&item));
            let target = unique_target(destination, &item).await;
            let partial = partial_path(&target);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort(&item, &partial).await;
                    DownloadOutcome::Cancelled
                }
                result = self.fetch(&item, &target, &partial) => match result {
                    Ok(path) => DownloadOutcome::Saved(path),
                    Err(err) => {
                        warn!(file_id = item.file_id(), error = %err, "download failed");
                        DownloadOutcome::Failed(err.to_string())
                    }
                },
            };

            let task = DownloadTask { item, outcome };
            on_event(DownloadEvent::Finished(&task));
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn fetch(&self, item: &AudioItem, target: &Path, partial: &Path) -> Result<PathBuf, DownloadError> {
        let file_id = item.file_id();
        let mut updates = self.files.subscribe(file_id);
        let snapshot = self.gateway.download_file(file_id, self.priority).await?;
        let file = wait_for_completion(&mut updates, snapshot).await?;
        drop(updates);

        if file.local.path.is_empty() {
            return Err(DownloadError::MissingLocalPath(file_id));
        }
        debug!(file_id, source = %file.local.path, target = %target.display(), "copying download");

        if let Err(err) = tokio::fs::copy(&file.local.path, partial).await {
            remove_partial(partial).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(partial, target).await {
            remove_partial(partial).await;
            return Err(err.into());
        }
        info!(file_id, path = %target.display(), "saved");
        Ok(target.to_path_buf())
    }

    async fn abort(&self, item: &AudioItem, partial: &Path) {
        let file_id = item.file_id();
        if let Err(err) = self.gateway.cancel_download_file(file_id).await {
            warn!(file_id, error = %err, "failed to cancel download");
        }
        remove_partial(partial).await;
        info!(file_id, "download cancelled");
    }
}

/// Follows file updates until TDLib reports the file complete. A download that was active
/// and goes idle without completing has stopped for good.
async fn wait_for_completion(updates: &mut FileSubscription<'_>, snapshot: File) -> Result<File, DownloadError> {
    let mut file = snapshot;
    let mut was_active = false;
    loop {
        if file.local.is_downloading_completed {
            return Ok(file);
        }
        if was_active && !file.local.is_downloading_active {
            return Err(DownloadError::Stopped);
        }
        was_active |= file.local.is_downloading_active;
        file = updates.next().await.ok_or(DownloadError::Closed)?;
    }
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %partial.display(), error = %err, "failed to remove partial file"),
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// The destination path for `item`; an existing file gets the file id appended.
async fn unique_target(destination: &Path, item: &AudioItem) -> PathBuf {
    let name = file_name(&item.audio, item.file_id());
    let target = destination.join(&name);
    if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return target;
    }
    let path = Path::new(&name);
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or(&name);
    let suffixed = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}-{}.{ext}", item.file_id()),
        None => format!("{stem}-{}", item.file_id()),
    };
    destination.join(suffixed)
}

/// The declared file name, else the title (or `audio-<id>`) with an extension from the
/// mime type.
pub fn file_name(audio: &Audio, file_id: i32) -> String {
    if let Some(name) = sanitize_file_name(&audio.file_name) {
        return name;
    }
    let stem = sanitize_file_name(&audio.title).unwrap_or_else(|| format!("audio-{file_id}"));
    match extension_for(&audio.mime_type) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    let extensions = mime_guess::get_mime_extensions_str(mime_type.trim())?;
    PREFERRED_EXTENSIONS
        .iter()
        .find(|preferred| extensions.contains(*preferred))
        .copied()
        .or_else(|| extensions.first().copied())
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.to_string())
}
