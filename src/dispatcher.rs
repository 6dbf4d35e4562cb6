#![forbid(unsafe_code)]

//! Download delivery: re-resolve the link, fetch the chosen rendition into a
//! private workspace, transcode to MP3 when audio was requested, and hand the
//! finished file to the HTTP layer.
//!
//! The workspace is a [`TempDir`]. It travels inside [`PreparedDownload`] and
//! then inside the response body stream, so it disappears when the body has
//! been sent, when the client goes away, or as soon as any step fails.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tempfile::TempDir;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, TargetError};
use crate::link::{ValidatedUrl, validate};
use crate::provider::VideoInfoProvider;
use crate::resolver::Resolver;
use crate::security::attachment_filename;
use crate::session::SessionStore;
use crate::transcode::{MP3_BITRATE_KBPS, Transcoder};

const WORKSPACE_PREFIX: &str = "tubegrab-";
const AUDIO_OUTPUT_FILE: &str = "tubegrab-audio-output.mp3";
const AUDIO_EXTENSION: &str = "mp3";
const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: ValidatedUrl,
    pub stream_id: String,
    pub want_audio: bool,
}

/// Picks the link a download refers to. An explicit URL always wins; the
/// session entry behind `token` is only a fallback.
pub fn download_url(
    explicit: Option<&str>,
    sessions: &SessionStore,
    token: Option<&str>,
) -> Result<ValidatedUrl, TargetError> {
    if let Some(raw) = explicit.filter(|raw| !raw.trim().is_empty()) {
        return Ok(validate(raw)?);
    }
    token
        .and_then(|token| sessions.get(token))
        .map(|(url, _)| url)
        .ok_or(TargetError::MissingUrl)
}

/// A finished file waiting to be streamed to the client.
#[derive(Debug)]
pub struct PreparedDownload {
    pub file_name: String,
    pub content_type: String,
    pub path: PathBuf,
    pub len: u64,
    workspace: TempDir,
}

impl PreparedDownload {
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Opens the file as a byte stream. The stream owns the workspace.
    pub async fn into_stream(
        self,
    ) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
        let file = tokio::fs::File::open(&self.path).await?;
        let workspace = self.workspace;
        Ok(ReaderStream::new(file).map(move |chunk| {
            let _ = &workspace;
            chunk
        }))
    }
}

#[derive(Debug)]
pub struct Dispatcher<P, T> {
    resolver: Arc<Resolver<P>>,
    transcoder: T,
    work_dir: PathBuf,
    bitrate_kbps: u32,
}

impl<P: VideoInfoProvider, T: Transcoder> Dispatcher<P, T> {
    pub fn new(resolver: Arc<Resolver<P>>, transcoder: T, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            transcoder,
            work_dir: work_dir.into(),
            bitrate_kbps: MP3_BITRATE_KBPS,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Runs the whole download. Blocking; call it from a blocking task.
    pub fn dispatch(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<PreparedDownload, DownloadError> {
        let DownloadRequest {
            url,
            stream_id,
            want_audio,
        } = request;

        let (metadata, catalog) = self
            .resolver
            .resolve_with_catalog(url, cancel)
            .map_err(DownloadError::from_provider)?;
        let not_found = || DownloadError::NotFound {
            stream_id: stream_id.clone(),
        };
        let rendition = metadata.rendition(stream_id).ok_or_else(not_found)?;
        let stream = catalog.find(stream_id).ok_or_else(not_found)?;
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.work_dir)?;
        tracing::info!(
            %url,
            stream = %stream_id,
            quality = %rendition.quality_label,
            want_audio,
            "starting download"
        );

        let raw = self
            .resolver
            .provider()
            .fetch(url, stream, workspace.path(), cancel)
            .map_err(DownloadError::from_provider)
            .inspect_err(|err| tracing::warn!(%url, error = %err, "stream fetch failed"))?;

        let (path, file_name, content_type) = if *want_audio {
            if !stream.is_audio_only() {
                tracing::info!(
                    stream = %stream_id,
                    "transcoding audio from a video stream; the full video was fetched"
                );
            }
            let output = workspace.path().join(AUDIO_OUTPUT_FILE);
            let result = self
                .transcoder
                .to_mp3(&raw, &output, self.bitrate_kbps, cancel);
            if let Err(err) = fs::remove_file(&raw) {
                tracing::debug!(error = %err, "could not remove raw download early");
            }
            result
                .map_err(DownloadError::from_transcoder)
                .inspect_err(|err| tracing::warn!(%url, error = %err, "transcode failed"))?;
            (
                output,
                attachment_filename(&metadata.title, AUDIO_EXTENSION),
                AUDIO_CONTENT_TYPE.to_string(),
            )
        } else {
            let ext = raw
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| rendition.container.clone());
            let content_type = mime_guess::from_ext(&ext)
                .first_or_octet_stream()
                .to_string();
            (raw, attachment_filename(&metadata.title, &ext), content_type)
        };

        let len = fs::metadata(&path)?.len();
        tracing::info!(%url, file = %file_name, bytes = len, "download ready");
        Ok(PreparedDownload {
            file_name,
            content_type,
            path,
            len,
            workspace,
        })
    }
}
