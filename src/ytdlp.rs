#![forbid(unsafe_code)]

//! `yt-dlp` backed implementation of [`VideoInfoProvider`].
//!
//! Lookups run `yt-dlp --dump-single-json` and translate the subset of the
//! payload we care about into a [`StreamCatalog`]. Fetches download exactly
//! one format into the caller's workspace directory. The link always follows
//! `--`, so yt-dlp never parses it as an option.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::link::ValidatedUrl;
use crate::process::{RunError, program_name, run_cancellable};
use crate::provider::{StreamCatalog, StreamInfo, VideoInfoProvider};

pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
const STDERR_LOG: &str = "yt-dlp.stderr.log";
const LOOKUP_JSON: &str = "yt-dlp.info.json";
const LOOKUP_PREFIX: &str = "tubegrab-lookup-";

#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    binary: PathBuf,
    cookies: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl Default for YtDlpProvider {
    fn default() -> Self {
        Self::new(DEFAULT_YTDLP_BIN)
    }
}

/// Subset of the `--dump-single-json` payload. Everything is optional because
/// extractors omit fields freely.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    ext: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    filesize: Option<i64>,
    filesize_approx: Option<i64>,
}

impl YtDlpProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
            scratch_dir: None,
        }
    }

    /// Parent directory for the short-lived folders lookups write their JSON
    /// into. Defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Passes `--cookies <path>` to every invocation when the file exists.
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("--no-warnings").arg("--no-progress").arg("--no-playlist");
        if let Some(cookies) = self.cookies.as_deref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn program(&self) -> String {
        program_name(&self.binary)
    }

    fn lookup_scratch(&self) -> Result<TempDir, ProviderError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(LOOKUP_PREFIX);
        match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(ProviderError::Scratch)
    }

    fn run_error(&self, err: RunError) -> ProviderError {
        match err {
            RunError::Cancelled => ProviderError::Cancelled,
            RunError::Spawn(source) => ProviderError::Spawn {
                program: self.program(),
                source,
            },
        }
    }
}

impl VideoInfoProvider for YtDlpProvider {
    fn lookup(
        &self,
        url: &ValidatedUrl,
        cancel: &CancellationToken,
    ) -> Result<StreamCatalog, ProviderError> {
        let scratch = self.lookup_scratch()?;
        let info_path = scratch.path().join(LOOKUP_JSON);

        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--")
            .arg(url.as_str());

        tracing::debug!(%url, "looking up video with yt-dlp");
        let finished = run_cancellable(
            command,
            Some(&info_path),
            &scratch.path().join(STDERR_LOG),
            cancel,
        )
        .map_err(|err| self.run_error(err))?;

        if !finished.status.success() {
            return Err(ProviderError::Failed {
                program: self.program(),
                status: finished.status.to_string(),
                stderr: finished.stderr,
            });
        }

        let raw = fs::read(&info_path).map_err(ProviderError::Scratch)?;
        let info: VideoInfo = serde_json::from_slice(&raw)
            .map_err(|err| ProviderError::Malformed(format!("metadata JSON: {err}")))?;
        build_catalog(info)
    }

    fn fetch(
        &self,
        url: &ValidatedUrl,
        stream: &StreamInfo,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ProviderError> {
        let stem = sanitize_format_id(&stream.id);
        let template = dest_dir.join(format!("{stem}.%(ext)s"));

        let mut command = self.command();
        command
            .arg("--format")
            .arg(format_selector(stream))
            .arg("--output")
            .arg(&template)
            .arg("--no-part")
            .arg("--no-mtime");
        if !stream.has_audio && stream.ext.as_deref() == Some("mp4") {
            command.arg("--merge-output-format").arg("mp4");
        }
        command.arg("--").arg(url.as_str());

        tracing::debug!(%url, stream = %stream.id, "fetching stream with yt-dlp");
        let finished = run_cancellable(command, None, &dest_dir.join(STDERR_LOG), cancel)
            .map_err(|err| self.run_error(err))?;

        if !finished.status.success() {
            return Err(ProviderError::Failed {
                program: self.program(),
                status: finished.status.to_string(),
                stderr: finished.stderr,
            });
        }

        find_output(dest_dir, &stem).ok_or_else(|| ProviderError::MissingOutput(stream.id.clone()))
    }
}

fn build_catalog(info: VideoInfo) -> Result<StreamCatalog, ProviderError> {
    let title = info
        .title
        .or(info.fulltitle)
        .filter(|title| !title.trim().is_empty())
        .ok_or_else(|| ProviderError::Malformed("metadata has no title".into()))?;

    let streams = info
        .formats
        .into_iter()
        .filter_map(|format| {
            let id = format.format_id?;
            let has_video = codec_present(format.vcodec.as_deref(), format.height.is_some());
            let has_audio = codec_present(format.acodec.as_deref(), false);
            // storyboards and other image-only entries
            if !has_video && !has_audio {
                return None;
            }
            Some(StreamInfo {
                id,
                ext: format.ext,
                height: format.height,
                fps: format.fps,
                has_video,
                has_audio,
                audio_bitrate: format.abr,
                size_bytes: format.filesize.or(format.filesize_approx),
            })
        })
        .collect();

    Ok(StreamCatalog {
        title,
        thumbnail_url: info.thumbnail.unwrap_or_default(),
        streams,
    })
}

fn codec_present(codec: Option<&str>, fallback: bool) -> bool {
    match codec {
        Some(codec) => !codec.is_empty() && codec != "none",
        None => fallback,
    }
}

/// Video-only formats get the best matching audio track merged in so the
/// downloaded file is playable on its own.
fn format_selector(stream: &StreamInfo) -> String {
    if stream.has_video && !stream.has_audio {
        format!(
            "{id}+bestaudio[ext=m4a]/{id}+bestaudio/{id}",
            id = stream.id
        )
    } else {
        stream.id.clone()
    }
}

/// Normalizes yt-dlp format identifiers so they become safe filenames.
fn sanitize_format_id(format_id: &str) -> String {
    format_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' | '+' => '_',
            _ => c,
        })
        .collect()
}

fn find_output(dest_dir: &Path, stem: &str) -> Option<PathBuf> {
    let prefix = format!("{stem}.");
    fs::read_dir(dest_dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.metadata().is_ok_and(|meta| meta.is_file()))
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy())
                .is_some_and(|name| {
                    name.starts_with(&prefix)
                        && !name.ends_with(".part")
                        && !name.ends_with(".ytdl")
                        && !name.ends_with(".log")
                })
        })
}
