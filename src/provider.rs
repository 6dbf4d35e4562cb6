#![forbid(unsafe_code)]

//! Boundary to the external video-info provider.
//!
//! The provider knows how to describe a video (title, thumbnail, stream
//! catalog) and how to fetch the bytes of one stream. Everything else in the
//! crate only sees the types declared here.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::link::ValidatedUrl;

/// Frame rates at or above this count as "60 fps" rungs of the ladder.
pub const HIGH_FRAME_RATE: f64 = 50.0;

/// One stream as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Provider-assigned, opaque identifier (yt-dlp `format_id`).
    pub id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Audio bitrate in kbit/s.
    pub audio_bitrate: Option<f64>,
    pub size_bytes: Option<i64>,
}

impl StreamInfo {
    /// Reported size, clamped to zero when missing or nonsensical.
    pub fn approximate_size(&self) -> u64 {
        self.size_bytes
            .and_then(|size| u64::try_from(size).ok())
            .unwrap_or(0)
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    pub fn is_muxed(&self) -> bool {
        self.has_audio && self.has_video
    }

    fn matches_container(&self, container: &str) -> bool {
        self.ext
            .as_deref()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(container))
    }

    fn is_high_frame_rate(&self) -> bool {
        self.fps.is_some_and(|fps| fps >= HIGH_FRAME_RATE)
    }
}

/// Everything one lookup returns for a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCatalog {
    pub title: String,
    pub thumbnail_url: String,
    pub streams: Vec<StreamInfo>,
}

impl StreamCatalog {
    pub fn find(&self, id: &str) -> Option<&StreamInfo> {
        self.streams.iter().find(|stream| stream.id == id)
    }

    /// Best video stream with the given height, frame-rate class and
    /// container. Muxed streams beat video-only ones, then bigger beats
    /// smaller, then earlier in the catalog wins.
    pub fn best_video(
        &self,
        height: u32,
        high_frame_rate: bool,
        container: &str,
    ) -> Option<&StreamInfo> {
        best_by(
            self.streams.iter().filter(|stream| {
                stream.has_video
                    && stream.height == Some(height)
                    && stream.is_high_frame_rate() == high_frame_rate
                    && stream.matches_container(container)
            }),
            |a, b| {
                a.has_audio
                    .cmp(&b.has_audio)
                    .then(a.approximate_size().cmp(&b.approximate_size()))
            },
        )
    }

    /// Audio-only stream with the highest bitrate.
    pub fn best_audio(&self) -> Option<&StreamInfo> {
        best_by(
            self.streams.iter().filter(|stream| stream.is_audio_only()),
            |a, b| {
                a.audio_bitrate
                    .unwrap_or(0.0)
                    .total_cmp(&b.audio_bitrate.unwrap_or(0.0))
                    .then(a.approximate_size().cmp(&b.approximate_size()))
            },
        )
    }

    /// Muxed stream to fall back on when no audio-only stream exists.
    pub fn best_muxed(&self) -> Option<&StreamInfo> {
        best_by(
            self.streams.iter().filter(|stream| stream.is_muxed()),
            |a, b| {
                a.height
                    .unwrap_or(0)
                    .cmp(&b.height.unwrap_or(0))
                    .then(a.approximate_size().cmp(&b.approximate_size()))
            },
        )
    }
}

// `Iterator::max_by` keeps the last of equal elements; walk backwards so the
// earliest catalog entry wins ties.
fn best_by<'a, I, F>(streams: I, compare: F) -> Option<&'a StreamInfo>
where
    I: DoubleEndedIterator<Item = &'a StreamInfo>,
    F: Fn(&StreamInfo, &StreamInfo) -> Ordering,
{
    streams.rev().max_by(|a, b| compare(a, b))
}

/// External capability that describes videos and fetches stream bytes.
///
/// Both methods block; callers run them on the blocking thread pool. A
/// cancelled token aborts whatever child process is running.
pub trait VideoInfoProvider: Send + Sync {
    fn lookup(
        &self,
        url: &ValidatedUrl,
        cancel: &CancellationToken,
    ) -> Result<StreamCatalog, ProviderError>;

    /// Downloads `stream` of `url` into `dest_dir` and returns the written file.
    fn fetch(
        &self,
        url: &ValidatedUrl,
        stream: &StreamInfo,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ProviderError>;
}
