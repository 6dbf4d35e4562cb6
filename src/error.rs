#![forbid(unsafe_code)]

//! Error taxonomy shared by the resolver, the dispatcher and the adapters.
//!
//! Every failure the workflow can produce ends up as one of the variants below;
//! the backend converts them into HTTP responses in a single place.

use thiserror::Error;

/// The submitted string does not look like a supported video link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InvalidLinkError {
    pub input: String,
    pub message: String,
}

impl InvalidLinkError {
    pub const MESSAGE: &'static str =
        "Invalid YouTube link. Please enter a valid YouTube video URL.";

    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            message: Self::MESSAGE.to_string(),
        }
    }
}

/// Failure reported by a video-info provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected provider output: {0}")]
    Malformed(String),
    #[error("provider produced no file for stream {0}")]
    MissingOutput(String),
    #[error("preparing provider scratch space: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// Failure reported by a transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("transcoder produced no output at {0}")]
    MissingOutput(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// The provider could not describe the video (unreachable, private, deleted,
/// age restricted, network failure...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Error processing video. Please check the link and try again. Error: {message}")]
pub struct ResolutionError {
    pub message: String,
}

impl From<ProviderError> for ResolutionError {
    fn from(err: ProviderError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("stream {stream_id} is not available for this video")]
    NotFound { stream_id: String },
    #[error("Error downloading: {0}")]
    UpstreamFailure(String),
    #[error("Error converting audio: {0}")]
    TranscodeFailure(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("preparing download workspace: {0}")]
    Workspace(#[from] std::io::Error),
}

/// The download request does not say which video it is about.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    InvalidLink(#[from] InvalidLinkError),
    #[error("No video selected. Submit a link first or include its url with the download.")]
    MissingUrl,
}

impl DownloadError {
    pub(crate) fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::UpstreamFailure(other.to_string()),
        }
    }

    pub(crate) fn from_transcoder(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Cancelled => Self::Cancelled,
            other => Self::TranscodeFailure(other.to_string()),
        }
    }
}
