#![forbid(unsafe_code)]

//! Core of the tubegrab download service: validate a video link, resolve the
//! renditions it offers, and deliver one of them as a video or MP3 file.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod link;
mod process;
pub mod provider;
pub mod render;
pub mod resolver;
pub mod security;
pub mod session;
pub mod transcode;
pub mod ytdlp;

pub use dispatcher::{DownloadRequest, Dispatcher, PreparedDownload};
pub use error::{DownloadError, InvalidLinkError, ResolutionError, TargetError};
pub use link::{ValidatedUrl, validate};
pub use resolver::{RenditionDescriptor, Resolver, VideoMetadata};
pub use session::SessionStore;
