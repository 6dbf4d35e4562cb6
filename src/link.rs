#![forbid(unsafe_code)]

//! Link validation. Nothing in here touches the network.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::InvalidLinkError;

/// Path/host fragments that identify a single YouTube video.
pub const ACCEPTED_MARKERS: &[&str] = &["youtube.com/watch", "youtu.be/", "youtube.com/shorts/"];

/// A link that passed [`validate`]. The only way to build one is through the
/// validator, so holding a `ValidatedUrl` means the check already happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ValidatedUrl(String);

impl ValidatedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ValidatedUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        validate(&raw).map_err(serde::de::Error::custom)
    }
}

/// Checks `url` against the accepted link shapes.
pub fn validate(url: &str) -> Result<ValidatedUrl, InvalidLinkError> {
    let trimmed = url.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('-')
        || trimmed.chars().any(char::is_whitespace)
    {
        return Err(InvalidLinkError::new(url));
    }
    let lowered = trimmed.to_ascii_lowercase();
    if ACCEPTED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        Ok(ValidatedUrl(trimmed.to_string()))
    } else {
        Err(InvalidLinkError::new(url))
    }
}
