#![forbid(unsafe_code)]

//! Safety helpers for the backend: the root-user guard and everything that
//! turns an untrusted video title into a filename or a header value.

use anyhow::{Result, bail};
use nix::unistd::Uid;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Longest filename stem we hand out, in characters.
pub const MAX_FILENAME_CHARS: usize = 150;
pub const FALLBACK_FILENAME: &str = "download";

/// Everything outside RFC 5987 `attr-char` gets percent-encoded.
const ATTR_CHAR_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Fails fast when a binary is started as root. The backend spawns yt-dlp
/// and ffmpeg on attacker-chosen URLs, so it has no business holding root.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Strips path separators, reserved and control characters from a title so
/// it can serve as a filename stem on any common filesystem.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_FILENAME_CHARS).collect();
    let trimmed = truncated.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized title>.<ext>`
pub fn attachment_filename(title: &str, ext: &str) -> String {
    format!("{}.{}", sanitize_filename(title), ext)
}

/// Builds a `Content-Disposition` value with an ASCII fallback plus the
/// RFC 5987 `filename*` form for non-ASCII titles.
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() && c != '%' { c } else { '_' })
        .collect();
    let mut value = format!("attachment; filename=\"{ascii}\"");
    if ascii != filename {
        value.push_str("; filename*=UTF-8''");
        value.extend(utf8_percent_encode(filename, ATTR_CHAR_SET));
    }
    value
}
