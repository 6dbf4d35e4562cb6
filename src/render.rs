#![forbid(unsafe_code)]

//! Server-rendered HTML for browser clients. One page, three states: empty
//! form, error banner, and the list of download options.

use std::fmt::Write as _;

use crate::resolver::VideoMetadata;

/// Static facts printed in the footer.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub version: String,
    pub environment: String,
    pub hostname: String,
}

impl ServerInfo {
    pub fn detect(environment: impl Into<String>) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.into(),
            hostname,
        }
    }
}

#[derive(Debug, Default)]
pub struct PageContext<'a> {
    /// Link the options were resolved from; echoed into the download forms.
    pub link: Option<&'a str>,
    pub error: Option<&'a str>,
    pub video: Option<&'a VideoMetadata>,
}

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px; background-color: #f4f4f4; }
        h1 { color: #e74c3c; }
        form { background-color: #fff; padding: 20px; border-radius: 5px; box-shadow: 0 2px 5px rgba(0, 0, 0, 0.1); }
        input[type="text"] { width: 100%; padding: 10px; margin-bottom: 10px; border: 1px solid #ddd; border-radius: 3px; }
        input[type="submit"] { background-color: #e74c3c; color: #fff; border: none; padding: 10px 20px; cursor: pointer; border-radius: 3px; }
        input[type="submit"]:hover { background-color: #c0392b; }
        .error { color: #e74c3c; font-weight: bold; }
        .video-info { background-color: #fff; padding: 20px; border-radius: 5px; box-shadow: 0 2px 5px rgba(0, 0, 0, 0.1); margin-top: 20px; }
        .video-info img { max-width: 100%; height: auto; margin-bottom: 10px; }
        .download-options { list-style-type: none; padding: 0; }
        .download-options li { margin-bottom: 10px; }
        .download-options form { padding: 0; box-shadow: none; }
        .download-button { background-color: #3498db; color: #fff; border: none; padding: 5px 10px; cursor: pointer; border-radius: 3px; }
        .download-button:hover { background-color: #2980b9; }
        .footer { margin-top: 20px; text-align: center; font-size: 0.9em; color: #777; }
"#;

pub fn page(info: &ServerInfo, ctx: &PageContext<'_>) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>YouTube Downloader</title>\n    <style>");
    html.push_str(STYLE);
    html.push_str("    </style>\n</head>\n<body>\n    <h1>YouTube Downloader</h1>\n");
    html.push_str(
        "    <form method=\"post\" action=\"/\">\n        \
         <input type=\"text\" name=\"youtube_link\" placeholder=\"Enter YouTube video URL\" required>\n        \
         <input type=\"submit\" value=\"Get Download Options\">\n    </form>\n",
    );

    if let Some(error) = ctx.error {
        let _ = writeln!(html, "    <p class=\"error\">{}</p>", escape(error));
    }

    if let Some(video) = ctx.video {
        write_video(&mut html, video, ctx.link.unwrap_or_default());
    }

    let _ = write!(
        html,
        "    <div class=\"footer\">\n        <p>tubegrab {}</p>\n        \
         <p>Environment: {}</p>\n        <p>Hostname: {}</p>\n    </div>\n",
        escape(&info.version),
        escape(&info.environment),
        escape(&info.hostname),
    );
    html.push_str("</body>\n</html>\n");
    html
}

fn write_video(html: &mut String, video: &VideoMetadata, link: &str) {
    let _ = write!(
        html,
        "    <div class=\"video-info\">\n        <h2>{}</h2>\n        \
         <img src=\"{}\" alt=\"Video Thumbnail\">\n        <h3>Download Options:</h3>\n",
        escape(&video.title),
        escape(&video.thumbnail_url),
    );
    if video.renditions.is_empty() {
        html.push_str("        <p>No downloadable streams were found for this video.</p>\n");
    } else {
        html.push_str("        <ul class=\"download-options\">\n");
        for rendition in &video.renditions {
            let _ = write!(
                html,
                "            <li>\n                <form action=\"/download\" method=\"post\">\n                    \
                 <input type=\"hidden\" name=\"link\" value=\"{link}\">\n                    \
                 <input type=\"hidden\" name=\"itag\" value=\"{itag}\">\n                    \
                 <input type=\"hidden\" name=\"is_audio\" value=\"{is_audio}\">\n                    \
                 <button type=\"submit\" class=\"download-button\">Download {label} ({size} MB)</button>\n                \
                 </form>\n            </li>\n",
                link = escape(link),
                itag = escape(&rendition.stream_id),
                is_audio = rendition.is_audio,
                label = escape(&rendition.quality_label),
                size = rendition.size_mb,
            );
        }
        html.push_str("        </ul>\n");
    }
    html.push_str("    </div>\n");
}

/// Minimal HTML escaping for text nodes and double-quoted attributes.
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}
