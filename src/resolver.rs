#![forbid(unsafe_code)]

//! Turns a validated link into the list of renditions a user can pick from.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ResolutionError};
use crate::link::ValidatedUrl;
use crate::provider::{StreamCatalog, StreamInfo, VideoInfoProvider};

/// Quality rungs offered to users, in display order. A `60` suffix selects
/// high frame rate streams of that height.
pub const QUALITY_LADDER: &[&str] = &[
    "144p", "240p", "360p", "480p", "540p", "720p", "720p60", "920p", "1080p", "1080p60",
];
/// Container required for every video rung.
pub const VIDEO_CONTAINER: &str = "mp4";
pub const AUDIO_LABEL: &str = "Audio (320kbps MP3)";

const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionDescriptor {
    pub quality_label: String,
    pub container: String,
    pub size_bytes: u64,
    /// `size_bytes` in MiB, rounded to two decimals.
    pub size_mb: f64,
    pub stream_id: String,
    pub is_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail_url: String,
    /// Video ladder first, then at most one audio entry.
    pub renditions: Vec<RenditionDescriptor>,
}

impl VideoMetadata {
    pub fn rendition(&self, stream_id: &str) -> Option<&RenditionDescriptor> {
        self.renditions
            .iter()
            .find(|rendition| rendition.stream_id == stream_id)
    }
}

/// Parses a ladder label such as `720p60` into `(720, true)`.
pub fn parse_quality_label(label: &str) -> Option<(u32, bool)> {
    let (height, rest) = label.split_once('p')?;
    let high_frame_rate = match rest {
        "" => false,
        "60" => true,
        _ => return None,
    };
    Some((height.parse().ok()?, high_frame_rate))
}

pub fn size_in_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct Resolver<P> {
    provider: P,
}

impl<P: VideoInfoProvider> Resolver<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Looks the link up once and builds the rendition list.
    pub fn resolve(
        &self,
        url: &ValidatedUrl,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata, ResolutionError> {
        self.resolve_with_catalog(url, cancel)
            .map(|(metadata, _)| metadata)
            .map_err(ResolutionError::from)
    }

    /// Same as [`Resolver::resolve`] but also hands back the raw catalog so
    /// the caller can fetch one of the offered streams. Provider errors come
    /// back untranslated so cancellation stays distinguishable.
    pub fn resolve_with_catalog(
        &self,
        url: &ValidatedUrl,
        cancel: &CancellationToken,
    ) -> Result<(VideoMetadata, StreamCatalog), ProviderError> {
        let catalog = self.provider.lookup(url, cancel).inspect_err(|err| {
            tracing::warn!(%url, error = %err, "video lookup failed");
        })?;
        let metadata = build_metadata(&catalog);
        tracing::info!(
            %url,
            title = %metadata.title,
            renditions = metadata.renditions.len(),
            "resolved video"
        );
        Ok((metadata, catalog))
    }
}

pub fn build_metadata(catalog: &StreamCatalog) -> VideoMetadata {
    let mut renditions: Vec<RenditionDescriptor> = QUALITY_LADDER
        .iter()
        .filter_map(|label| {
            let (height, high_frame_rate) = parse_quality_label(label)?;
            let stream = catalog.best_video(height, high_frame_rate, VIDEO_CONTAINER)?;
            Some(descriptor(label, stream, false))
        })
        .collect();

    let audio = catalog.best_audio().or_else(|| {
        let fallback = catalog.best_muxed();
        if let Some(stream) = fallback {
            tracing::info!(
                stream = %stream.id,
                "no audio-only stream; audio downloads will fetch the muxed video"
            );
        }
        fallback
    });
    if let Some(stream) = audio {
        renditions.push(descriptor(AUDIO_LABEL, stream, true));
    }

    VideoMetadata {
        title: catalog.title.clone(),
        thumbnail_url: catalog.thumbnail_url.clone(),
        renditions,
    }
}

fn descriptor(label: &str, stream: &StreamInfo, is_audio: bool) -> RenditionDescriptor {
    let size_bytes = stream.approximate_size();
    RenditionDescriptor {
        quality_label: label.to_string(),
        container: stream
            .ext
            .clone()
            .unwrap_or_else(|| VIDEO_CONTAINER.to_string()),
        size_bytes,
        size_mb: size_in_mb(size_bytes),
        stream_id: stream.id.clone(),
        is_audio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::validate;
    use crate::provider::stub::{StubProvider, audio, catalog, video};
    use std::collections::HashSet;

    const DEMO_URL: &str = "https://www.youtube.com/watch?v=abc123";

    fn resolver_for(streams: Vec<StreamInfo>) -> Resolver<StubProvider> {
        Resolver::new(StubProvider::with(DEMO_URL, catalog(streams)))
    }

    fn resolve_demo(resolver: &Resolver<StubProvider>) -> VideoMetadata {
        resolver
            .resolve(&validate(DEMO_URL).unwrap(), &CancellationToken::new())
            .unwrap()
    }

    fn labels(metadata: &VideoMetadata) -> Vec<&str> {
        metadata
            .renditions
            .iter()
            .map(|rendition| rendition.quality_label.as_str())
            .collect()
    }

    #[test]
    fn demo_video_resolves_two_rungs_and_audio() {
        let resolver = resolver_for(vec![
            audio("140", 128.0, "m4a", 5 * 1_048_576),
            video("135", 480, 25.0, "mp4", false, 4_823_449),
            video("160", 144, 25.0, "mp4", false, 1_310_720),
        ]);
        let url = validate(DEMO_URL).unwrap();

        let metadata = resolver.resolve(&url, &CancellationToken::new()).unwrap();
        assert_eq!(metadata.title, "Demo");
        assert_eq!(metadata.thumbnail_url, "http://x/thumb.jpg");
        assert_eq!(labels(&metadata), vec!["144p", "480p", AUDIO_LABEL]);

        let audio = metadata.renditions.last().unwrap();
        assert!(audio.is_audio);
        assert_eq!(audio.stream_id, "140");
        assert_eq!(audio.size_mb, 5.0);
        assert!(metadata.renditions[..2].iter().all(|r| !r.is_audio));
        assert_eq!(resolver.provider().lookup_count(), 1);
    }

    #[test]
    fn ladder_is_ordered_subset_without_duplicates() {
        let resolver = resolver_for(vec![
            video("299", 1080, 60.0, "mp4", false, 9),
            video("137", 1080, 30.0, "mp4", false, 8),
            video("298", 720, 60.0, "mp4", false, 7),
            video("22", 720, 30.0, "mp4", true, 6),
            video("136", 720, 30.0, "mp4", false, 60),
            video("18", 360, 25.0, "mp4", true, 4),
            video("779", 540, 30.0, "mp4", true, 5),
            video("243", 360, 25.0, "webm", false, 3),
            video("394", 144, 25.0, "webm", false, 2),
            video("313", 2160, 30.0, "mp4", false, 1),
        ]);
        let metadata = resolve_demo(&resolver);
        let got = labels(&metadata);
        assert_eq!(
            got,
            vec!["360p", "540p", "720p", "720p60", "1080p", "1080p60", AUDIO_LABEL]
        );

        let mut seen = HashSet::new();
        assert!(got.iter().all(|label| seen.insert(*label)));

        let positions: Vec<usize> = got
            .iter()
            .filter(|label| **label != AUDIO_LABEL)
            .map(|label| QUALITY_LADDER.iter().position(|l| l == label).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        // the muxed 720p stream wins over the larger video-only one
        assert_eq!(metadata.rendition("22").unwrap().quality_label, "720p");
        assert_eq!(metadata.rendition("779").unwrap().quality_label, "540p");
        assert!(metadata.rendition("136").is_none());
    }

    #[test]
    fn lone_540p_stream_gets_its_rung() {
        let resolver = resolver_for(vec![video("779", 540, 30.0, "mp4", true, 5)]);
        let metadata = resolve_demo(&resolver);
        assert_eq!(labels(&metadata), vec!["540p", AUDIO_LABEL]);
    }

    #[test]
    fn cancelled_resolve_skips_lookup() {
        let resolver = resolver_for(vec![audio("140", 128.0, "m4a", 10)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver
            .resolve_with_catalog(&validate(DEMO_URL).unwrap(), &cancel)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(resolver.provider().lookup_count(), 0);
    }

    #[test]
    fn audio_falls_back_to_muxed_stream() {
        let resolver = resolver_for(vec![
            video("18", 360, 25.0, "mp4", true, 2_000_000),
            video("160", 144, 25.0, "mp4", false, 500_000),
        ]);
        let metadata = resolve_demo(&resolver);
        let audio: Vec<_> = metadata.renditions.iter().filter(|r| r.is_audio).collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].stream_id, "18");
        assert_eq!(metadata.renditions.last().unwrap().stream_id, "18");
    }

    #[test]
    fn no_usable_streams_yields_empty_list() {
        let resolver = resolver_for(vec![video("160", 144, 25.0, "webm", false, 1)]);
        let metadata = resolve_demo(&resolver);
        assert!(metadata.renditions.is_empty());
    }

    #[test]
    fn provider_failure_becomes_resolution_error() {
        let resolver = Resolver::new(StubProvider::default());
        let err = resolver
            .resolve(
                &validate("https://youtu.be/missing").unwrap(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.message.contains("Video unavailable"));
    }

    #[test]
    fn rejected_link_never_reaches_provider() {
        let resolver = resolver_for(vec![audio("140", 128.0, "m4a", 10)]);
        let attempt =
            validate("not a url").map(|url| resolver.resolve(&url, &CancellationToken::new()));
        assert!(attempt.is_err());
        assert_eq!(resolver.provider().lookup_count(), 0);
    }

    #[test]
    fn sizes_round_to_two_decimals() {
        assert_eq!(size_in_mb(0), 0.0);
        assert_eq!(size_in_mb(1_048_576), 1.0);
        assert_eq!(size_in_mb(1_572_864), 1.5);
        for bytes in [1u64, 12_345, 4_823_449, 987_654_321] {
            let expected = (bytes as f64 / 1_048_576.0 * 100.0).round() / 100.0;
            assert_eq!(size_in_mb(bytes), expected);
            assert!(size_in_mb(bytes) >= 0.0);
        }
        assert_eq!(size_in_mb(4_823_449), 4.6);
    }

    #[test]
    fn negative_sizes_report_zero() {
        let resolver = resolver_for(vec![audio("140", 128.0, "m4a", -1)]);
        let metadata = resolve_demo(&resolver);
        assert_eq!(metadata.renditions[0].size_bytes, 0);
        assert_eq!(metadata.renditions[0].size_mb, 0.0);
    }

    #[test]
    fn parse_quality_label_handles_ladder() {
        assert_eq!(parse_quality_label("144p"), Some((144, false)));
        assert_eq!(parse_quality_label("1080p60"), Some((1080, true)));
        assert_eq!(parse_quality_label("1080p30"), None);
        assert_eq!(parse_quality_label("audio"), None);
        for label in QUALITY_LADDER {
            assert!(parse_quality_label(label).is_some());
        }
    }
}
