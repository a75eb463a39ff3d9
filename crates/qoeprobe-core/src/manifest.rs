//! HLS playlist parsing
//!
//! Parses master and media playlists with `m3u8-rs` and resolves every URI
//! against the playlist URL. A media playlist used as the entry point is
//! treated as a single variant of unknown width.

use crate::{
    error::Error,
    transport::{RequestKind, Transport, TransportRequest},
    Result,
};
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// One rendition of the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Media playlist URL
    pub uri: Url,
    /// Advertised peak bandwidth (bits/s)
    pub bandwidth: u64,
    /// Pixel width, 0 when not advertised
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub uri: Url,
    pub duration: Duration,
}

/// Segments of one variant
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentList {
    pub segments: Vec<MediaSegment>,
    pub target_duration: Duration,
    /// `EXT-X-ENDLIST` seen
    pub ended: bool,
}

impl SegmentList {
    pub fn total_duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Entry playlist contents
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPlaylist {
    Master(Vec<Variant>),
    Media(SegmentList),
}

/// Parse an entry playlist fetched from `base`
pub fn parse_entry(content: &[u8], base: &Url) -> Result<EntryPlaylist> {
    match m3u8_rs::parse_playlist_res(content) {
        Ok(Playlist::MasterPlaylist(master)) => Ok(EntryPlaylist::Master(extract_variants(&master, base)?)),
        Ok(Playlist::MediaPlaylist(media)) => Ok(EntryPlaylist::Media(extract_segments(&media, base)?)),
        Err(e) => Err(Error::ManifestParse(format!("Failed to parse HLS playlist: {:?}", e))),
    }
}

/// Parse a media playlist fetched from `base`
pub fn parse_media(content: &[u8], base: &Url) -> Result<SegmentList> {
    let media = m3u8_rs::parse_media_playlist_res(content)
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS media: {:?}", e)))?;
    extract_segments(&media, base)
}

/// Playable variants, ascending by bandwidth. I-frame streams are skipped.
fn extract_variants(master: &MasterPlaylist, base: &Url) -> Result<Vec<Variant>> {
    let mut variants = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| {
            let (width, height) = v
                .resolution
                .map(|r| (clamp_dimension(r.width), clamp_dimension(r.height)))
                .unwrap_or((0, 0));
            Ok(Variant {
                uri: resolve_uri(base, &v.uri)?,
                bandwidth: v.bandwidth,
                width,
                height,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if variants.is_empty() {
        return Err(Error::InvalidManifest("master playlist has no variants".into()));
    }

    variants.sort_by_key(|v| v.bandwidth);
    Ok(variants)
}

fn extract_segments(media: &MediaPlaylist, base: &Url) -> Result<SegmentList> {
    let segments = media
        .segments
        .iter()
        .map(|s| {
            Ok(MediaSegment {
                uri: resolve_uri(base, &s.uri)?,
                duration: seconds(s.duration.max(0.0) as f64, "EXTINF")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SegmentList {
        segments,
        target_duration: seconds(media.target_duration as f64, "EXT-X-TARGETDURATION")?,
        ended: media.end_list,
    })
}

/// Playlist durations are server controlled and may not fit a `Duration`
fn seconds(value: f64, tag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::InvalidManifest(format!("{} value {}: {}", tag, value, e)))
}

fn clamp_dimension(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn resolve_uri(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative)
        .map_err(|e| Error::InvalidManifest(format!("Invalid URI '{}': {}", relative, e)))
}

async fn fetch(transport: &impl Transport, url: &Url, kind: RequestKind) -> Result<Vec<u8>> {
    let response = transport
        .send(TransportRequest::new(url.clone(), kind))
        .await
        .map_err(|e| Error::ManifestFetch(format!("{}: {}", url, e)))?
        .error_for_status()
        .map_err(|e| Error::ManifestFetch(e.to_string()))?;
    Ok(response.body.to_vec())
}

/// Fetch the entry playlist and list its variants.
///
/// Returns the segment list too when the entry is a media playlist.
#[instrument(skip(transport))]
pub async fn load_variants(
    transport: &impl Transport,
    url: &Url,
) -> Result<(Vec<Variant>, Option<SegmentList>)> {
    let body = fetch(transport, url, RequestKind::Manifest).await?;
    match parse_entry(&body, url)? {
        EntryPlaylist::Master(variants) => {
            debug!(variants = variants.len(), "Master playlist loaded");
            Ok((variants, None))
        }
        EntryPlaylist::Media(segments) => {
            debug!(segments = segments.segments.len(), "Media playlist used as entry");
            let variant = Variant {
                uri: url.clone(),
                bandwidth: 0,
                width: 0,
                height: 0,
            };
            Ok((vec![variant], Some(segments)))
        }
    }
}

/// Fetch and parse one variant's media playlist
pub async fn load_segments(transport: &impl Transport, variant: &Variant) -> Result<SegmentList> {
    let body = fetch(transport, &variant.uri, RequestKind::Playlist).await?;
    parse_media(&body, &variant.uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=320x180
180p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=640x360
https://other.example.com/360p/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:4.0,
seg0.ts
#EXTINF:4.0,
seg1.ts
#EXTINF:2.5,
seg2.ts
#EXT-X-ENDLIST
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/vod/master.m3u8").unwrap()
    }

    #[test]
    fn test_master_variants_sorted_and_resolved() {
        let EntryPlaylist::Master(variants) = parse_entry(MASTER.as_bytes(), &base()).unwrap() else {
            panic!("expected master playlist");
        };

        let widths: Vec<u32> = variants.iter().map(|v| v.width).collect();
        assert_eq!(widths, vec![320, 640, 1280]);
        assert_eq!(variants[0].uri.as_str(), "https://cdn.example.com/vod/180p/index.m3u8");
        assert_eq!(variants[1].uri.as_str(), "https://other.example.com/360p/index.m3u8");
        assert_eq!(variants[2].bandwidth, 2_400_000);
    }

    #[test]
    fn test_media_playlist() {
        let list = parse_media(MEDIA.as_bytes(), &base()).unwrap();
        assert_eq!(list.segments.len(), 3);
        assert!(list.ended);
        assert_eq!(list.target_duration, Duration::from_secs(4));
        assert_eq!(list.total_duration(), Duration::from_secs_f64(10.5));
        assert_eq!(list.segments[2].uri.as_str(), "https://cdn.example.com/vod/seg2.ts");
    }

    #[test]
    fn test_media_as_entry() {
        assert!(matches!(
            parse_entry(MEDIA.as_bytes(), &base()).unwrap(),
            EntryPlaylist::Media(_)
        ));
    }

    #[test]
    fn test_oversized_segment_duration_rejected() {
        let media = MEDIA.replace("#EXTINF:2.5,", "#EXTINF:1000000000000000000000000000000,");
        let err = parse_media(media.as_bytes(), &base()).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MANIFEST");
    }

    #[test]
    fn test_oversized_resolution_clamped() {
        let master = MASTER.replace("RESOLUTION=1280x720", "RESOLUTION=8589934592x720");
        let EntryPlaylist::Master(variants) = parse_entry(master.as_bytes(), &base()).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(variants[2].width, u32::MAX);
        assert_eq!(variants[2].height, 720);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = parse_entry(b"<html>not a playlist</html>", &base()).unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_PARSE");
    }
}
