//! Catalog of candidate stream sources
//!
//! The same content offered by several CDNs, grouped by content item, so
//! providers can be compared source by source.

use crate::{aggregator::StreamSource, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Provider label for URLs the catalog does not know
pub const UNKNOWN_PROVIDER: &str = "Unknown";

/// One content item and the sources serving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub file: String,
    pub videos: Vec<StreamSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceCatalog {
    groups: Vec<SourceGroup>,
}

impl SourceCatalog {
    pub fn new(groups: Vec<SourceGroup>) -> Self {
        Self { groups }
    }

    /// Load a catalog from a JSON array of groups
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn groups(&self) -> &[SourceGroup] {
        &self.groups
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamSource> {
        self.groups.iter().flat_map(|g| g.videos.iter())
    }

    /// Provider serving `url`, or "Unknown"
    pub fn provider_for(&self, url: &str) -> &str {
        self.iter()
            .find(|s| s.video_url == url)
            .map(|s| s.cdn_provider.as_str())
            .unwrap_or(UNKNOWN_PROVIDER)
    }

    /// Source identity for `url`
    pub fn source_for(&self, url: &str) -> StreamSource {
        StreamSource::new(url, self.provider_for(url))
    }

    /// First catalog entry, the default selection
    pub fn first(&self) -> Option<&StreamSource> {
        self.iter().next()
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        let group = |file: &str, cloudflare: &str, vnetwork: &str, vng: &str, byteplus: &str| {
            SourceGroup {
                file: file.to_string(),
                videos: vec![
                    StreamSource::new(
                        format!("https://customer-xk3d5dkkzdz1mqv1.cloudflarestream.com/{}/manifest/video.m3u8", cloudflare),
                        "Cloudflare",
                    ),
                    StreamSource::new(
                        format!("https://chotot.vncdn.vn/transcode/{}/1/3/639/manifest.m3u8", vnetwork),
                        "VNetwork",
                    ),
                    StreamSource::new(
                        format!("https://hcm04.vstorage.vngcloud.vn/cdn-transcode/sigma-vod/{}/hls/master.m3u8", vng),
                        "VNG",
                    ),
                    StreamSource::new(
                        format!("https://byteplus.chotot.org/{}/master.m3u8", byteplus),
                        "Byteplus",
                    ),
                ],
            }
        };

        Self::new(vec![
            group(
                "File 1",
                "4599f020456342adbacdb4c339c88b52",
                "1047331",
                "7542102f-43c7-48d9-a60c-2b45b96834be",
                "86064025065a4efa85582ff23be2bf2d",
            ),
            group(
                "File 2",
                "641996ac8bda43f59b83b4a16bb27548",
                "1047327",
                "40af6c4d-1906-44ce-be3e-df4be488c33e",
                "55235eb9bba74c059d809e50479cc67a",
            ),
            group(
                "File 3",
                "244402d18fb540f0aeb02d101d7d8b4f",
                "1047330",
                "d1bcf123-c677-49aa-b327-5f24eb087e99",
                "a2b15d08d8b24e85845d3e88f47bf5c9",
            ),
            group(
                "File 4",
                "cc7221c60408489991e584377ce085b7",
                "1047329",
                "436e51cc-05e1-4d41-ba1d-3a2234b1b058",
                "02fe5d53562e49c694ffb8b7a95972c2",
            ),
            group(
                "File 5",
                "95bfd6ac96304d61a757983d7788ae16",
                "1047328",
                "ece0b915-5746-4100-ab3b-73a2b14a594d",
                "7be222dbb0aa486db49510e96e431cae",
            ),
        ])
    }
}
