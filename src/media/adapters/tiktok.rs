//! TikTok backend adapter.
//!
//! Recognizes short-link (`vm.`/`vt.`) and canonical (`@author/video/id`)
//! URLs. Short links are probed through their redirect to recover the
//! numeric video id, then the mobile feed API supplies stream variants,
//! caption, cover and region.

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{get_json, MediaAdapter};
use crate::config::{Settings, TG_FILE_LIMIT};
use crate::media::cache::MediaCache;
use crate::media::model::{ImageSet, MediaDescriptor, MediaMeta, SourceKind, Video};
use crate::media::registry::Resolution;
use crate::media::MediaError;
use crate::utils::retry_scrape_operation;

// https://vt.tiktok.com/ZSRq1jcrg/
// https://vm.tiktok.com/ZSRq1jcrg/
static SHORT_RE: Lazy<Regex> =
    lazy_regex!(r"(?:https?://)?(?:(?P<domain>[a-z]{2})\.)?tiktok\.com/(?P<id>\w+)/?");

// https://www.tiktok.com/@thejoyegg/video/7136001098841591041
static VIDEO_RE: Lazy<Regex> = lazy_regex!(
    r"(?:https?://)?(?:www\.)?tiktok\.com/@(?P<author>[\w.]+)/video/(?P<video_id>\d+)/?"
);

const FEED_API: &str = "https://api16-normal-c-useast1a.tiktokv.com/aweme/v1/feed/";

const TT_USER_AGENT: &str = "com.ss.android.ugc.trill/494+Mozilla/5.0+\
(Linux;+Android+12;+2112123G+Build/SKQ1.211006.001;+wv)+\
AppleWebKit/537.36+(KHTML,+like+Gecko)+Version/4.0+\
Chrome/107.0.5304.105+Mobile+Safari/537.36";

/// Feed item type codes that describe a plain video.
const VIDEO_TYPE_CODES: &[u64] = &[0, 51, 55, 58, 61];
/// Feed item type code for an image post.
const IMAGE_TYPE_CODE: u64 = 150;

/// TikTok adapter; needs no credentials.
pub struct TikTokAdapter;

impl TikTokAdapter {
    /// Always supported.
    #[must_use]
    pub fn from_settings(_settings: &Settings) -> Option<Self> {
        Some(Self)
    }

    /// Follow a short link and pull the numeric video id from the final
    /// URL path.
    async fn probe_video_id(client: &Client, short_url: &str) -> Option<u64> {
        let response = match client.get(short_url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Short-link probe failed for {}: {}", short_url, e);
                return None;
            }
        };
        let last = response.url().path().rsplit('/').find(|s| !s.is_empty())?;
        last.parse().ok()
    }

    /// Fetch a feed item, retrying transient failures.
    async fn fetch_feed_item(client: &Client, video_id: u64) -> Option<Value> {
        let id = video_id.to_string();
        let data = retry_scrape_operation(|| async {
            get_json(
                client,
                FEED_API,
                &[("aweme_id", id.as_str())],
                &[("Accept", "application/json"), ("User-Agent", TT_USER_AGENT)],
            )
            .await
            .map_err(anyhow::Error::from)
        })
        .await
        .ok()?;

        match data.get("aweme_list").and_then(Value::as_array) {
            Some(list) if !list.is_empty() => Some(list[0].clone()),
            _ => {
                info!("No aweme_list in feed response for {}", video_id);
                None
            }
        }
    }

    fn process_video(item: &Value, original_url: &str) -> Vec<MediaDescriptor> {
        // Largest variant still under the upload limit
        let variants = item
            .get("video")
            .and_then(|v| v.get("bit_rate"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let url = variants
            .iter()
            .filter(|v| data_size(v) <= TG_FILE_LIMIT)
            .max_by_key(|v| data_size(v))
            .and_then(|v| play_url(v))
            .map(str::to_string);

        let Some(url) = url else {
            info!("No stream under the size limit for {}", original_url);
            return Vec::new();
        };

        // The first bit-rate entry is the full-quality stream
        let max_quality_url = variants
            .first()
            .and_then(|v| play_url(v))
            .map(str::to_string);

        let thumbnail_url = item
            .get("video")
            .and_then(|v| v.get("origin_cover"))
            .and_then(|c| c.get("url_list"))
            .and_then(Value::as_array)
            .and_then(|l| l.first())
            .and_then(Value::as_str)
            .map(str::to_string);

        let meta = MediaMeta::new(SourceKind::TikTok, original_url.to_string())
            .with_caption(str_field(item, "desc"))
            .with_author(
                item.get("author")
                    .and_then(|a| a.get("nickname"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_thumbnail(thumbnail_url)
            .with_language(item.get("region").and_then(Value::as_str));

        let mut video = Video::new(meta, url);
        video.max_quality_url = max_quality_url;
        vec![MediaDescriptor::Video(video)]
    }

    fn process_images(item: &Value, original_url: &str) -> Vec<MediaDescriptor> {
        let images: Vec<String> = item
            .get("image_post_info")
            .and_then(|i| i.get("images"))
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|img| {
                        img.get("display_image")
                            .and_then(|d| d.get("url_list"))
                            .and_then(Value::as_array)
                            .and_then(|l| l.first())
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if images.is_empty() {
            info!("Image post without images for {}", original_url);
            return Vec::new();
        }

        let meta = MediaMeta::new(SourceKind::TikTok, original_url.to_string())
            .with_caption(str_field(item, "desc"))
            .with_author(
                item.get("author")
                    .and_then(|a| a.get("nickname"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_language(item.get("region").and_then(Value::as_str));

        vec![MediaDescriptor::ImageSet(ImageSet {
            meta,
            images,
            audio_url: None,
        })]
    }
}

fn data_size(variant: &Value) -> u64 {
    variant
        .get("play_addr")
        .and_then(|p| p.get("data_size"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn play_url(variant: &Value) -> Option<&str> {
    variant
        .get("play_addr")
        .and_then(|p| p.get("url_list"))
        .and_then(Value::as_array)
        .and_then(|l| l.first())
        .and_then(Value::as_str)
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl MediaAdapter for TikTokAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::TikTok
    }

    fn patterns(&self) -> Vec<&'static Regex> {
        vec![&*SHORT_RE, &*VIDEO_RE]
    }

    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError> {
        let mut expected_author: Option<String> = None;

        let (original_url, video_id) = if let Some(id) = caps.name("id") {
            let domain = caps.name("domain").map_or("vt", |m| m.as_str());
            let original_url = format!("https://{domain}.tiktok.com/{}", id.as_str());

            if let Some(hit) = cache.find(&original_url).await {
                return Ok(Resolution::CacheHit(hit));
            }

            debug!("Probing short link {}", original_url);
            let Some(video_id) = Self::probe_video_id(client, &original_url).await else {
                return Ok(Resolution::Fresh(Vec::new()));
            };
            (original_url, video_id)
        } else {
            let author = super::required_group(caps, "author")?.to_ascii_lowercase();
            let video_id: u64 = super::required_group(caps, "video_id")?
                .parse()
                .map_err(|_| MediaError::Defect("video_id group is not numeric".into()))?;
            let original_url = format!("https://www.tiktok.com/@{author}/video/{video_id}");

            if let Some(hit) = cache.find(&original_url).await {
                return Ok(Resolution::CacheHit(hit));
            }

            expected_author = Some(author);
            (original_url, video_id)
        };

        info!("Resolving TikTok video {} ({})", video_id, original_url);
        let Some(item) = Self::fetch_feed_item(client, video_id).await else {
            return Ok(Resolution::Fresh(Vec::new()));
        };

        if let Some(expected) = expected_author {
            let real = item
                .get("author")
                .and_then(|a| a.get("unique_id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_lowercase();
            if expected != real {
                info!("Author mismatch: {} != {}", expected, real);
                return Ok(Resolution::Fresh(Vec::new()));
            }
        }

        let type_code = item
            .get("aweme_type")
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX);
        let descriptors = if VIDEO_TYPE_CODES.contains(&type_code) {
            Self::process_video(&item, &original_url)
        } else if type_code == IMAGE_TYPE_CODE {
            Self::process_images(&item, &original_url)
        } else {
            debug!("Unknown aweme_type {} treated as video", type_code);
            Self::process_video(&item, &original_url)
        };

        Ok(Resolution::Fresh(cache.save_group(descriptors).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_pattern_captures() {
        let caps = SHORT_RE
            .captures("check https://vm.tiktok.com/ZSRq1jcrg/ out")
            .expect("match");
        assert_eq!(&caps["domain"], "vm");
        assert_eq!(&caps["id"], "ZSRq1jcrg");
    }

    #[test]
    fn test_video_pattern_captures() {
        let caps = VIDEO_RE
            .captures("https://www.tiktok.com/@thejoyegg/video/7136001098841591041")
            .expect("match");
        assert_eq!(&caps["author"], "thejoyegg");
        assert_eq!(&caps["video_id"], "7136001098841591041");
    }

    #[test]
    fn test_short_pattern_ignores_canonical_urls() {
        assert!(SHORT_RE
            .captures("https://www.tiktok.com/@thejoyegg/video/7136001098841591041")
            .is_none());
    }

    #[test]
    fn test_variant_selection_respects_size_limit() {
        let item = serde_json::json!({
            "video": {
                "bit_rate": [
                    {"play_addr": {"data_size": TG_FILE_LIMIT * 2, "url_list": ["https://cdn/hq.mp4"]}},
                    {"play_addr": {"data_size": 1_000u64, "url_list": ["https://cdn/small.mp4"]}},
                    {"play_addr": {"data_size": 2_000u64, "url_list": ["https://cdn/medium.mp4"]}},
                ],
                "origin_cover": {"url_list": ["https://cdn/cover.jpg"]}
            },
            "desc": "hello",
            "author": {"nickname": "someone"},
            "region": "KR"
        });
        let out = TikTokAdapter::process_video(&item, "https://vt.tiktok.com/x");
        assert_eq!(out.len(), 1);
        let MediaDescriptor::Video(video) = &out[0] else {
            panic!("expected a video");
        };
        assert_eq!(video.url, "https://cdn/medium.mp4");
        assert_eq!(video.max_quality_url.as_deref(), Some("https://cdn/hq.mp4"));
        assert_eq!(video.meta.language(), Some("KR"));
    }

    #[test]
    fn test_no_fitting_variant_means_unresolvable() {
        let item = serde_json::json!({
            "video": {
                "bit_rate": [
                    {"play_addr": {"data_size": TG_FILE_LIMIT * 2, "url_list": ["https://cdn/hq.mp4"]}},
                ]
            }
        });
        assert!(TikTokAdapter::process_video(&item, "https://vt.tiktok.com/x").is_empty());
    }

    #[test]
    fn test_image_post_becomes_image_set() {
        let item = serde_json::json!({
            "image_post_info": {
                "images": [
                    {"display_image": {"url_list": ["https://cdn/1.jpg"]}},
                    {"display_image": {"url_list": ["https://cdn/2.jpg"]}},
                ]
            },
            "desc": "pics",
            "author": {"nickname": "someone"},
            "region": "de"
        });
        let out = TikTokAdapter::process_images(&item, "https://vt.tiktok.com/y");
        assert_eq!(out.len(), 1);
        let MediaDescriptor::ImageSet(set) = &out[0] else {
            panic!("expected an image set");
        };
        assert_eq!(set.images.len(), 2);
        assert_eq!(set.meta.language(), Some("DE"));
    }
}
