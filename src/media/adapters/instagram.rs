//! Instagram backend adapter.
//!
//! Recognizes post and reel URLs by shortcode. The public graphql
//! endpoint is tried first; when Instagram answers with a failure
//! status and a Lamadava SaaS token is configured, the lookup falls
//! back to that service.

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use super::{get_json, MediaAdapter};
use crate::config::Settings;
use crate::media::cache::MediaCache;
use crate::media::model::{MediaDescriptor, MediaMeta, SourceKind, Video};
use crate::media::registry::Resolution;
use crate::media::MediaError;

// https://www.instagram.com/p/CTQZ5Y8J8ZU/
// https://www.instagram.com/reel/CTQZ5Y8J8ZU/
// https://instagram.com/reel/CqQGB-1ISIw/
static POST_RE: Lazy<Regex> =
    lazy_regex!(r"(?:https?://)?(?:www\.)?instagram\.com/(?P<type>\w+)/(?P<id>[\w-]+)");

const GRAPHQL_API: &str = "https://www.instagram.com/graphql/query/";
const GRAPHQL_QUERY_HASH: &str = "477b65a610463740ccdb83135b2014db";
const SAAS_API: &str = "https://api.lamadava.com/v1/media/by/code";

const IG_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36";

/// Instagram adapter with an optional SaaS fallback backend.
pub struct InstagramAdapter {
    saas_token: Option<String>,
}

impl InstagramAdapter {
    /// Always supported; the SaaS fallback activates with its token.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        Some(Self {
            saas_token: settings.lamadava_saas_token.clone(),
        })
    }

    async fn fetch_graphql(client: &Client, shortcode: &str) -> Result<Value, MediaError> {
        let variables = json!({
            "shortcode": shortcode,
            "child_comment_count": 3,
            "fetch_comment_count": 40,
            "parent_comment_count": 24,
            "has_threaded_comments": false,
        })
        .to_string();

        get_json(
            client,
            GRAPHQL_API,
            &[
                ("query_hash", GRAPHQL_QUERY_HASH),
                ("variables", variables.as_str()),
            ],
            &[("User-Agent", IG_USER_AGENT)],
        )
        .await
    }

    fn descriptor_from_graphql(data: &Value, original_url: &str) -> Vec<MediaDescriptor> {
        let media = data
            .get("data")
            .and_then(|d| d.get("shortcode_media"))
            .cloned()
            .unwrap_or_default();

        if !media
            .get("is_video")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            info!("{} is not a video", original_url);
            return Vec::new();
        }
        let Some(url) = media.get("video_url").and_then(Value::as_str) else {
            return Vec::new();
        };

        // Caption lives either in the title or in the caption edges
        let mut caption = media
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        if caption.as_deref().unwrap_or("").is_empty() {
            let joined = media
                .get("edge_media_to_caption")
                .and_then(|e| e.get("edges"))
                .and_then(Value::as_array)
                .map(|edges| {
                    edges
                        .iter()
                        .filter_map(|e| {
                            e.get("node")
                                .and_then(|n| n.get("text"))
                                .and_then(Value::as_str)
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default()
                .trim()
                .to_string();
            caption = (!joined.is_empty()).then_some(joined);
        }

        let meta = MediaMeta::new(SourceKind::Instagram, original_url.to_string())
            .with_caption(caption)
            .with_author(
                media
                    .get("owner")
                    .and_then(|o| o.get("username"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_thumbnail(
                media
                    .get("display_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            );

        let mut video = Video::new(meta, url.to_string());
        video.width = media
            .get("dimensions")
            .and_then(|d| d.get("width"))
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        video.height = media
            .get("dimensions")
            .and_then(|d| d.get("height"))
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        video.duration_secs = media
            .get("video_duration")
            .and_then(Value::as_f64)
            .map(|v| v as u32)
            .filter(|v| *v > 0);
        vec![MediaDescriptor::Video(video)]
    }

    /// Fallback lookup through the Lamadava SaaS API.
    async fn resolve_from_saas(
        &self,
        client: &Client,
        shortcode: &str,
        original_url: &str,
    ) -> Vec<MediaDescriptor> {
        let Some(token) = &self.saas_token else {
            return Vec::new();
        };
        info!("Using SaaS fallback for {}", original_url);

        let data = match get_json(
            client,
            SAAS_API,
            &[("code", shortcode)],
            &[("x-access-key", token.as_str())],
        )
        .await
        {
            Ok(d) => d,
            Err(e) => {
                info!("SaaS fallback failed for {}: {}", original_url, e);
                return Vec::new();
            }
        };

        let Some(url) = data.get("video_url").and_then(Value::as_str) else {
            info!("{} is not a video", original_url);
            return Vec::new();
        };

        let caption = data
            .get("title")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| data.get("caption_text").and_then(Value::as_str))
            .map(str::to_string);

        let meta = MediaMeta::new(SourceKind::Instagram, original_url.to_string())
            .with_caption(caption)
            .with_author(
                data.get("user")
                    .and_then(|u| u.get("username"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_thumbnail(
                data.get("thumbnail_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            );

        let version = data
            .get("video_versions")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or_default();
        let mut video = Video::new(meta, url.to_string());
        video.width = version
            .get("width")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        video.height = version
            .get("height")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        video.duration_secs = data
            .get("video_duration")
            .and_then(Value::as_f64)
            .map(|v| v as u32)
            .filter(|v| *v > 0);
        vec![MediaDescriptor::Video(video)]
    }
}

#[async_trait]
impl MediaAdapter for InstagramAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Instagram
    }

    fn patterns(&self) -> Vec<&'static Regex> {
        vec![&*POST_RE]
    }

    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError> {
        let post_type = super::required_group(caps, "type")?;
        let shortcode = super::required_group(caps, "id")?;
        let original_url = format!("https://www.instagram.com/{post_type}/{shortcode}");

        if let Some(hit) = cache.find(&original_url).await {
            return Ok(Resolution::CacheHit(hit));
        }

        info!("Resolving Instagram post {}", original_url);
        let descriptors = match Self::fetch_graphql(client, shortcode).await {
            Ok(data) if data.get("status").and_then(Value::as_str) == Some("fail") => {
                self.resolve_from_saas(client, shortcode, &original_url).await
            }
            Ok(data) => Self::descriptor_from_graphql(&data, &original_url),
            Err(e) => {
                info!("Graphql lookup failed for {}: {}", original_url, e);
                self.resolve_from_saas(client, shortcode, &original_url).await
            }
        };

        Ok(Resolution::Fresh(cache.save_group(descriptors).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_pattern_captures() {
        for url in [
            "https://www.instagram.com/p/CTQZ5Y8J8ZU/",
            "https://instagram.com/reel/CTQZ5Y8J8ZU/",
        ] {
            let caps = POST_RE.captures(url).expect("match");
            assert_eq!(&caps["id"], "CTQZ5Y8J8ZU");
        }
    }

    #[test]
    fn test_graphql_video_post() {
        let data = json!({
            "data": {
                "shortcode_media": {
                    "is_video": true,
                    "video_url": "https://cdn/v.mp4",
                    "display_url": "https://cdn/cover.jpg",
                    "owner": {"username": "someone"},
                    "dimensions": {"width": 720, "height": 1280},
                    "video_duration": 12.6,
                    "edge_media_to_caption": {
                        "edges": [{"node": {"text": "a caption"}}]
                    }
                }
            }
        });
        let out = InstagramAdapter::descriptor_from_graphql(&data, "https://www.instagram.com/p/x");
        assert_eq!(out.len(), 1);
        let MediaDescriptor::Video(video) = &out[0] else {
            panic!("expected a video");
        };
        assert_eq!(video.url, "https://cdn/v.mp4");
        assert_eq!(video.meta.caption.as_deref(), Some("a caption"));
        assert_eq!(video.width, Some(720));
        assert_eq!(video.duration_secs, Some(12));
    }

    #[test]
    fn test_graphql_non_video_is_unresolvable() {
        let data = json!({
            "data": {"shortcode_media": {"is_video": false}}
        });
        assert!(
            InstagramAdapter::descriptor_from_graphql(&data, "https://www.instagram.com/p/x")
                .is_empty()
        );
    }
}
