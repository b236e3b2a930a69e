//! YouTube backend adapter.
//!
//! Recognizes `watch?v=`, `youtu.be` and `shorts` URLs. Streams come
//! from the innertube player endpoint; only progressive MP4 formats are
//! considered so the result is a single directly playable file. The
//! largest stream under the upload limit is delivered and the
//! full-resolution stream is kept as `max_quality_url`.

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{post_json, MediaAdapter};
use crate::config::{Settings, TG_FILE_LIMIT};
use crate::media::cache::MediaCache;
use crate::media::model::{MediaDescriptor, MediaMeta, SourceKind, Video};
use crate::media::registry::Resolution;
use crate::media::MediaError;

// https://www.youtube.com/watch?v=TCrP1SE2DkY
// https://youtu.be/TCrP1SE2DkY
static WATCH_RE: Lazy<Regex> = lazy_regex!(
    r"(?:https?://)?(?:(?:www\.)?youtube\.com/watch\?v=|youtu\.be/)(?P<id>[\w-]+)"
);

// https://youtube.com/shorts/hBOLCcvbGHM
static SHORTS_RE: Lazy<Regex> =
    lazy_regex!(r"(?:https?://)?(?:www\.)?youtube\.com/shorts/(?P<id>[\w-]+)");

const PLAYER_API: &str = "https://www.youtube.com/youtubei/v1/player";

/// YouTube adapter; needs no credentials.
pub struct YouTubeAdapter;

impl YouTubeAdapter {
    /// Always supported.
    #[must_use]
    pub fn from_settings(_settings: &Settings) -> Option<Self> {
        Some(Self)
    }

    async fn fetch_player(client: &Client, video_id: &str) -> Result<Value, MediaError> {
        let body = json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": "19.09.37",
                    "androidSdkVersion": 33,
                    "hl": "en"
                }
            },
            "videoId": video_id,
        });
        post_json(client, PLAYER_API, &body).await
    }

    /// Progressive MP4 formats from the player response.
    fn progressive_formats(player: &Value) -> Vec<Value> {
        player
            .get("streamingData")
            .and_then(|s| s.get("formats"))
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .filter(|f| {
                        f.get("mimeType")
                            .and_then(Value::as_str)
                            .is_some_and(|m| m.starts_with("video/mp4"))
                            && f.get("url").and_then(Value::as_str).is_some()
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Largest format that still fits the upload limit.
    async fn select_format<'f>(client: &Client, formats: &'f [Value]) -> Option<&'f Value> {
        let mut chosen: Option<(&Value, u64)> = None;
        for format in formats {
            let size = Self::format_size(client, format).await;
            debug!("Stream h{} is {} bytes", height(format), size);
            if size == 0 || size > TG_FILE_LIMIT {
                continue;
            }
            if chosen.is_none_or(|(_, best_size)| size > best_size) {
                chosen = Some((format, size));
            }
        }
        chosen.map(|(format, _)| format)
    }

    /// Build the video descriptor from the chosen format and the
    /// player's video details.
    fn build_video(
        player: &Value,
        format: &Value,
        original_url: &str,
        max_quality_url: Option<String>,
    ) -> Option<Video> {
        let url = format.get("url").and_then(Value::as_str)?;
        let details = player.get("videoDetails").cloned().unwrap_or_default();
        let thumbnail_url = details
            .get("thumbnail")
            .and_then(|t| t.get("thumbnails"))
            .and_then(Value::as_array)
            .and_then(|l| l.last())
            .and_then(|t| t.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let meta = MediaMeta::new(SourceKind::YouTube, original_url.to_string())
            .with_caption(
                details
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_author(
                details
                    .get("author")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_thumbnail(thumbnail_url);

        let mut video = Video::new(meta, url.to_string());
        video.max_quality_url = max_quality_url;
        video.mime_type = format
            .get("mimeType")
            .and_then(Value::as_str)
            .map_or_else(
                || "video/mp4".to_string(),
                |m| m.split(';').next().unwrap_or("video/mp4").to_string(),
            );
        video.width = format.get("width").and_then(Value::as_u64).map(|v| v as u32);
        video.height = format.get("height").and_then(Value::as_u64).map(|v| v as u32);
        video.duration_secs = details
            .get("lengthSeconds")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        Some(video)
    }

    /// Reported size of a format, falling back to a HEAD probe when the
    /// player response omits `contentLength`.
    async fn format_size(client: &Client, format: &Value) -> u64 {
        if let Some(len) = format
            .get("contentLength")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
        {
            return len;
        }
        let Some(url) = format.get("url").and_then(Value::as_str) else {
            return 0;
        };
        match client.head(url).send().await {
            Ok(response) => response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}

fn height(format: &Value) -> u64 {
    format.get("height").and_then(Value::as_u64).unwrap_or(0)
}

#[async_trait]
impl MediaAdapter for YouTubeAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    fn patterns(&self) -> Vec<&'static Regex> {
        vec![&*WATCH_RE, &*SHORTS_RE]
    }

    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError> {
        let video_id = super::required_group(caps, "id")?;
        let original_url = format!("https://youtube.com/watch?v={video_id}");

        if let Some(hit) = cache.find(&original_url).await {
            return Ok(Resolution::CacheHit(hit));
        }

        info!("Resolving YouTube video {}", original_url);
        let player = match Self::fetch_player(client, video_id).await {
            Ok(p) => p,
            Err(e) => {
                info!("Player request failed for {}: {}", original_url, e);
                return Ok(Resolution::Fresh(Vec::new()));
            }
        };

        let playable = player
            .get("playabilityStatus")
            .and_then(|p| p.get("status"))
            .and_then(Value::as_str)
            == Some("OK");
        if !playable {
            info!("{} is not playable", original_url);
            return Ok(Resolution::Fresh(Vec::new()));
        }

        let formats = Self::progressive_formats(&player);
        if formats.is_empty() {
            info!("No progressive streams for {}", original_url);
            return Ok(Resolution::Fresh(Vec::new()));
        }

        // Highest resolution regardless of size
        let max_quality_url = formats
            .iter()
            .max_by_key(|f| height(f))
            .and_then(|f| f.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(format) = Self::select_format(client, &formats).await else {
            info!("No stream under the size limit for {}", original_url);
            return Ok(Resolution::Fresh(Vec::new()));
        };

        let Some(video) = Self::build_video(&player, format, &original_url, max_quality_url)
        else {
            return Ok(Resolution::Fresh(Vec::new()));
        };

        Ok(Resolution::Fresh(
            cache.save_group(vec![MediaDescriptor::Video(video)]).await,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_pattern_captures() {
        for url in [
            "https://www.youtube.com/watch?v=TCrP1SE2DkY",
            "https://youtu.be/TCrP1SE2DkY",
        ] {
            let caps = WATCH_RE.captures(url).expect("match");
            assert_eq!(&caps["id"], "TCrP1SE2DkY");
        }
    }

    #[test]
    fn test_shorts_pattern_captures() {
        let caps = SHORTS_RE
            .captures("https://youtube.com/shorts/hBOLCcvbGHM")
            .expect("match");
        assert_eq!(&caps["id"], "hBOLCcvbGHM");
    }

    #[tokio::test]
    async fn test_select_format_respects_size_limit() {
        let formats = vec![
            json!({"url": "https://s/big", "contentLength": (TG_FILE_LIMIT * 2).to_string(), "height": 1080}),
            json!({"url": "https://s/small", "contentLength": "1000", "height": 360}),
            json!({"url": "https://s/medium", "contentLength": "2000", "height": 720}),
        ];
        let client = Client::new();
        let chosen = YouTubeAdapter::select_format(&client, &formats)
            .await
            .expect("a fitting format");
        assert_eq!(
            chosen.get("url").and_then(Value::as_str),
            Some("https://s/medium")
        );
    }

    #[test]
    fn test_progressive_formats_filters_adaptive() {
        let player = json!({
            "streamingData": {
                "formats": [
                    {"mimeType": "video/mp4; codecs=\"avc1\"", "url": "https://s/1", "height": 360},
                    {"mimeType": "audio/webm; codecs=\"opus\"", "url": "https://s/2"},
                    {"mimeType": "video/mp4; codecs=\"avc1\"", "height": 720}
                ]
            }
        });
        let formats = YouTubeAdapter::progressive_formats(&player);
        assert_eq!(formats.len(), 1);
        assert_eq!(height(&formats[0]), 360);
    }
}
