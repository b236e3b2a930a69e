//! Twitter backend adapter.
//!
//! Recognizes status URLs and `t.co` short links (resolved through
//! their redirect, then re-matched). Tweet media comes from the v2 API
//! and needs a bearer token; without one the adapter stays unregistered.

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use super::MediaAdapter;
use crate::config::Settings;
use crate::media::cache::MediaCache;
use crate::media::model::{MediaDescriptor, MediaMeta, SourceKind, Video};
use crate::media::registry::Resolution;
use crate::media::MediaError;

// https://twitter.com/Yoda4ever/status/1580609309217628160
static STATUS_RE: Lazy<Regex> =
    lazy_regex!(r"(?:https?://)?(?:www\.)?twitter\.com/(?P<user>\w+)/status/(?P<id>\d+)");

// https://t.co/sOHvySZwUo
static TCO_RE: Lazy<Regex> = lazy_regex!(r"(?:https?://)?t\.co/(?P<tco_id>\w+)");

#[derive(Deserialize, Debug)]
struct TweetResponse {
    data: Option<TweetData>,
    includes: Option<Includes>,
}

#[derive(Deserialize, Debug)]
struct TweetData {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Includes {
    #[serde(default)]
    media: Vec<TweetMedia>,
    #[serde(default)]
    users: Vec<TweetUser>,
}

#[derive(Deserialize, Debug)]
struct TweetMedia {
    #[serde(rename = "type")]
    kind: String,
    preview_image_url: Option<String>,
    #[serde(default)]
    variants: Vec<MediaVariant>,
}

#[derive(Deserialize, Debug)]
struct MediaVariant {
    bit_rate: Option<u64>,
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TweetUser {
    username: Option<String>,
}

/// Twitter adapter; gated on an API bearer token.
pub struct TwitterAdapter {
    bearer_token: String,
}

impl TwitterAdapter {
    /// Supported only when a bearer token is configured.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings
            .twitter_bearer_token
            .clone()
            .map(|bearer_token| Self { bearer_token })
    }

    /// Follow a `t.co` link and re-match the destination as a status URL.
    async fn expand_tco(client: &Client, tco_id: &str) -> Option<String> {
        let url = format!("https://t.co/{tco_id}");
        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("t.co expansion failed for {}: {}", url, e);
                return None;
            }
        };
        let final_url = response.url().to_string();
        STATUS_RE
            .captures(&final_url)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str().to_string())
    }

    async fn fetch_tweet(
        &self,
        client: &Client,
        tweet_id: &str,
    ) -> Result<TweetResponse, MediaError> {
        let response = client
            .get(format!("https://api.twitter.com/2/tweets/{tweet_id}"))
            .query(&[
                ("media.fields", "type,variants,preview_image_url"),
                ("expansions", "attachments.media_keys,author_id"),
                ("user.fields", "username"),
            ])
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::UnexpectedShape(format!(
                "tweets API returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| MediaError::UnexpectedShape(e.to_string()))
    }
}

#[async_trait]
impl MediaAdapter for TwitterAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Twitter
    }

    fn patterns(&self) -> Vec<&'static Regex> {
        vec![&*STATUS_RE, &*TCO_RE]
    }

    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError> {
        let tweet_id = match caps.name("id") {
            Some(id) => id.as_str().to_string(),
            None => {
                let tco_id = super::required_group(caps, "tco_id")?;
                match Self::expand_tco(client, tco_id).await {
                    Some(id) => id,
                    None => return Ok(Resolution::Fresh(Vec::new())),
                }
            }
        };

        let original_url = format!("https://twitter.com/i/status/{tweet_id}");
        if let Some(hit) = cache.find(&original_url).await {
            return Ok(Resolution::CacheHit(hit));
        }

        info!("Resolving tweet {}", original_url);
        let tweet = match self.fetch_tweet(client, &tweet_id).await {
            Ok(t) => t,
            Err(e) => {
                info!("Tweet {} is unresolvable: {}", tweet_id, e);
                return Ok(Resolution::Fresh(Vec::new()));
            }
        };

        let caption = tweet.data.and_then(|d| d.text);
        let includes = tweet.includes.unwrap_or(Includes {
            media: Vec::new(),
            users: Vec::new(),
        });
        let author = includes.users.first().and_then(|u| u.username.clone());

        let mut descriptors = Vec::new();
        for media in includes.media {
            if media.kind != "video" {
                continue;
            }
            let url = media
                .variants
                .iter()
                .max_by_key(|v| v.bit_rate.unwrap_or(0))
                .and_then(|v| v.url.clone());
            let Some(url) = url else { continue };

            let meta = MediaMeta::new(SourceKind::Twitter, original_url.clone())
                .with_caption(caption.clone())
                .with_author(author.clone())
                .with_thumbnail(media.preview_image_url.clone());
            descriptors.push(MediaDescriptor::Video(Video::new(meta, url)));
        }

        Ok(Resolution::Fresh(cache.save_group(descriptors).await))
    }
}
