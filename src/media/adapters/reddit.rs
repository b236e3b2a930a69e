//! Reddit backend adapter.
//!
//! Recognizes `redd.it` short links and path-style post URLs (comments
//! and gallery permalinks; bare subreddit links are rejected). Posts
//! come from the public comments API with client-credential basic auth,
//! so the adapter is gated on a configured client id and secret.

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy};
use regex::{Captures, Regex};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use super::MediaAdapter;
use crate::config::Settings;
use crate::media::cache::MediaCache;
use crate::media::model::{MediaDescriptor, MediaMeta, SourceKind, Video};
use crate::media::registry::Resolution;
use crate::media::MediaError;

// https://redd.it/2gmzqe
static SHORT_RE: Lazy<Regex> = lazy_regex!(r"(?:https?://)?(?:www\.)?redd\.it/(?P<id>\w+)");

// reddit.com/comments/2gmzqe/
// www.reddit.com/r/redditdev/comments/2gmzqe/praw_https/
// www.reddit.com/gallery/2gmzqe
static LINK_RE: Lazy<Regex> =
    lazy_regex!(r"(?:https?://)?(?:(?:www|old|new)\.)?reddit\.com/(?P<link>[\w/]+)");

/// Submission id from a reddit path, per the permalink layouts above.
///
/// Returns `None` for paths that do not identify a post, e.g. a bare
/// subreddit link.
fn submission_id(path: &str) -> Option<&str> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    let id = if let Some(pos) = parts.iter().position(|p| *p == "gallery") {
        *parts.get(pos + 1)?
    } else if let Some(pos) = parts.iter().position(|p| *p == "comments") {
        *parts.get(pos + 1)?
    } else if parts.contains(&"r") {
        // Subreddit link without a submission
        return None;
    } else {
        *parts.last()?
    };

    (!id.is_empty() && id.chars().all(char::is_alphanumeric)).then_some(id)
}

/// Reddit adapter; gated on API client credentials.
pub struct RedditAdapter {
    client_id: String,
    client_secret: String,
    user_agent: String,
}

impl RedditAdapter {
    /// Supported only when client credentials are configured.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        match (&settings.reddit_client_id, &settings.reddit_client_secret) {
            (Some(client_id), Some(client_secret)) => Some(Self {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                user_agent: settings.reddit_user_agent.clone(),
            }),
            _ => None,
        }
    }

    /// Post data of a submission: `[0].data.children[0].data`.
    async fn fetch_post(&self, client: &Client, id: &str) -> Result<Value, MediaError> {
        let response = client
            .get(format!("https://api.reddit.com/comments/{id}"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::UnexpectedShape(format!(
                "comments API returned {status}"
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| MediaError::UnexpectedShape(e.to_string()))?;

        Ok(data
            .get(0)
            .and_then(|v| v.get("data"))
            .and_then(|v| v.get("children"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("data"))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MediaAdapter for RedditAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }

    fn patterns(&self) -> Vec<&'static Regex> {
        vec![&*SHORT_RE, &*LINK_RE]
    }

    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError> {
        let id = match caps.name("id") {
            Some(id) => id.as_str(),
            None => {
                let link = super::required_group(caps, "link")?;
                match submission_id(link) {
                    Some(id) => id,
                    None => return Ok(Resolution::Fresh(Vec::new())),
                }
            }
        };

        let original_url = format!("https://redd.it/{id}");
        if let Some(hit) = cache.find(&original_url).await {
            return Ok(Resolution::CacheHit(hit));
        }

        info!("Resolving Reddit post {}", original_url);
        let post = match self.fetch_post(client, id).await {
            Ok(p) => p,
            Err(e) => {
                info!("Post {} is unresolvable: {}", original_url, e);
                return Ok(Resolution::Fresh(Vec::new()));
            }
        };

        let video_url = post
            .get("media")
            .and_then(|m| m.get("reddit_video"))
            .and_then(|v| v.get("fallback_url"))
            .and_then(Value::as_str)
            .map(|u| u.trim_end_matches("?source=fallback").to_string());
        let Some(video_url) = video_url else {
            info!("No video found in {}", original_url);
            return Ok(Resolution::Fresh(Vec::new()));
        };

        // Prefer the full preview image over the tiny thumbnail
        let mut thumbnail = post
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string);
        if post
            .get("preview")
            .and_then(|p| p.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            if let Some(url) = post
                .get("preview")
                .and_then(|p| p.get("images"))
                .and_then(|i| i.get(0))
                .and_then(|i| i.get("source"))
                .and_then(|s| s.get("url"))
                .and_then(Value::as_str)
            {
                thumbnail = Some(url.to_string());
            }
        }

        let meta = MediaMeta::new(SourceKind::Reddit, original_url)
            .with_caption(post.get("title").and_then(Value::as_str).map(str::to_string))
            .with_author(
                post.get("author")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
            .with_thumbnail(thumbnail);

        let video = Video::new(meta, video_url);
        Ok(Resolution::Fresh(
            cache.save_group(vec![MediaDescriptor::Video(video)]).await,
        ))
    }
}
