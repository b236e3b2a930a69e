//! Per-service backend adapters.
//!
//! One adapter per external media service. An adapter declares its
//! match patterns and resolves a successful match into descriptors,
//! consulting the cache before any network work. Registration happens
//! once at startup through [`build_adapters`]; declaration order there
//! is dispatch order.

mod instagram;
mod reddit;
mod tiktok;
mod twitter;
mod youtube;

pub use instagram::InstagramAdapter;
pub use reddit::RedditAdapter;
pub use tiktok::TikTokAdapter;
pub use twitter::TwitterAdapter;
pub use youtube::YouTubeAdapter;

use async_trait::async_trait;
use regex::{Captures, Regex};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::cache::MediaCache;
use super::registry::Resolution;
use super::model::SourceKind;
use super::MediaError;
use crate::config::Settings;

/// Contract every service backend implements.
///
/// Error policy: unresolvable posts (deleted, not a video, vendor API
/// shape surprises) and exhausted transient failures come back as
/// `Ok(Resolution::Fresh(vec![]))`. An `Err` is reserved for defects
/// and is logged and dropped by dispatch.
#[async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Service this adapter recognizes.
    fn kind(&self) -> SourceKind;

    /// Match patterns in declaration order.
    fn patterns(&self) -> Vec<&'static Regex>;

    /// Resolve one pattern match into descriptors.
    ///
    /// Must consult `cache` for the canonical URL before network work
    /// and return `Resolution::CacheHit` on a hit.
    async fn resolve(
        &self,
        client: &Client,
        caps: &Captures<'_>,
        cache: &MediaCache,
    ) -> Result<Resolution, MediaError>;
}

/// Build the adapter set for this deployment.
///
/// Declaration order here is dispatch order. Adapters whose support
/// predicate fails (missing credentials) are skipped and never
/// registered.
#[must_use]
pub fn build_adapters(settings: &Settings) -> Vec<Arc<dyn MediaAdapter>> {
    let mut adapters: Vec<Arc<dyn MediaAdapter>> = Vec::new();
    register(&mut adapters, "TikTok", TikTokAdapter::from_settings(settings));
    register(
        &mut adapters,
        "Twitter",
        TwitterAdapter::from_settings(settings),
    );
    register(
        &mut adapters,
        "YouTube",
        YouTubeAdapter::from_settings(settings),
    );
    register(&mut adapters, "Reddit", RedditAdapter::from_settings(settings));
    register(
        &mut adapters,
        "Instagram",
        InstagramAdapter::from_settings(settings),
    );
    adapters
}

fn register<A: MediaAdapter + 'static>(
    adapters: &mut Vec<Arc<dyn MediaAdapter>>,
    name: &str,
    adapter: Option<A>,
) {
    match adapter {
        Some(adapter) => {
            info!("Registering adapter [{}]", name);
            adapters.push(Arc::new(adapter));
        }
        None => info!("Adapter [{}] is not configured, skipping", name),
    }
}

/// GET a JSON document from a vendor API.
///
/// Shared by adapters; maps connectivity problems to
/// `MediaError::Network` and non-success statuses or non-JSON bodies to
/// `MediaError::UnexpectedShape`, which callers usually downgrade to an
/// empty result.
pub(crate) async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> Result<Value, MediaError> {
    let mut request = client.get(url).query(query);
    for (key, value) in headers {
        request = request.header(*key, *value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| MediaError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::UnexpectedShape(format!(
            "{url} returned {status}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| MediaError::UnexpectedShape(e.to_string()))
}

/// POST a JSON body to a vendor API and return the JSON response.
///
/// Same error mapping as [`get_json`].
pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
) -> Result<Value, MediaError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| MediaError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::UnexpectedShape(format!(
            "{url} returned {status}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| MediaError::UnexpectedShape(e.to_string()))
}

/// Named capture group that the pattern guarantees on a match.
///
/// A missing group here is a defect: the pattern and the resolve code
/// disagree about the capture names.
pub(crate) fn required_group<'t>(
    caps: &Captures<'t>,
    name: &str,
) -> Result<&'t str, MediaError> {
    caps.name(name)
        .map(|m| m.as_str())
        .ok_or_else(|| MediaError::Defect(format!("pattern matched without group {name:?}")))
}
