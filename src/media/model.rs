//! Media descriptor model.
//!
//! Descriptors are immutable value objects produced by adapters and
//! persisted in the media cache. Identity is the canonical source URL:
//! two descriptors for the same post compare equal no matter how their
//! scraped metadata differs.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use tokio::sync::OnceCell;

use super::MediaError;

/// Originating service of a resolved media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// tiktok.com and its short-link domains
    TikTok,
    /// twitter.com / t.co
    Twitter,
    /// youtube.com / youtu.be
    YouTube,
    /// reddit.com / redd.it
    Reddit,
    /// instagram.com
    Instagram,
}

impl SourceKind {
    /// Human-readable service name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TikTok => "TikTok",
            Self::Twitter => "Twitter",
            Self::YouTube => "YouTube",
            Self::Reddit => "Reddit",
            Self::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offset from an uppercase ASCII letter to its regional indicator symbol.
const FLAG_OFFSET: u32 = 0x1F1E6 - ('A' as u32);

/// Flag emoji for a two-letter country/language code.
///
/// Anything other than exactly two ASCII letters yields an empty string.
#[must_use]
pub fn lang_flag(code: &str) -> String {
    let code = code.to_ascii_uppercase();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return String::new();
    }
    code.chars()
        .filter_map(|c| char::from_u32(c as u32 + FLAG_OFFSET))
        .collect()
}

fn normalize_language(value: Option<&str>) -> Option<String> {
    let value = value?;
    if value.len() == 2 && value.bytes().all(|b| b.is_ascii_alphabetic()) {
        Some(value.to_ascii_uppercase())
    } else {
        None
    }
}

fn de_language<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(normalize_language(raw.as_deref()))
}

/// Metadata shared by every media variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMeta {
    /// Originating service
    pub kind: SourceKind,
    /// Canonical URL of the source post; the cache and dedup key
    pub original_url: String,
    /// Author-supplied description from the source post
    pub caption: Option<String>,
    /// Display name or handle of the post author
    pub author: Option<String>,
    /// Preview image reference
    pub thumbnail_url: Option<String>,
    // Invariant: either a validated uppercase two-letter code or absent.
    #[serde(default, deserialize_with = "de_language")]
    language: Option<String>,
}

impl MediaMeta {
    /// Create metadata for a post on `kind` identified by its canonical URL.
    #[must_use]
    pub fn new(kind: SourceKind, original_url: String) -> Self {
        Self {
            kind,
            original_url,
            caption: None,
            author: None,
            thumbnail_url: None,
            language: None,
        }
    }

    /// Attach an author-supplied caption.
    #[must_use]
    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }

    /// Attach the post author.
    #[must_use]
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    /// Attach a thumbnail URL.
    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail_url: Option<String>) -> Self {
        self.thumbnail_url = thumbnail_url;
        self
    }

    /// Attach a language code.
    ///
    /// Invalid codes (anything but two ASCII letters) are stored as
    /// absent rather than rejected with an error.
    #[must_use]
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = normalize_language(language);
        self
    }

    /// Validated two-letter language code, if any.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Flag emoji for the post language, or an empty string.
    #[must_use]
    pub fn flag_emoji(&self) -> String {
        self.language.as_deref().map(lang_flag).unwrap_or_default()
    }
}

/// A single video with a directly playable URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Shared post metadata
    pub meta: MediaMeta,
    /// Playable video URL fitting the platform size limit
    pub url: String,
    /// Full-quality URL that may exceed the platform size limit
    pub max_quality_url: Option<String>,
    /// MIME type of the playable stream
    pub mime_type: String,
    /// Pixel width, when the vendor reports it
    pub width: Option<u32>,
    /// Pixel height, when the vendor reports it
    pub height: Option<u32>,
    /// Duration in seconds, when the vendor reports it
    pub duration_secs: Option<u32>,
    // Lazily fetched byte content; never persisted.
    #[serde(skip)]
    content: OnceCell<Bytes>,
}

impl Video {
    /// Create a video descriptor with the default MP4 mime type.
    #[must_use]
    pub fn new(meta: MediaMeta, url: String) -> Self {
        Self {
            meta,
            url,
            max_quality_url: None,
            mime_type: "video/mp4".to_string(),
            width: None,
            height: None,
            duration_secs: None,
            content: OnceCell::new(),
        }
    }

    /// Byte content of the playable stream, fetched once and memoized.
    ///
    /// Concurrent callers share a single in-flight fetch; later callers
    /// get the cached bytes without touching the network.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::Network` if the fetch fails. Failed fetches
    /// are not memoized, so a later call may retry.
    pub async fn content(&self, client: &reqwest::Client) -> Result<Bytes, MediaError> {
        self.content
            .get_or_try_init(|| async {
                let response = client
                    .get(&self.url)
                    .send()
                    .await
                    .map_err(|e| MediaError::Network(e.to_string()))?;
                response
                    .bytes()
                    .await
                    .map_err(|e| MediaError::Network(e.to_string()))
            })
            .await
            .cloned()
    }
}

/// An ordered set of images belonging to one post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSet {
    /// Shared post metadata
    pub meta: MediaMeta,
    /// Image URLs in post order
    pub images: Vec<String>,
    /// Soundtrack of the image post, when the service provides one
    pub audio_url: Option<String>,
}

/// A single audio track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audio {
    /// Shared post metadata
    pub meta: MediaMeta,
    /// Playable audio URL
    pub url: String,
    /// MIME type of the audio stream
    pub mime_type: String,
}

/// One item inside a mixed media group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupItem {
    /// A photo by URL
    Photo {
        /// Image URL
        url: String,
    },
    /// A video by URL
    Video {
        /// Video URL
        url: String,
    },
}

impl GroupItem {
    fn url(&self) -> &str {
        match self {
            Self::Photo { url } | Self::Video { url } => url,
        }
    }
}

/// A mixed group of photos and videos delivered as one album.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaGroup {
    /// Shared post metadata
    pub meta: MediaMeta,
    /// Album items in post order
    pub items: Vec<GroupItem>,
}

/// A resolved media item of any supported kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaDescriptor {
    /// Single video
    Video(Video),
    /// Ordered image set
    ImageSet(ImageSet),
    /// Single audio track
    Audio(Audio),
    /// Mixed photo/video album
    Group(MediaGroup),
}

impl MediaDescriptor {
    /// Shared post metadata of any variant.
    #[must_use]
    pub const fn meta(&self) -> &MediaMeta {
        match self {
            Self::Video(v) => &v.meta,
            Self::ImageSet(i) => &i.meta,
            Self::Audio(a) => &a.meta,
            Self::Group(g) => &g.meta,
        }
    }

    /// Canonical source URL; the cache and dedup key.
    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.meta().original_url
    }

    /// Originating service.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.meta().kind
    }

    /// Whether the descriptor carries anything playable.
    ///
    /// A descriptor without a primary URL must never be delivered
    /// downstream.
    #[must_use]
    pub fn is_deliverable(&self) -> bool {
        match self {
            Self::Video(v) => !v.url.is_empty(),
            Self::ImageSet(i) => i.images.iter().any(|u| !u.is_empty()),
            Self::Audio(a) => !a.url.is_empty(),
            Self::Group(g) => g.items.iter().any(|i| !i.url().is_empty()),
        }
    }
}

impl PartialEq for MediaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.original_url() == other.original_url()
    }
}

impl Eq for MediaDescriptor {}

impl Hash for MediaDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.original_url().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(url: &str, original: &str) -> MediaDescriptor {
        MediaDescriptor::Video(Video::new(
            MediaMeta::new(SourceKind::TikTok, original.to_string()),
            url.to_string(),
        ))
    }

    #[test]
    fn test_lang_flag_two_letter() {
        assert_eq!(lang_flag("us"), "\u{1F1FA}\u{1F1F8}");
        assert_eq!(lang_flag("DE"), "\u{1F1E9}\u{1F1EA}");
    }

    #[test]
    fn test_lang_flag_rejects_invalid() {
        assert_eq!(lang_flag("usa"), "");
        assert_eq!(lang_flag("u"), "");
        assert_eq!(lang_flag("12"), "");
        assert_eq!(lang_flag(""), "");
    }

    #[test]
    fn test_language_invariant_on_construction() {
        let meta = MediaMeta::new(SourceKind::TikTok, "https://x".into()).with_language(Some("kr"));
        assert_eq!(meta.language(), Some("KR"));

        let meta = MediaMeta::new(SourceKind::TikTok, "https://x".into()).with_language(Some("usa"));
        assert_eq!(meta.language(), None);
        assert_eq!(meta.flag_emoji(), "");
    }

    #[test]
    fn test_language_invariant_survives_deserialization() {
        let json = r#"{"kind":"TikTok","original_url":"https://x","caption":null,"author":null,"thumbnail_url":null,"language":"usa"}"#;
        let meta: MediaMeta = serde_json::from_str(json).expect("meta");
        assert_eq!(meta.language(), None);

        let json = r#"{"kind":"TikTok","original_url":"https://x","caption":null,"author":null,"thumbnail_url":null,"language":"de"}"#;
        let meta: MediaMeta = serde_json::from_str(json).expect("meta");
        assert_eq!(meta.language(), Some("DE"));
    }

    #[test]
    fn test_equality_is_original_url_only() {
        let a = video("https://cdn/a.mp4", "https://svc/post/1");
        let mut b = video("https://cdn/other.mp4", "https://svc/post/1");
        if let MediaDescriptor::Video(v) = &mut b {
            v.meta.caption = Some("different".into());
        }
        assert_eq!(a, b);

        let c = video("https://cdn/a.mp4", "https://svc/post/2");
        assert_ne!(a, c);
    }

    #[test]
    fn test_dedup_by_history_membership() {
        let history = vec![video("https://cdn/a.mp4", "https://svc/post/1")];
        let incoming = video("https://cdn/b.mp4", "https://svc/post/1");
        assert!(history.contains(&incoming));
    }

    #[test]
    fn test_empty_primary_url_is_not_deliverable() {
        assert!(!video("", "https://svc/post/1").is_deliverable());
        assert!(video("https://cdn/a.mp4", "https://svc/post/1").is_deliverable());

        let empty_set = MediaDescriptor::ImageSet(ImageSet {
            meta: MediaMeta::new(SourceKind::TikTok, "https://x".into()),
            images: vec![],
            audio_url: None,
        });
        assert!(!empty_set.is_deliverable());
    }

    #[test]
    fn test_descriptor_round_trips_without_content() {
        let d = video("https://cdn/a.mp4", "https://svc/post/1");
        let json = serde_json::to_string(&d).expect("serialize");
        let back: MediaDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(d, back);
        if let MediaDescriptor::Video(v) = back {
            assert_eq!(v.url, "https://cdn/a.mp4");
        } else {
            panic!("expected a video");
        }
    }
}
