//! Caption composition.
//!
//! Renders a descriptor's metadata into one caption string according to
//! display preferences. Pure: same metadata and preferences always
//! produce the same string.

use lazy_regex::{lazy_regex, Lazy};
use regex::Regex;

use super::model::{MediaMeta, SourceKind};

/// Match hashtag tokens with their trailing space: `#word `
static RE_HASHTAG: Lazy<Regex> = lazy_regex!(r"#\w+\s?");

/// How much of the author-supplied caption to include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptionMode {
    /// The caption as the author wrote it
    #[default]
    Full,
    /// The caption with `#hashtag` tokens removed
    NoHashtags,
    /// No caption text
    Off,
}

impl DescriptionMode {
    /// Parse a configuration value; unknown values mean `Full`.
    #[must_use]
    pub fn from_config(value: &str) -> Self {
        match value {
            "no_hashtags" => Self::NoHashtags,
            "off" => Self::Off,
            _ => Self::Full,
        }
    }
}

/// Display preferences for rendered captions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptionPrefs {
    /// Caption text inclusion mode
    pub description: DescriptionMode,
    /// Append an author mention
    pub author_mention: bool,
    /// Append the language flag emoji
    pub language_flag: bool,
    /// Append the original post URL on its own paragraph
    pub original_link: bool,
}

/// Render a caption for `meta` under `prefs`.
///
/// Twitter embeds its own link server-side, so the original-link suffix
/// is never appended for Twitter posts regardless of preference. Returns
/// an empty string when nothing applies; see [`compose_or`] for a
/// defaulted variant.
#[must_use]
pub fn compose(meta: &MediaMeta, prefs: &CaptionPrefs) -> String {
    let mut caption = match prefs.description {
        DescriptionMode::Full => meta.caption.clone().unwrap_or_default(),
        DescriptionMode::NoHashtags => RE_HASHTAG
            .replace_all(meta.caption.as_deref().unwrap_or_default(), "")
            .into_owned(),
        DescriptionMode::Off => String::new(),
    };
    caption = caption.trim().to_string();

    if prefs.author_mention {
        if let Some(author) = meta.author.as_deref() {
            caption.push_str(&format!(
                " by <code>@{}</code> ",
                html_escape::encode_text(author)
            ));
        }
    }
    caption = caption.trim().to_string();

    if prefs.language_flag {
        caption.push(' ');
        caption.push_str(&meta.flag_emoji());
    }
    caption = caption.trim().to_string();

    if prefs.original_link && meta.kind != SourceKind::Twitter {
        caption.push_str(&format!("\n\n{}", meta.original_url));
    }

    caption.trim().to_string()
}

/// Render a caption, falling back to `default` when nothing applies.
#[must_use]
pub fn compose_or(meta: &MediaMeta, prefs: &CaptionPrefs, default: &str) -> String {
    let caption = compose(meta, prefs);
    if caption.is_empty() {
        default.to_string()
    } else {
        caption
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: SourceKind) -> MediaMeta {
        MediaMeta::new(kind, "https://svc/post/1".to_string())
            .with_caption(Some("look at this #cat #funny".to_string()))
            .with_author(Some("someone".to_string()))
            .with_language(Some("us"))
    }

    const ALL: CaptionPrefs = CaptionPrefs {
        description: DescriptionMode::Full,
        author_mention: true,
        language_flag: true,
        original_link: true,
    };

    #[test]
    fn test_full_composition() {
        let rendered = compose(&meta(SourceKind::TikTok), &ALL);
        assert_eq!(
            rendered,
            "look at this #cat #funny by <code>@someone</code> \u{1F1FA}\u{1F1F8}\n\nhttps://svc/post/1"
        );
    }

    #[test]
    fn test_hashtags_stripped() {
        let prefs = CaptionPrefs {
            description: DescriptionMode::NoHashtags,
            ..Default::default()
        };
        assert_eq!(compose(&meta(SourceKind::TikTok), &prefs), "look at this");
    }

    #[test]
    fn test_description_off() {
        let prefs = CaptionPrefs {
            description: DescriptionMode::Off,
            original_link: true,
            ..Default::default()
        };
        assert_eq!(
            compose(&meta(SourceKind::TikTok), &prefs),
            "https://svc/post/1"
        );
    }

    #[test]
    fn test_twitter_never_gets_link_suffix() {
        let rendered = compose(&meta(SourceKind::Twitter), &ALL);
        assert!(!rendered.contains("https://svc/post/1"));
    }

    #[test]
    fn test_invalid_language_means_no_flag() {
        let m = MediaMeta::new(SourceKind::TikTok, "https://svc/post/1".to_string())
            .with_language(Some("usa"));
        let prefs = CaptionPrefs {
            description: DescriptionMode::Off,
            language_flag: true,
            ..Default::default()
        };
        assert_eq!(compose(&m, &prefs), "");
    }

    #[test]
    fn test_author_handle_is_escaped() {
        let m = MediaMeta::new(SourceKind::TikTok, "https://svc/post/1".to_string())
            .with_author(Some("a<b>".to_string()));
        let prefs = CaptionPrefs {
            description: DescriptionMode::Off,
            author_mention: true,
            ..Default::default()
        };
        assert_eq!(compose(&m, &prefs), "by <code>@a&lt;b&gt;</code>");
    }

    #[test]
    fn test_pure_over_flag_matrix() {
        let m = meta(SourceKind::Reddit);
        for description in [
            DescriptionMode::Full,
            DescriptionMode::NoHashtags,
            DescriptionMode::Off,
        ] {
            for author_mention in [false, true] {
                for language_flag in [false, true] {
                    for original_link in [false, true] {
                        let prefs = CaptionPrefs {
                            description,
                            author_mention,
                            language_flag,
                            original_link,
                        };
                        assert_eq!(compose(&m, &prefs), compose(&m, &prefs));
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_when_empty() {
        let m = MediaMeta::new(SourceKind::TikTok, "https://svc/post/1".to_string());
        let prefs = CaptionPrefs {
            description: DescriptionMode::Off,
            ..Default::default()
        };
        assert_eq!(compose_or(&m, &prefs, "fallback"), "fallback");
    }
}
