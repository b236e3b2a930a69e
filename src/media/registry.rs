//! Pattern dispatch across registered adapters.
//!
//! The registry owns the ordered adapter set built once at startup.
//! Each URL occurrence in an input string resolves through exactly one
//! adapter: when several adapters match overlapping text, the earliest
//! registered adapter (then its earliest declared pattern) wins.

use futures_util::future::join_all;
use regex::Captures;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::adapters::MediaAdapter;
use super::cache::MediaCache;
use super::model::MediaDescriptor;

/// Outcome of one adapter resolution.
///
/// Cache hits are an explicit variant rather than control flow so
/// dispatch can account for them without the adapter reaching around
/// its own return type.
#[derive(Debug)]
pub enum Resolution {
    /// Descriptors scraped from the network (possibly none)
    Fresh(Vec<MediaDescriptor>),
    /// Descriptors served from the cache without network calls
    CacheHit(Vec<MediaDescriptor>),
}

impl Resolution {
    /// The resolved descriptors, however they were obtained.
    #[must_use]
    pub fn into_inner(self) -> Vec<MediaDescriptor> {
        match self {
            Self::Fresh(d) | Self::CacheHit(d) => d,
        }
    }
}

/// One pattern match awaiting resolution.
struct Candidate<'r, 't> {
    adapter: &'r Arc<dyn MediaAdapter>,
    adapter_idx: usize,
    pattern_idx: usize,
    start: usize,
    end: usize,
    caps: Captures<'t>,
}

/// Ordered adapter set with the dispatch algorithm.
pub struct ParserRegistry {
    adapters: Vec<Arc<dyn MediaAdapter>>,
    cache: MediaCache,
    timeout: Duration,
    resolved_total: AtomicU64,
    cache_hits: AtomicU64,
}

impl ParserRegistry {
    /// Create a registry over adapters in dispatch order.
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn MediaAdapter>>, cache: MediaCache, timeout: Duration) -> Self {
        info!(
            "Parser registry ready with {} adapter(s): {}",
            adapters.len(),
            adapters
                .iter()
                .map(|a| a.kind().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            adapters,
            cache,
            timeout,
            resolved_total: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Registered adapters, in dispatch order.
    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn MediaAdapter>] {
        &self.adapters
    }

    /// The media cache shared by all adapters.
    #[must_use]
    pub const fn cache(&self) -> &MediaCache {
        &self.cache
    }

    /// Descriptors resolved since startup, for `/stats`.
    #[must_use]
    pub fn resolved_total(&self) -> u64 {
        self.resolved_total.load(Ordering::Relaxed)
    }

    /// Resolutions served from cache since startup, for `/stats`.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Resolve every recognized URL in the given input strings.
    ///
    /// Results preserve input order, then match position within an
    /// input. An empty result means nothing was recognized or nothing
    /// was resolvable; it is not an error. Adapter defects are logged
    /// and skipped so one bad adapter or input never aborts the batch.
    pub async fn parse(&self, client: &Client, inputs: &[&str]) -> Vec<MediaDescriptor> {
        let mut results = Vec::new();
        for input in inputs {
            let candidates = self.select_candidates(input);
            // Candidates of one input resolve concurrently; join_all
            // keeps their text order in the output.
            let resolutions = join_all(
                candidates
                    .iter()
                    .map(|candidate| self.resolve_candidate(client, candidate)),
            )
            .await;
            for resolved in resolutions {
                results.extend(resolved.into_iter().filter(|d| {
                    if d.is_deliverable() {
                        true
                    } else {
                        warn!("Dropping undeliverable descriptor for {}", d.original_url());
                        false
                    }
                }));
            }
        }
        results
    }

    /// Collect all pattern matches in `input` and pick the winners.
    ///
    /// Winners are chosen in adapter registration order (then pattern
    /// declaration order), each claiming its text span; later matches
    /// overlapping a claimed span are discarded. Survivors come back in
    /// text order.
    fn select_candidates<'r, 't>(&'r self, input: &'t str) -> Vec<Candidate<'r, 't>> {
        let mut all: Vec<Candidate<'r, 't>> = Vec::new();
        for (adapter_idx, adapter) in self.adapters.iter().enumerate() {
            for (pattern_idx, pattern) in adapter.patterns().iter().enumerate() {
                for caps in pattern.captures_iter(input) {
                    let m = match caps.get(0) {
                        Some(m) => m,
                        None => continue,
                    };
                    debug!(
                        "Match for [{}] pattern #{}: {:?}",
                        adapter.kind(),
                        pattern_idx,
                        m.as_str()
                    );
                    all.push(Candidate {
                        adapter,
                        adapter_idx,
                        pattern_idx,
                        start: m.start(),
                        end: m.end(),
                        caps,
                    });
                }
            }
        }

        // Priority order: who claims a span first.
        all.sort_by_key(|c| (c.adapter_idx, c.pattern_idx, c.start));

        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut winners: Vec<Candidate<'r, 't>> = Vec::new();
        for candidate in all {
            let overlaps = claimed
                .iter()
                .any(|&(s, e)| candidate.start < e && s < candidate.end);
            if !overlaps {
                claimed.push((candidate.start, candidate.end));
                winners.push(candidate);
            }
        }

        // Resolution order: text order within the input.
        winners.sort_by_key(|c| (c.start, c.adapter_idx, c.pattern_idx));
        winners
    }

    /// Run one adapter resolution under the per-call timeout.
    async fn resolve_candidate(
        &self,
        client: &Client,
        candidate: &Candidate<'_, '_>,
    ) -> Vec<MediaDescriptor> {
        let kind = candidate.adapter.kind();
        let fut = candidate
            .adapter
            .resolve(client, &candidate.caps, &self.cache);

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(Resolution::CacheHit(descriptors))) => {
                debug!("[{}] served {} descriptor(s) from cache", kind, descriptors.len());
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.resolved_total
                    .fetch_add(descriptors.len() as u64, Ordering::Relaxed);
                descriptors
            }
            Ok(Ok(Resolution::Fresh(descriptors))) => {
                debug!("[{}] resolved {} descriptor(s)", kind, descriptors.len());
                self.resolved_total
                    .fetch_add(descriptors.len() as u64, Ordering::Relaxed);
                descriptors
            }
            Ok(Err(e)) => {
                // Defects are local to this input/adapter pair.
                error!("[{}] adapter defect: {}", kind, e);
                Vec::new()
            }
            Err(_) => {
                warn!("[{}] resolution timed out after {:?}", kind, self.timeout);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::model::{MediaMeta, SourceKind, Video};
    use crate::media::MediaError;
    use async_trait::async_trait;
    use lazy_regex::{lazy_regex, Lazy};
    use regex::Regex;

    static ALPHA_RE: Lazy<Regex> = lazy_regex!(r"alpha\.test/(?P<id>\d+)");
    static BETA_RE: Lazy<Regex> = lazy_regex!(r"(?:alpha|beta)\.test/(?P<id>\d+)");
    static GAMMA_RE: Lazy<Regex> = lazy_regex!(r"gamma\.test/(?P<id>\d+)");

    struct FixedAdapter {
        kind: SourceKind,
        pattern: &'static Regex,
    }

    #[async_trait]
    impl MediaAdapter for FixedAdapter {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn patterns(&self) -> Vec<&'static Regex> {
            vec![self.pattern]
        }

        async fn resolve(
            &self,
            _client: &Client,
            caps: &Captures<'_>,
            _cache: &MediaCache,
        ) -> Result<Resolution, MediaError> {
            let id = caps
                .name("id")
                .ok_or_else(|| MediaError::Defect("missing id group".into()))?
                .as_str();
            let meta = MediaMeta::new(self.kind, format!("https://{}/{id}", self.kind));
            Ok(Resolution::Fresh(vec![MediaDescriptor::Video(Video::new(
                meta,
                format!("https://cdn/{id}.mp4"),
            ))]))
        }
    }

    fn registry(adapters: Vec<Arc<dyn MediaAdapter>>) -> ParserRegistry {
        let cache = MediaCache::new(None, Duration::from_secs(60), 100);
        ParserRegistry::new(adapters, cache, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_overlapping_adapters_first_registered_wins() {
        let reg = registry(vec![
            Arc::new(FixedAdapter {
                kind: SourceKind::TikTok,
                pattern: &*ALPHA_RE,
            }),
            Arc::new(FixedAdapter {
                kind: SourceKind::Reddit,
                pattern: &*BETA_RE,
            }),
        ]);
        let client = Client::new();

        let out = reg.parse(&client, &["see alpha.test/11"]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), SourceKind::TikTok);
    }

    #[tokio::test]
    async fn test_two_urls_resolve_in_text_order() {
        let reg = registry(vec![
            Arc::new(FixedAdapter {
                kind: SourceKind::TikTok,
                pattern: &*ALPHA_RE,
            }),
            Arc::new(FixedAdapter {
                kind: SourceKind::Reddit,
                pattern: &*BETA_RE,
            }),
        ]);
        let client = Client::new();

        // beta comes first in the text but its adapter registered second
        let out = reg
            .parse(&client, &["beta.test/22 then alpha.test/11"])
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind(), SourceKind::Reddit);
        assert_eq!(out[1].kind(), SourceKind::TikTok);
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let reg = registry(vec![Arc::new(FixedAdapter {
            kind: SourceKind::TikTok,
            pattern: &*ALPHA_RE,
        })]);
        let client = Client::new();

        let out = reg.parse(&client, &["nothing to see here"]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_defect_skips_input_but_not_batch() {
        struct DefectiveAdapter;

        #[async_trait]
        impl MediaAdapter for DefectiveAdapter {
            fn kind(&self) -> SourceKind {
                SourceKind::YouTube
            }
            fn patterns(&self) -> Vec<&'static Regex> {
                vec![&*GAMMA_RE]
            }
            async fn resolve(
                &self,
                _client: &Client,
                _caps: &Captures<'_>,
                _cache: &MediaCache,
            ) -> Result<Resolution, MediaError> {
                Err(MediaError::Defect("boom".into()))
            }
        }

        let reg = registry(vec![
            Arc::new(DefectiveAdapter),
            Arc::new(FixedAdapter {
                kind: SourceKind::TikTok,
                pattern: &*ALPHA_RE,
            }),
        ]);
        let client = Client::new();

        // First input hits the defective adapter, second still resolves.
        let out = reg
            .parse(&client, &["gamma.test/1", "alpha.test/2"])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), SourceKind::TikTok);
    }
}
