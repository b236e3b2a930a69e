//! Utility functions for HTTP client construction, caption trimming and
//! transient-failure retries.

use anyhow::Result;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Initial backoff for scrape retries, in milliseconds.
const SCRAPE_INITIAL_BACKOFF_MS: u64 = 250;
/// Upper bound on a single scrape retry delay, in milliseconds.
const SCRAPE_MAX_BACKOFF_MS: u64 = 1_000;
/// Retry attempts for a transient scrape failure.
const SCRAPE_MAX_RETRIES: usize = 2;

/// Creates an HTTP client configured with the given request timeout.
///
/// One client is created per incoming request and shared across all
/// adapter invocations of that `parse` call; dropping it releases the
/// connection pool deterministically.
#[must_use]
pub fn create_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Truncates a string to at most `max` bytes on a grapheme boundary.
///
/// Telegram rejects captions over its limit; cutting mid-grapheme would
/// corrupt emoji and combining sequences.
#[must_use]
pub fn truncate_caption(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut out = String::with_capacity(max);
    for grapheme in text.graphemes(true) {
        if out.len() + grapheme.len() > max {
            break;
        }
        out.push_str(grapheme);
    }
    out.trim_end().to_string()
}

/// Retry a scraping operation with exponential backoff and jitter.
///
/// Used by adapters as their internal fallback policy for transient
/// vendor-API failures; dispatch itself never retries.
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted.
pub async fn retry_scrape_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(SCRAPE_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(SCRAPE_MAX_BACKOFF_MS))
        .map(jitter)
        .take(SCRAPE_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Scrape operation failed after {} attempts: {}",
            SCRAPE_MAX_RETRIES + 1,
            e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_caption_short_text_untouched() {
        assert_eq!(truncate_caption("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_caption_grapheme_boundary() {
        // Family emoji is a single 25-byte grapheme cluster
        let text = "ab👨‍👩‍👧‍👦cd";
        let truncated = truncate_caption(text, 4);
        assert_eq!(truncated, "ab");
    }

    #[test]
    fn test_truncate_caption_trims_trailing_space() {
        assert_eq!(truncate_caption("hello world", 6), "hello");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let mut attempts = 0;
        let result = retry_scrape_operation(|| {
            attempts += 1;
            let n = attempts;
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.expect("should succeed on retry"), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let mut attempts = 0;
        let result: Result<()> = retry_scrape_operation(|| {
            attempts += 1;
            async { Err(anyhow::anyhow!("permanent")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, SCRAPE_MAX_RETRIES + 1);
    }
}
