//! Media resolution pipeline.
//!
//! Turns arbitrary message text into zero or more normalized media
//! descriptors: adapters recognize service URLs through regex patterns,
//! the registry dispatches each URL occurrence to exactly one adapter,
//! and a write-through cache short-circuits repeat resolutions.

/// Per-service backend adapters and the adapter contract.
pub mod adapters;
/// Write-through media cache and its persistent store.
pub mod cache;
/// Canonical URL normalization rules.
pub mod canon;
/// Caption composition from descriptor metadata and display preferences.
pub mod caption;
/// Media descriptor model.
pub mod model;
/// Pattern dispatch across registered adapters.
pub mod registry;

use thiserror::Error;

pub use adapters::MediaAdapter;
pub use cache::{CacheError, CacheRecord, CacheStore, MediaCache};
pub use model::{MediaDescriptor, SourceKind};
pub use registry::{ParserRegistry, Resolution};

/// Errors that can escape the media pipeline.
///
/// Unresolvable posts and transient vendor failures never surface here;
/// adapters map those to empty results. A `MediaError` out of an adapter
/// means a programming defect or a broken invariant.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Error during network communication
    #[error("network error: {0}")]
    Network(String),
    /// Vendor response did not have the expected shape
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
    /// Broken adapter invariant, e.g. a pattern without its declared capture group
    #[error("adapter defect: {0}")]
    Defect(String),
    /// Error from the cache layer
    #[error(transparent)]
    Cache(#[from] CacheError),
}
