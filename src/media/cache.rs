//! Write-through media cache.
//!
//! Resolved descriptors are stored per canonical URL: a `moka` hot tier
//! serves repeat lookups inside the process, and an optional persistent
//! store (Cloudflare R2 / AWS S3) survives restarts. The cache is
//! advisory: store failures degrade to a miss, same-key write races are
//! tolerated, and nothing here is correctness-critical.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::canon;
use super::model::MediaDescriptor;
use crate::config::Settings;

/// Errors that can occur in the cache store.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Error retrieving an object from S3
    #[error("S3 get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting an object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("configuration error: {0}")]
    Config(String),
}

/// One stored cache entry: every descriptor ever resolved for a
/// canonical URL, with bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    /// When the key was first stored
    pub created_at: DateTime<Utc>,
    /// When the key was last appended to
    pub updated_at: DateTime<Utc>,
    /// Stored descriptors, in save order
    pub content: Vec<MediaDescriptor>,
}

/// Persistent backend of the media cache.
///
/// Any durable map from canonical URL to a record of descriptors will
/// do; implementations must be safe for concurrent use across keys,
/// while same-key races may resolve last-write-wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the record for a canonical URL, if present.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;
    /// Store the record for a canonical URL, replacing any previous one.
    async fn put(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError>;
    /// Remove the record for a canonical URL.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// R2/S3-backed cache store holding one JSON object per canonical URL.
pub struct R2CacheStore {
    client: Client,
    bucket: String,
}

impl R2CacheStore {
    /// Create a store from the R2 settings.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if any R2 setting is missing.
    pub async fn new(settings: &Settings) -> Result<Self, CacheError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| CacheError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| CacheError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| CacheError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| CacheError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "media-cache");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    /// Object key for a canonical URL.
    ///
    /// URLs are hashed so keys stay flat and never exceed S3 key limits.
    fn object_key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("media-cache/{digest:x}.json")
    }
}

#[async_trait]
impl CacheStore for R2CacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
                    .into_bytes();
                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(CacheError::S3Get(Box::new(e))),
        }
    }

    async fn put(&self, key: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let body = serde_json::to_vec(record)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| CacheError::S3Put(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
            .map_err(|e| CacheError::S3Put(e.to_string()))?;
        Ok(())
    }
}

/// Lookup/write-through cache keyed by canonical URL.
///
/// Keys are normalized through [`canon::canonicalize`] on every
/// operation, so scheme, mirror-domain and query-string variants of one
/// post collapse to a single entry.
#[derive(Clone)]
pub struct MediaCache {
    store: Option<Arc<dyn CacheStore>>,
    hot: Cache<String, Arc<Vec<MediaDescriptor>>>,
}

impl MediaCache {
    /// Create a cache over an optional persistent store.
    ///
    /// Without a store the hot tier still short-circuits repeat
    /// resolutions within the process lifetime.
    #[must_use]
    pub fn new(store: Option<Arc<dyn CacheStore>>, ttl: Duration, max_entries: u64) -> Self {
        let hot = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { store, hot }
    }

    /// Look up previously resolved descriptors for a URL.
    ///
    /// Returns `Some` on a hit, the fast-exit signal that lets an
    /// adapter skip its network path. Store failures are logged and
    /// degrade to a miss.
    pub async fn find(&self, original_url: &str) -> Option<Vec<MediaDescriptor>> {
        let key = canon::canonicalize(original_url);

        if let Some(hit) = self.hot.get(&key).await {
            debug!("Hot cache hit for {}", key);
            return Some(hit.as_ref().clone());
        }

        let store = self.store.as_ref()?;
        match store.get(&key).await {
            Ok(Some(record)) => {
                debug!("Store cache hit for {}", key);
                self.hot
                    .insert(key, Arc::new(record.content.clone()))
                    .await;
                Some(record.content)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Persist descriptors under their shared canonical URL.
    ///
    /// New descriptors are appended to any previously stored content for
    /// the same key. Undeliverable descriptors are dropped; the
    /// deliverable ones are returned for chaining into an adapter's
    /// result. Store failures are logged and ignored.
    pub async fn save_group(&self, descriptors: Vec<MediaDescriptor>) -> Vec<MediaDescriptor> {
        let descriptors: Vec<MediaDescriptor> = descriptors
            .into_iter()
            .filter(MediaDescriptor::is_deliverable)
            .collect();
        let Some(first) = descriptors.first() else {
            return descriptors;
        };
        let key = canon::canonicalize(first.original_url());

        let (mut content, created_at) = match &self.store {
            Some(store) => match store.get(&key).await {
                Ok(Some(record)) => (record.content, record.created_at),
                Ok(None) => (Vec::new(), Utc::now()),
                Err(e) => {
                    warn!("Cache read-before-save failed for {}: {}", key, e);
                    (Vec::new(), Utc::now())
                }
            },
            None => (
                self.hot
                    .get(&key)
                    .await
                    .map(|v| v.as_ref().clone())
                    .unwrap_or_default(),
                Utc::now(),
            ),
        };
        content.extend(descriptors.iter().cloned());

        self.hot
            .insert(key.clone(), Arc::new(content.clone()))
            .await;

        if let Some(store) = &self.store {
            let record = CacheRecord {
                created_at,
                updated_at: Utc::now(),
                content,
            };
            if let Err(e) = store.put(&key, &record).await {
                warn!("Cache save failed for {}: {}", key, e);
            }
        }

        descriptors
    }

    /// Persist a single descriptor; see [`MediaCache::save_group`].
    pub async fn save(&self, descriptor: MediaDescriptor) -> Vec<MediaDescriptor> {
        self.save_group(vec![descriptor]).await
    }

    /// Invalidate a stored entry.
    pub async fn delete(&self, original_url: &str) {
        let key = canon::canonicalize(original_url);
        self.hot.invalidate(&key).await;
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&key).await {
                warn!("Cache delete failed for {}: {}", key, e);
            }
        }
    }

    /// Number of entries in the hot tier, for `/stats`.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.hot.entry_count()
    }
}

/// Build the media cache from settings, attaching the R2 store when it
/// is fully configured.
pub async fn init_media_cache(settings: &Settings) -> MediaCache {
    let store: Option<Arc<dyn CacheStore>> = if settings.r2_configured() {
        match R2CacheStore::new(settings).await {
            Ok(store) => {
                info!("R2 media cache store initialized.");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("R2 media cache store unavailable, running hot-only: {}", e);
                None
            }
        }
    } else {
        debug!("R2 media cache store not configured, running hot-only.");
        None
    };

    MediaCache::new(
        store,
        Duration::from_secs(settings.cache_ttl_secs),
        settings.cache_max_entries,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::model::{MediaMeta, SourceKind, Video};

    fn video(original: &str) -> MediaDescriptor {
        MediaDescriptor::Video(Video::new(
            MediaMeta::new(SourceKind::TikTok, original.to_string()),
            "https://cdn/a.mp4".to_string(),
        ))
    }

    fn hot_only() -> MediaCache {
        MediaCache::new(None, Duration::from_secs(60), 100)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = hot_only();
        let d = video("https://svc/post/1");
        cache.save(d.clone()).await;

        let found = cache.find("https://svc/post/1").await.expect("hit");
        assert_eq!(found, vec![d]);
    }

    #[tokio::test]
    async fn test_keys_are_canonicalized() {
        let cache = hot_only();
        cache.save(video("https://www.svc.com/post/1")).await;

        assert!(cache
            .find("http://svc.com/post/1/?utm_source=share")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_save_appends_to_existing_content() {
        let cache = hot_only();
        cache.save(video("https://svc/post/1")).await;
        cache.save(video("https://svc/post/1")).await;

        let found = cache.find("https://svc/post/1").await.expect("hit");
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_undeliverable_descriptors_are_dropped() {
        let cache = hot_only();
        let empty = MediaDescriptor::Video(Video::new(
            MediaMeta::new(SourceKind::TikTok, "https://svc/post/9".to_string()),
            String::new(),
        ));
        let saved = cache.save(empty).await;
        assert!(saved.is_empty());
        assert!(cache.find("https://svc/post/9").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let cache = hot_only();
        cache.save(video("https://svc/post/1")).await;
        cache.delete("https://svc/post/1").await;
        assert!(cache.find("https://svc/post/1").await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_miss() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .withf(|key| key == "https://svc/post/1")
            .returning(|_| Err(CacheError::Config("down".into())));
        let cache = MediaCache::new(
            Some(Arc::new(store)),
            Duration::from_secs(60),
            100,
        );

        assert!(cache.find("https://svc/post/1").await.is_none());
    }

    #[tokio::test]
    async fn test_store_hit_populates_hot_tier() {
        let mut store = MockCacheStore::new();
        let record = CacheRecord {
            created_at: Utc::now(),
            updated_at: Utc::now(),
            content: vec![video("https://svc/post/1")],
        };
        store
            .expect_get()
            .times(1)
            .returning(move |_| Ok(Some(record.clone())));
        let cache = MediaCache::new(
            Some(Arc::new(store)),
            Duration::from_secs(60),
            100,
        );

        assert!(cache.find("https://svc/post/1").await.is_some());
        // Second lookup is served by the hot tier; the mock allows only
        // one store get.
        assert!(cache.find("https://svc/post/1").await.is_some());
    }
}
