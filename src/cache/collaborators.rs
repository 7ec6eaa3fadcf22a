//! Contracts for the systems the cache coordinates with but does not own.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::keys::{DomainKey, RestaurantId};
use super::preload::DataSourceError;
use super::store::KvStore;

/// Quota assumed when the durable store does not declare one.
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 10 * 1024 * 1024;

/// Storage usage as reported by the image-cache collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageEstimate {
    pub used: u64,
    pub quota: u64,
}

impl StorageEstimate {
    /// `used / quota`, or 0 for an unbounded estimate.
    pub fn ratio(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        self.used as f64 / self.quota as f64
    }

    pub fn usage_percent(&self) -> f64 {
        self.ratio() * 100.0
    }
}

#[derive(Debug, Error)]
pub enum ImageCacheError {
    #[error("image cache cleanup failed: {0}")]
    Cleanup(String),
    #[error("storage estimate unavailable: {0}")]
    Estimate(String),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Source(#[from] DataSourceError),
    #[error("no refresh source for key `{0}`")]
    Unsupported(String),
}

#[async_trait]
pub trait ImageCache: Send + Sync {
    fn cleanup(&self) -> Result<(), ImageCacheError>;

    async fn storage_estimate(&self) -> Result<StorageEstimate, ImageCacheError>;
}

pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Refetches one aged entry from its source and writes it back.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, key: &DomainKey, restaurant: &RestaurantId)
    -> Result<(), RefreshError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkStatus for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Image cache that holds no images of its own and estimates storage from
/// the durable store.
pub struct StoreImageCache {
    store: Arc<dyn KvStore>,
}

impl StoreImageCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ImageCache for StoreImageCache {
    fn cleanup(&self) -> Result<(), ImageCacheError> {
        debug!("Image cache cleanup: nothing held outside the durable store");
        Ok(())
    }

    async fn storage_estimate(&self) -> Result<StorageEstimate, ImageCacheError> {
        let used = self
            .store
            .usage_bytes()
            .map_err(|error| ImageCacheError::Estimate(error.to_string()))?;
        let quota = self
            .store
            .quota_bytes()
            .unwrap_or(DEFAULT_STORAGE_QUOTA_BYTES);
        Ok(StorageEstimate { used, quota })
    }
}
