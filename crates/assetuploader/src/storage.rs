//! Object storage seam.
//!
//! The asset manager only needs signed URLs, object tags and a server-side
//! copy. [`MemoryStorage`] provides them in-process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::AssetError;

/// Format of the signing date carried in signed URLs and marker tags.
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A signed URL together with the parameters it was signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub signed_at: DateTime<Utc>,
    pub expires_in: Duration,
}

/// Object tags, as key/value pairs.
pub type Tags = HashMap<String, String>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Sign a URL the client can upload `key` to.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<PresignedUrl, AssetError>;

    /// Sign a URL the client can download `key` from.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<PresignedUrl, AssetError>;

    /// Write an empty object carrying `tags`, replacing any existing one.
    async fn put_object(&self, bucket: &str, key: &str, tags: Tags) -> Result<(), AssetError>;

    /// Tags of an existing object.
    async fn get_tags(&self, bucket: &str, key: &str) -> Result<Tags, AssetError>;

    /// Copy `from` to `to` within a bucket, replacing the tags of the copy.
    async fn copy_object(
        &self,
        bucket: &str,
        from: &str,
        to: &str,
        tags: Tags,
    ) -> Result<(), AssetError>;

    /// Whether the bucket exists and is reachable.
    async fn bucket_exists(&self, bucket: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
struct StoredObject {
    body: Vec<u8>,
    tags: Tags,
}

/// In-memory object storage.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, HashMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket. Existing buckets are left untouched.
    pub async fn create_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object without tags, as a client following a signed upload
    /// URL would.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), AssetError> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                tags: Tags::new(),
            },
        );
        Ok(())
    }

    /// Body of a stored object.
    pub async fn body(&self, bucket: &str, key: &str) -> Result<Vec<u8>, AssetError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| object_not_found(key))
    }

    fn sign(bucket: &str, key: &str, expires: Duration) -> PresignedUrl {
        let signed_at = Utc::now();
        let url = format!(
            "memory://{}/{}?X-Amz-Date={}&X-Amz-Expires={}",
            bucket,
            key,
            signed_at.format(AMZ_DATE_FORMAT),
            expires.as_secs()
        );
        PresignedUrl {
            url,
            signed_at,
            expires_in: expires,
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<PresignedUrl, AssetError> {
        Ok(Self::sign(bucket, key, expires))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<PresignedUrl, AssetError> {
        Ok(Self::sign(bucket, key, expires))
    }

    async fn put_object(&self, bucket: &str, key: &str, tags: Tags) -> Result<(), AssetError> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        debug!(bucket, key, "putting object");
        objects.insert(
            key.to_string(),
            StoredObject {
                body: Vec::new(),
                tags,
            },
        );
        Ok(())
    }

    async fn get_tags(&self, bucket: &str, key: &str) -> Result<Tags, AssetError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?
            .get(key)
            .map(|object| object.tags.clone())
            .ok_or_else(|| object_not_found(key))
    }

    async fn copy_object(
        &self,
        bucket: &str,
        from: &str,
        to: &str,
        tags: Tags,
    ) -> Result<(), AssetError> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let body = objects
            .get(from)
            .map(|object| object.body.clone())
            .ok_or_else(|| object_not_found(from))?;
        debug!(bucket, from, to, "copying object");
        objects.insert(to.to_string(), StoredObject { body, tags });
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }
}

fn bucket_not_found(bucket: &str) -> AssetError {
    AssetError::NotFound(format!("bucket {} is not found", bucket))
}

fn object_not_found(key: &str) -> AssetError {
    AssetError::NotFound(format!("object {} is not found", key))
}
