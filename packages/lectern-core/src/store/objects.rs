//! Object storage seam and the bucket-service implementation.
//!
//! Buckets are a typed key-value service: upload with upsert semantics,
//! delete tolerating already-gone objects, public URLs for the
//! permanent and frames buckets, short-lived signed URLs for the
//! expiring media bucket.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{LecternError, LecternResult};

/// Minimum validity of a signed media URL.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Typed object-store seam.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads an object (upsert) and returns its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Bytes,
        content_type: &str,
    ) -> LecternResult<String>;

    /// Deletes an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, path: &str) -> LecternResult<()>;

    /// Downloads an object's content (reprocess paths re-read stored
    /// media).
    async fn download(&self, bucket: &str, path: &str) -> LecternResult<Bytes>;

    /// Returns the public URL of an object.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Creates a short-lived signed URL for a private object.
    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> LecternResult<String>;
}

/// Bucket service implementation speaking the Supabase storage API.
pub struct BucketStorage {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl BucketStorage {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> LecternResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for BucketStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Bytes,
        content_type: &str,
    ) -> LecternResult<String> {
        let url = format!("{}/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LecternError::Storage(format!(
                "upload of {}/{} failed with {}: {}",
                bucket, path, status, detail
            )));
        }
        Ok(self.public_url(bucket, path))
    }

    async fn delete(&self, bucket: &str, path: &str) -> LecternResult<()> {
        let url = format!("{}/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.service_key)
            .send()
            .await?;

        // 404 means the object is already gone; the database clear must
        // still proceed.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            return Err(LecternError::Storage(format!(
                "delete of {}/{} failed with {}",
                bucket, path, status
            )));
        }
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> LecternResult<Bytes> {
        let url = format!("{}/object/authenticated/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.service_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LecternError::Storage(format!(
                "download of {}/{} failed with {}",
                bucket, path, status
            )));
        }
        Ok(response.bytes().await?)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> LecternResult<String> {
        let url = format!("{}/object/sign/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "expiresIn": ttl.as_secs() }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LecternError::Storage(format!(
                "signing {}/{} failed with {}",
                bucket, path, status
            )));
        }
        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| LecternError::Storage(format!("sign response: {}", e)))?;
        Ok(format!("{}{}", self.base_url, signed.signed_url))
    }
}

/// In-memory bucket double for tests.
#[derive(Default)]
pub struct InMemoryObjectStorage {
    pub objects: Mutex<HashMap<(String, String), Bytes>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    /// Paths whose delete should fail (storage-outage simulation).
    pub failing_deletes: Mutex<Vec<String>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&(bucket.to_string(), path.to_string()))
    }
}

#[async_trait::async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Bytes,
        _content_type: &str,
    ) -> LecternResult<String> {
        self.objects
            .lock()
            .insert((bucket.to_string(), path.to_string()), content);
        Ok(self.public_url(bucket, path))
    }

    async fn delete(&self, bucket: &str, path: &str) -> LecternResult<()> {
        if self.failing_deletes.lock().iter().any(|p| p == path) {
            return Err(LecternError::Storage(format!("simulated failure for {}", path)));
        }
        self.objects
            .lock()
            .remove(&(bucket.to_string(), path.to_string()));
        self.deletes
            .lock()
            .push((bucket.to_string(), path.to_string()));
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> LecternResult<Bytes> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| LecternError::Storage(format!("missing object {}/{}", bucket, path)))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> LecternResult<String> {
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            path,
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = InMemoryObjectStorage::new();
        storage
            .upload("frames", "article_1/frame_30.jpg", Bytes::from_static(b"jpg"), "image/jpeg")
            .await
            .unwrap();
        assert!(storage.contains("frames", "article_1/frame_30.jpg"));

        storage.delete("frames", "article_1/frame_30.jpg").await.unwrap();
        assert!(!storage.contains("frames", "article_1/frame_30.jpg"));
    }

    #[test]
    fn bucket_public_url_shape() {
        let storage =
            BucketStorage::new("https://store.example.com/storage/v1", "key", SIGNED_URL_TTL)
                .unwrap();
        assert_eq!(
            storage.public_url("uploaded-media", "user_1/17_file.mp4"),
            "https://store.example.com/storage/v1/object/public/uploaded-media/user_1/17_file.mp4"
        );
    }
}
