//! Remote document store abstraction.
//!
//! Uploaded files live in external object storage, addressed by bucket and a
//! per-user, timestamp-qualified path (`{user_id}/{millis}.{ext}`) so two
//! uploads never collide. The workflow talks to it through a trait; tests
//! and local runs use the in-memory implementation.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::{CoreError, Result};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    /// Stable URL for a public bucket object. No network round trip.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Time-boxed URL for a private bucket object.
    async fn signed_url(&self, bucket: &str, path: &str, ttl_seconds: u64) -> Result<String>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;
}

/// Build the canonical storage path for a user's upload.
pub fn object_path(user_id: &str, file_name: &str) -> String {
    let ext = file_name.rsplit('.').next().unwrap_or("bin");
    format!("{}/{}.{}", user_id, Utc::now().timestamp_millis(), ext)
}

/// Extract the `{user_id}/{file}` object path back out of a store URL, for
/// deletion and signed-URL resolution.
pub fn path_from_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/{}/", bucket);
    url.find(&marker)
        .map(|idx| url[idx + marker.len()..].to_string())
        .filter(|p| !p.is_empty())
}

/// In-memory document store backed by a DashMap, keyed `bucket/path`.
pub struct InMemoryDocumentStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
        }
    }

    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        self.objects.insert(Self::key(bucket, path), bytes);
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&Self::key(bucket, path))
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::NotFound(format!("object {}/{}", bucket, path)))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }

    async fn signed_url(&self, bucket: &str, path: &str, _ttl_seconds: u64) -> Result<String> {
        if self.objects.contains_key(&Self::key(bucket, path)) {
            Ok(format!("memory://{}/{}?signed=1", bucket, path))
        } else {
            Err(CoreError::NotFound(format!("object {}/{}", bucket, path)))
        }
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            self.objects.remove(&Self::key(bucket, path));
        }
        Ok(())
    }
}

/// Document store speaking the Supabase-style storage REST API.
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpDocumentStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoreError::Storage(format!(
                "upload failed: {}",
                response.status()
            )));
        }
        info!(bucket = %bucket, path = %path, "uploaded object");
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoreError::Storage(format!(
                "download failed: {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    async fn signed_url(&self, bucket: &str, path: &str, ttl_seconds: u64) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url, bucket, path
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "expiresIn": ttl_seconds }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoreError::Storage(format!(
                "signing failed: {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let signed = body["signedURL"]
            .as_str()
            .ok_or_else(|| CoreError::Storage("signing response missing signedURL".to_string()))?;
        Ok(format!("{}/storage/v1{}", self.base_url, signed))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CoreError::Storage(format!(
                "delete failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip_and_remove() {
        let store = InMemoryDocumentStore::new();
        store
            .upload("docs", "u1/123.pdf", b"hello".to_vec(), "application/pdf")
            .await
            .unwrap();

        let bytes = store.download("docs", "u1/123.pdf").await.unwrap();
        assert_eq!(bytes, b"hello");

        store
            .remove("docs", &["u1/123.pdf".to_string()])
            .await
            .unwrap();
        assert!(store.download("docs", "u1/123.pdf").await.is_err());
    }

    #[test]
    fn object_path_is_user_scoped_and_keeps_extension() {
        let path = object_path("user-9", "scan.pdf");
        assert!(path.starts_with("user-9/"));
        assert!(path.ends_with(".pdf"));
    }

    #[test]
    fn path_from_url_recovers_object_path() {
        let url = "https://x.example.com/storage/v1/object/public/documents/u1/17.pdf";
        assert_eq!(
            path_from_url(url, "documents"),
            Some("u1/17.pdf".to_string())
        );
        assert_eq!(path_from_url("https://elsewhere/", "documents"), None);
    }
}
