//! HTTP client for the object storage service

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::providers::document_store::DocumentStoreProvider;

/// REST client for bucket object storage
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpObjectStore {
    /// Create a new client against a storage endpoint
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Full URL for an object; the key may contain slashes.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/{}/{}", self.endpoint, bucket, key)
    }

    /// Storage URI recorded alongside uploads
    fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("store://{}/{}", bucket, key)
    }

    fn require_token(&self) -> Result<&str> {
        if self.token.is_empty() {
            return Err(Error::Config(
                "object storage credentials not configured".to_string(),
            ));
        }
        Ok(&self.token)
    }
}

#[async_trait]
impl DocumentStoreProvider for HttpObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String> {
        let token = self.require_token()?;

        let content_type = mime_guess::from_path(key)
            .first_or_octet_stream()
            .to_string();

        let response = self
            .client
            .put(self.object_url(bucket, key))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "Object upload failed ({}): {}",
                status, body
            )));
        }

        Ok(self.object_uri(bucket, key))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let token = self.require_token()?;

        let response = self
            .client
            .head(self.object_url(bucket, key))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "Object existence check failed ({})",
                response.status()
            )));
        }

        Ok(true)
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/storage/v1/health", self.endpoint))
            .send()
            .await?;

        Ok(response.status().is_success())
    }

    fn name(&self) -> &str {
        "http-object-store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_keeps_key_slashes() {
        let store = HttpObjectStore::new("http://storage.local:9400/", "tok").unwrap();
        assert_eq!(
            store.object_url("certs", "incoming/C25-0110.pdf"),
            "http://storage.local:9400/storage/v1/certs/incoming/C25-0110.pdf"
        );
        assert_eq!(
            store.object_uri("certs", "incoming/C25-0110.pdf"),
            "store://certs/incoming/C25-0110.pdf"
        );
    }
}
