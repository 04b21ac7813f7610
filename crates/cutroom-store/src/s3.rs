//! S3-compatible document store backend.
//!
//! Implements the compare-and-swap contract with HTTP preconditions:
//! `If-None-Match: *` on create and `If-Match: <etag>` on replace, so a
//! stale write fails with 412 and no partial state. Works against AWS S3
//! and S3-compatible stores (R2, MinIO) that honor conditional writes.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{DocumentStore, Version};

/// Configuration for the S3 document store.
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// Endpoint URL; None for AWS S3 proper
    pub endpoint_url: Option<String>,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region ("auto" for R2)
    pub region: String,
}

impl S3StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("OBJECT_STORE_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("OBJECT_STORE_ACCESS_KEY_ID")
                .map_err(|_| StoreError::config("OBJECT_STORE_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("OBJECT_STORE_SECRET_ACCESS_KEY")
                .map_err(|_| StoreError::config("OBJECT_STORE_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("OBJECT_STORE_BUCKET")
                .map_err(|_| StoreError::config("OBJECT_STORE_BUCKET not set"))?,
            region: std::env::var("OBJECT_STORE_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// S3-backed [`DocumentStore`] using ETags as version tokens.
#[derive(Clone)]
pub struct S3DocumentStore {
    client: Client,
    bucket: String,
}

impl S3DocumentStore {
    /// Create a new store from configuration.
    pub async fn new(config: S3StoreConfig) -> StoreResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "cutroom",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: config.bucket_name,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        let config = S3StoreConfig::from_env()?;
        Self::new(config).await
    }

    fn map_status(key: &str, status: Option<u16>, msg: String) -> StoreError {
        match status {
            Some(404) => StoreError::not_found(key),
            // 412: precondition (ETag) no longer matches
            // 409: a concurrent conditional write is in flight
            Some(412) | Some(409) => StoreError::conflict(key),
            _ => StoreError::backend(msg),
        }
    }
}

#[async_trait]
impl DocumentStore for S3DocumentStore {
    async fn get_raw(&self, key: &str) -> StoreResult<(Vec<u8>, Version)> {
        debug!("get {}", key);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                Self::map_status(key, status, e.to_string())
            })?;

        let etag = resp
            .e_tag()
            .map(|t| t.to_string())
            .ok_or_else(|| StoreError::backend(format!("no ETag returned for {key}")))?;

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok((bytes, Version(etag)))
    }

    async fn create_raw(&self, key: &str, bytes: Vec<u8>) -> StoreResult<Version> {
        debug!("create {} ({} bytes)", key, bytes.len());

        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                match status {
                    Some(412) | Some(409) => StoreError::already_exists(key),
                    _ => StoreError::backend(e.to_string()),
                }
            })?;

        resp.e_tag()
            .map(|t| Version(t.to_string()))
            .ok_or_else(|| StoreError::backend(format!("no ETag returned for {key}")))
    }

    async fn put_raw(&self, key: &str, bytes: Vec<u8>, expected: &Version) -> StoreResult<Version> {
        debug!("put {} ({} bytes, if-match {})", key, bytes.len(), expected);

        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_match(expected.as_str())
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                Self::map_status(key, status, e.to_string())
            })?;

        resp.e_tag()
            .map(|t| Version(t.to_string()))
            .ok_or_else(|| StoreError::backend(format!("no ETag returned for {key}")))
    }

    async fn delete_raw(&self, key: &str) -> StoreResult<()> {
        // S3 deletes are idempotent; probe first so absent keys error
        // consistently with the other backends.
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                Self::map_status(key, status, e.to_string())
            })?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::backend(e.to_string()))?;

        debug!("deleted {}", key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StoreError::backend(e.to_string()))?;
            for obj in page.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }
}
