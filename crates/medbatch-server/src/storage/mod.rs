//! Blob storage adapter
//!
//! Thin wrapper over an S3-compatible client. Artifacts are addressed by a
//! full location of the form `s3://{bucket}/{key}`; the adapter carries no
//! pipeline policy of its own.

use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

pub mod config;

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> Result<Self> {
        debug!("Initializing storage for bucket: {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "medbatch-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    /// Upload artifact bytes under `key` and return the full location.
    ///
    /// The key is deterministic per batch, so a retried upload rewrites the
    /// same object with the same bytes.
    #[instrument(skip(self, data))]
    pub async fn put_artifact(&self, key: &str, data: Vec<u8>) -> Result<String> {
        let size = data.len();

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/csv")
            .body(ByteStream::from(data))
            .send()
            .await
            .context("Failed to upload artifact to S3")?;

        info!("Uploaded artifact to s3://{}/{}", self.bucket, key);

        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    /// Download the artifact at a full `s3://bucket/key` location.
    #[instrument(skip(self))]
    pub async fn get_artifact(&self, location: &str) -> Result<Vec<u8>> {
        let (bucket, key) = parse_location(location)?;

        debug!("Downloading from s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to download artifact from {}", location))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from {}", data.len(), location);

        Ok(data)
    }
}

/// Split a full `s3://bucket/key` location into bucket and key.
pub fn parse_location(location: &str) -> Result<(String, String)> {
    let rest = location
        .strip_prefix("s3://")
        .ok_or_else(|| anyhow!("artifact location '{}' is not an s3:// URL", location))?;

    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| anyhow!("artifact location '{}' has no object key", location))?;

    if bucket.is_empty() || key.is_empty() {
        return Err(anyhow!("artifact location '{}' is incomplete", location));
    }

    Ok((bucket.to_string(), key.to_string()))
}
