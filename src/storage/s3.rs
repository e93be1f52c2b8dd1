use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::{debug, error, info};

use super::{ObjectStorage, StorageError, StoredObject};
use crate::config::S3Config;

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from the standard AWS credential chain.
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("S3 storage initialized for bucket {}", config.bucket);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        debug!(
            "Writing to S3 bucket {} with key: {}, size: {} bytes",
            self.bucket,
            key,
            body.len()
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                error!("S3 PUT failed - Bucket: {}, Key: {}, Error: {:?}", self.bucket, key, e);
                StorageError::Upload {
                    key: key.to_string(),
                    message: e.to_string(),
                }
            })?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(StorageError::Download {
                    key: key.to_string(),
                    message: service_error.to_string(),
                });
            }
        };

        let content_type = output.content_type().map(str::to_string);
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes();

        Ok(StoredObject { body, content_type })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!("Deleting from S3 bucket {} with key: {}", self.bucket, key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}
