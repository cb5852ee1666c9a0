use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Blob storage holding generated artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the object at an `s3://bucket/key` location.
    async fn fetch_object(&self, location: &str) -> Result<Vec<u8>, StorageError>;

    /// Upload bytes under `key` in the artifact bucket, returning their location.
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Split an `s3://bucket/key` location into bucket and key.
pub fn parse_location(location: &str) -> Result<(&str, &str), StorageError> {
    let rest = location
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::Location(location.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(StorageError::Location(location.to_string())),
    }
}

/// Client for S3-compatible object storage.
pub struct S3ObjectStore {
    region: Region,
    credentials: Credentials,
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            region,
            credentials,
            bucket,
        })
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }

    /// Bucket handle for a location, reusing the artifact bucket when it matches.
    fn bucket_for(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        if name == self.bucket.name() {
            return Ok(self.bucket.clone());
        }
        Ok(
            Bucket::new(name, self.region.clone(), self.credentials.clone())
                .map_err(|e| StorageError::Config(e.to_string()))?
                .with_path_style(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch_object(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let (bucket_name, key) = parse_location(location)?;
        let bucket = self.bucket_for(bucket_name)?;
        let response = bucket.get_object(key).await.map_err(StorageError::S3)?;
        if response.status_code() != 200 {
            return Err(StorageError::NotFound(location.to_string()));
        }
        Ok(response.to_vec())
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(format!("s3://{}/{}", self.bucket.name(), key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Invalid storage location: {0}")]
    Location(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let (bucket, key) = parse_location("s3://artifacts/video-jobs/abc/output.mp4").unwrap();
        assert_eq!(bucket, "artifacts");
        assert_eq!(key, "video-jobs/abc/output.mp4");
    }

    #[test]
    fn test_parse_location_rejects_malformed() {
        assert!(parse_location("https://artifacts/output.mp4").is_err());
        assert!(parse_location("s3://artifacts").is_err());
        assert!(parse_location("s3:///key").is_err());
    }
}
