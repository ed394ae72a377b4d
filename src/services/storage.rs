use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

/// Source images for scans, looked up by scan id and image index.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// `Ok(None)` when the scan has no stored image at that index.
    async fn fetch(&self, scan_id: &str, image_index: u32) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Object key of a scan image.
pub fn image_key(scan_id: &str, image_index: u32) -> String {
    format!("scans/{}/images/{}", scan_id, image_index)
}

/// Scan image store on Cloudflare R2 (S3-compatible).
pub struct R2ImageStore {
    bucket: Box<Bucket>,
}

impl R2ImageStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Store a scan image.
    pub async fn upload(
        &self,
        scan_id: &str,
        image_index: u32,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(image_key(scan_id, image_index), data, content_type)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, scan_id: &str, image_index: u32) -> Result<(), StorageError> {
        self.bucket.delete_object(image_key(scan_id, image_index)).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageSource for R2ImageStore {
    async fn fetch(&self, scan_id: &str, image_index: u32) -> Result<Option<Vec<u8>>, StorageError> {
        match self.bucket.get_object(image_key(scan_id, image_index)).await {
            Ok(response) => match response.status_code() {
                200..=299 => Ok(Some(response.bytes().to_vec())),
                404 => Ok(None),
                code => Err(StorageError::Status(code)),
            },
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(StorageError::S3(e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Object store returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
