pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("upload failed for {key}: {message}")]
    Upload { key: String, message: String },
    #[error("download failed for {key}: {message}")]
    Download { key: String, message: String },
    #[error("delete failed for {key}: {message}")]
    Delete { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Blob store holding uploaded project files.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn name(&self) -> &str;
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// `projects/{project_id}/documents/{file_name}`
pub fn document_key(project_id: Uuid, file_name: &str) -> String {
    format!("projects/{project_id}/documents/{file_name}")
}

/// Build a collision-free object name that keeps the original extension.
pub fn generate_file_name(original: &str) -> String {
    let ext = std::path::Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "{}-{}{ext}",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}
