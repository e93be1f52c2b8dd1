use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub doc_type: DocumentType,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub version: i32,
    pub is_active: bool,
    pub is_public: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Whitepaper,
    Audit,
    Legal,
    Tokenomics,
    PitchDeck,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::Whitepaper,
        DocumentType::Audit,
        DocumentType::Legal,
        DocumentType::Tokenomics,
        DocumentType::PitchDeck,
        DocumentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Whitepaper => "whitepaper",
            DocumentType::Audit => "audit",
            DocumentType::Legal => "legal",
            DocumentType::Tokenomics => "tokenomics",
            DocumentType::PitchDeck => "pitch_deck",
            DocumentType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// `other` is a bucket for unrelated files; every other type keeps a single current version.
    pub fn single_active(self) -> bool {
        self != DocumentType::Other
    }
}

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "image/jpeg",
    "image/png",
    "image/gif",
];

pub fn is_allowed_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    ALLOWED_MIME_TYPES.contains(&essence.as_str())
}
