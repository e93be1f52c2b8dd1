use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Document, DocumentType};

pub struct NewDocument<'a> {
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub doc_type: DocumentType,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub size_bytes: i64,
    pub storage_key: &'a str,
    pub is_public: bool,
}

/// Insert the next version of a (project, type) pair and retire the previous active one.
///
/// Concurrent uploads of the same pair are serialized by a transaction-scoped advisory lock.
pub async fn insert_version(pool: &PgPool, new: &NewDocument<'_>) -> Result<Document, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text || ':' || $2))")
        .bind(new.project_id)
        .bind(new.doc_type)
        .execute(&mut *tx)
        .await?;

    let version: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM documents
         WHERE project_id = $1 AND doc_type = $2",
    )
    .bind(new.project_id)
    .bind(new.doc_type)
    .fetch_one(&mut *tx)
    .await?;

    if new.doc_type.single_active() {
        sqlx::query(
            "UPDATE documents SET is_active = false, updated_at = now()
             WHERE project_id = $1 AND doc_type = $2 AND is_active",
        )
        .bind(new.project_id)
        .bind(new.doc_type)
        .execute(&mut *tx)
        .await?;
    }

    let document = sqlx::query_as::<_, Document>(
        "INSERT INTO documents
            (project_id, uploaded_by, doc_type, title, description, file_name,
             mime_type, size_bytes, storage_key, version, is_public)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(new.uploaded_by)
    .bind(new.doc_type)
    .bind(new.title)
    .bind(new.description)
    .bind(new.file_name)
    .bind(new.mime_type)
    .bind(new.size_bytes)
    .bind(new.storage_key)
    .bind(version)
    .bind(new.is_public)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(document)
}

pub async fn find_by_id(
    pool: &PgPool,
    project_id: Uuid,
    id: Uuid,
) -> Result<Option<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE id = $1 AND project_id = $2 AND NOT is_deleted",
    )
    .bind(id)
    .bind(project_id)
    .fetch_optional(pool)
    .await
}

pub struct ListParams {
    pub project_id: Uuid,
    pub doc_type: Option<DocumentType>,
    pub include_inactive: bool,
    pub public_only: bool,
}

pub async fn list(pool: &PgPool, params: &ListParams) -> Result<Vec<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(
        "SELECT * FROM documents
         WHERE project_id = $1 AND NOT is_deleted
           AND ($2::text IS NULL OR doc_type = $2)
           AND ($3 OR is_active)
           AND (NOT $4 OR is_public)
         ORDER BY doc_type, version DESC",
    )
    .bind(params.project_id)
    .bind(params.doc_type)
    .bind(params.include_inactive)
    .bind(params.public_only)
    .fetch_all(pool)
    .await
}

pub async fn versions(
    pool: &PgPool,
    project_id: Uuid,
    doc_type: DocumentType,
    public_only: bool,
) -> Result<Vec<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(
        "SELECT * FROM documents
         WHERE project_id = $1 AND doc_type = $2 AND NOT is_deleted AND (NOT $3 OR is_public)
         ORDER BY version DESC",
    )
    .bind(project_id)
    .bind(doc_type)
    .bind(public_only)
    .fetch_all(pool)
    .await
}

pub async fn update_metadata(
    pool: &PgPool,
    id: Uuid,
    title: &str,
    description: Option<&str>,
    is_public: bool,
) -> Result<Document, sqlx::Error> {
    sqlx::query_as::<_, Document>(
        "UPDATE documents SET title = $2, description = $3, is_public = $4, updated_at = now()
         WHERE id = $1 AND NOT is_deleted RETURNING *",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(is_public)
    .fetch_one(pool)
    .await
}

pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<Option<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(
        "UPDATE documents SET is_deleted = true, is_active = false, deleted_at = now(), updated_at = now()
         WHERE id = $1 AND NOT is_deleted RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
