use sqlx::PgPool;
use uuid::Uuid;

use super::team_member_pattern;
use crate::models::{ChangeHistory, ChangeType, HistoryStat};

pub struct NewChange<'a> {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub change_type: ChangeType,
    pub field: Option<&'a str>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub description: Option<String>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub async fn insert(pool: &PgPool, change: &NewChange<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO change_history
            (project_id, user_id, change_type, field, old_value, new_value, description, ip_address, user_agent)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(change.project_id)
    .bind(change.user_id)
    .bind(change.change_type)
    .bind(change.field)
    .bind(&change.old_value)
    .bind(&change.new_value)
    .bind(change.description.as_deref())
    .bind(change.ip_address)
    .bind(change.user_agent)
    .execute(pool)
    .await?;
    Ok(())
}

/// Document entries stay hidden from readers without edit rights unless the
/// document is public. Expects `h` (change_history) and `p` (projects) aliases;
/// `viewer` is the placeholder bound to the reader's id.
fn document_visibility(viewer: &str) -> String {
    format!(
        "(h.change_type NOT IN ('document_upload', 'document_update', 'document_delete')
          OR p.owner_id = {viewer}
          OR p.team @> jsonb_build_array(jsonb_build_object('user_id', {viewer}::text, 'role', 'admin'))
          OR p.team @> jsonb_build_array(jsonb_build_object('user_id', {viewer}::text, 'role', 'editor'))
          OR EXISTS (
              SELECT 1 FROM documents d
              WHERE d.is_public
                AND d.id::text = COALESCE(h.new_value->>'document_id', h.old_value->>'document_id')
          ))"
    )
}

pub async fn list_for_project(
    pool: &PgPool,
    project_id: Uuid,
    change_type: Option<ChangeType>,
    viewer: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<ChangeHistory>, sqlx::Error> {
    sqlx::query_as::<_, ChangeHistory>(&format!(
        "SELECT h.* FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE h.project_id = $1 AND ($2::text IS NULL OR h.change_type = $2)
           AND {}
         ORDER BY h.created_at DESC, h.id DESC LIMIT $4 OFFSET $5",
        document_visibility("$3"),
    ))
    .bind(project_id)
    .bind(change_type)
    .bind(viewer)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_for_project(
    pool: &PgPool,
    project_id: Uuid,
    change_type: Option<ChangeType>,
    viewer: Uuid,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE h.project_id = $1 AND ($2::text IS NULL OR h.change_type = $2)
           AND {}",
        document_visibility("$3"),
    ))
    .bind(project_id)
    .bind(change_type)
    .bind(viewer)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn stats_for_project(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<HistoryStat>, sqlx::Error> {
    sqlx::query_as::<_, HistoryStat>(
        "SELECT change_type, COUNT(*) AS count, MAX(created_at) AS last_change_at
         FROM change_history WHERE project_id = $1
         GROUP BY change_type ORDER BY count DESC, change_type",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}

// Live projects the user owns or is on the team of; $1 user, $2 team pattern.
const MEMBER_PROJECTS: &str = "NOT p.is_deleted AND (p.owner_id = $1 OR p.team @> $2)";

pub async fn list_for_member(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<ChangeHistory>, sqlx::Error> {
    sqlx::query_as::<_, ChangeHistory>(&format!(
        "SELECT h.* FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE {MEMBER_PROJECTS} AND {}
         ORDER BY h.created_at DESC, h.id DESC LIMIT $3 OFFSET $4",
        document_visibility("$1"),
    ))
    .bind(user_id)
    .bind(team_member_pattern(user_id))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_for_member(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE {MEMBER_PROJECTS} AND {}",
        document_visibility("$1"),
    ))
    .bind(user_id)
    .bind(team_member_pattern(user_id))
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Changes authored by `user_id` as seen by `viewer`; `public_only` restricts
/// to public, live projects.
pub async fn list_by_author(
    pool: &PgPool,
    user_id: Uuid,
    viewer: Uuid,
    public_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<ChangeHistory>, sqlx::Error> {
    sqlx::query_as::<_, ChangeHistory>(&format!(
        "SELECT h.* FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE h.user_id = $1 AND (NOT $3 OR (p.is_public AND NOT p.is_deleted))
           AND {}
         ORDER BY h.created_at DESC, h.id DESC LIMIT $4 OFFSET $5",
        document_visibility("$2"),
    ))
    .bind(user_id)
    .bind(viewer)
    .bind(public_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_by_author(
    pool: &PgPool,
    user_id: Uuid,
    viewer: Uuid,
    public_only: bool,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM change_history h
         JOIN projects p ON p.id = h.project_id
         WHERE h.user_id = $1 AND (NOT $3 OR (p.is_public AND NOT p.is_deleted))
           AND {}",
        document_visibility("$2"),
    ))
    .bind(user_id)
    .bind(viewer)
    .bind(public_only)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}
