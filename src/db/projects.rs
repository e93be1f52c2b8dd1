use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::team_member_pattern;
use crate::models::{
    ChainInfo, EnabledModules, Project, ProjectLinks, ProjectStatus, RoadmapItem, TeamMember,
};

pub struct NewProject<'a> {
    pub owner_id: Uuid,
    pub name: &'a str,
    pub slug: &'a str,
    pub description: &'a str,
    pub logo_url: Option<&'a str>,
    pub category: Option<&'a str>,
    pub tags: &'a [String],
    pub links: &'a ProjectLinks,
    pub blockchain: &'a ChainInfo,
    pub enabled_modules: &'a EnabledModules,
}

pub async fn insert(pool: &PgPool, new: &NewProject<'_>) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "INSERT INTO projects
            (owner_id, name, slug, description, logo_url, category, tags, links, blockchain, enabled_modules)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.name)
    .bind(new.slug)
    .bind(new.description)
    .bind(new.logo_url)
    .bind(new.category)
    .bind(new.tags)
    .bind(Json(new.links))
    .bind(Json(new.blockchain))
    .bind(Json(new.enabled_modules))
    .fetch_one(pool)
    .await
}

/// Deleted projects still hold their slug.
pub async fn slug_exists(pool: &PgPool, slug: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM projects WHERE slug = $1)")
        .bind(slug)
        .fetch_one(pool)
        .await
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE id = $1 AND NOT is_deleted",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_slug(
    pool: &PgPool,
    slug: &str,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE slug = $1 AND NOT is_deleted",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortColumn {
    CreatedAt,
    UpdatedAt,
    Name,
    ViewCount,
}

impl SortColumn {
    pub fn parse(s: &str) -> Self {
        match s {
            "updated_at" => SortColumn::UpdatedAt,
            "name" => SortColumn::Name,
            "view_count" | "views" => SortColumn::ViewCount,
            _ => SortColumn::CreatedAt,
        }
    }

    fn column(self) -> &'static str {
        match self {
            SortColumn::CreatedAt => "created_at",
            SortColumn::UpdatedAt => "updated_at",
            SortColumn::Name => "name",
            SortColumn::ViewCount => "view_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

pub struct ListParams {
    pub viewer: Option<Uuid>,
    pub status: Option<ProjectStatus>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub owner_id: Option<Uuid>,
    /// Only projects the viewer owns or belongs to.
    pub mine: bool,
    /// Also return the viewer's own soft-deleted projects.
    pub include_deleted: bool,
    pub sort_by: SortColumn,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

// $1 status, $2 category, $3 tag, $4 search, $5 owner, $6 viewer,
// $7 viewer team pattern, $8 mine, $9 include_deleted
const LIST_FILTER: &str = "
    ($1::text IS NULL OR status = $1)
    AND ($2::text IS NULL OR category = $2)
    AND ($3::text IS NULL OR $3 = ANY(tags))
    AND ($4::text IS NULL OR name ILIKE $4 ESCAPE '\\' OR description ILIKE $4 ESCAPE '\\')
    AND ($5::uuid IS NULL OR owner_id = $5)
    AND (NOT is_deleted OR ($9 AND owner_id = $6))
    AND (
        CASE WHEN $8 THEN owner_id = $6 OR team @> $7
             ELSE is_public OR owner_id = $6 OR team @> $7
        END
    )";

pub async fn list(pool: &PgPool, params: &ListParams) -> Result<Vec<Project>, sqlx::Error> {
    let sql = format!(
        "SELECT * FROM projects WHERE {LIST_FILTER}
         ORDER BY {} {}, id LIMIT $10 OFFSET $11",
        params.sort_by.column(),
        params.sort_order.sql(),
    );

    bind_filter(sqlx::query_as::<_, Project>(&sql), params)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(pool)
        .await
}

pub async fn count(pool: &PgPool, params: &ListParams) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM projects WHERE {LIST_FILTER}");
    let row: (i64,) = bind_filter(sqlx::query_as(&sql), params)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

fn bind_filter<'q, O>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    params: &'q ListParams,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    // A nil viewer never matches an owner or a team entry.
    let viewer = params.viewer.unwrap_or(Uuid::nil());
    query
        .bind(params.status)
        .bind(params.category.as_deref())
        .bind(params.tag.as_deref())
        .bind(params.search.as_deref().map(|s| format!("%{}%", escape_like(s))))
        .bind(params.owner_id)
        .bind(viewer)
        .bind(team_member_pattern(viewer))
        .bind(params.mine)
        .bind(params.include_deleted)
}

/// Escape `ILIKE` wildcards so search terms match literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Fields an update actually changed. `None` leaves the column untouched;
/// for nullable columns `Some(None)` clears it.
#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub links: Option<ProjectLinks>,
    pub blockchain: Option<ChainInfo>,
    pub roadmap: Option<Vec<RoadmapItem>>,
    pub is_public: Option<bool>,
}

/// Write only the columns set in `patch`.
pub async fn update_fields(
    pool: &PgPool,
    id: Uuid,
    patch: &ProjectPatch,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            logo_url = CASE WHEN $4 THEN $5 ELSE logo_url END,
            category = CASE WHEN $6 THEN $7 ELSE category END,
            tags = COALESCE($8, tags),
            links = COALESCE($9, links),
            blockchain = COALESCE($10, blockchain),
            roadmap = COALESCE($11, roadmap),
            is_public = COALESCE($12, is_public),
            updated_at = now()
         WHERE id = $1 AND NOT is_deleted
         RETURNING *",
    )
    .bind(id)
    .bind(patch.name.as_deref())
    .bind(patch.description.as_deref())
    .bind(patch.logo_url.is_some())
    .bind(patch.logo_url.as_ref().and_then(|v| v.as_deref()))
    .bind(patch.category.is_some())
    .bind(patch.category.as_ref().and_then(|v| v.as_deref()))
    .bind(patch.tags.as_deref())
    .bind(patch.links.as_ref().map(Json))
    .bind(patch.blockchain.as_ref().map(Json))
    .bind(patch.roadmap.as_deref().map(Json))
    .bind(patch.is_public)
    .fetch_optional(pool)
    .await
}

/// Merge `flags` (a JSON object of module name to bool) into the stored modules.
pub async fn merge_modules(
    pool: &PgPool,
    id: Uuid,
    flags: &serde_json::Value,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET enabled_modules = enabled_modules || $2, updated_at = now()
         WHERE id = $1 AND NOT is_deleted
         RETURNING *",
    )
    .bind(id)
    .bind(flags)
    .fetch_optional(pool)
    .await
}

/// Returns `None` when the project is gone or archived.
pub async fn publish(pool: &PgPool, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET
            status = 'published', is_public = true, published_at = now(), updated_at = now()
         WHERE id = $1 AND NOT is_deleted AND status <> 'archived'
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Moving back to draft also makes the project private.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: ProjectStatus,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET
            status = $2,
            is_public = CASE WHEN $2 = 'draft' THEN false ELSE is_public END,
            updated_at = now()
         WHERE id = $1 AND NOT is_deleted
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .fetch_optional(pool)
    .await
}

pub async fn increment_views(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE projects SET view_count = view_count + 1 WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE projects SET is_deleted = true, deleted_at = now(), updated_at = now()
         WHERE id = $1 AND NOT is_deleted",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Append a member unless they own the project or are already on the team.
///
/// Returns `None` when the guard rejects the insert.
pub async fn add_team_member(
    pool: &PgPool,
    id: Uuid,
    member: &TeamMember,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET team = team || $2, updated_at = now()
         WHERE id = $1 AND NOT is_deleted AND owner_id <> $3 AND NOT team @> $4
         RETURNING *",
    )
    .bind(id)
    .bind(Json([member]))
    .bind(member.user_id)
    .bind(team_member_pattern(member.user_id))
    .fetch_optional(pool)
    .await
}

/// Merge `fields` (role and/or title) into one member's entry, keeping team order.
pub async fn update_team_member(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    fields: &serde_json::Value,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET
            team = (
                SELECT jsonb_agg(
                    CASE WHEN m->>'user_id' = $2::text THEN m || $3 ELSE m END
                    ORDER BY ord
                )
                FROM jsonb_array_elements(team) WITH ORDINALITY AS t(m, ord)
            ),
            updated_at = now()
         WHERE id = $1 AND NOT is_deleted AND team @> $4
         RETURNING *",
    )
    .bind(id)
    .bind(user_id)
    .bind(fields)
    .bind(team_member_pattern(user_id))
    .fetch_optional(pool)
    .await
}

pub async fn remove_team_member(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects SET
            team = COALESCE(
                (SELECT jsonb_agg(m) FROM jsonb_array_elements(team) m WHERE m->>'user_id' <> $2::text),
                '[]'::jsonb
            ),
            updated_at = now()
         WHERE id = $1 AND NOT is_deleted AND team @> $3
         RETURNING *",
    )
    .bind(id)
    .bind(user_id)
    .bind(team_member_pattern(user_id))
    .fetch_optional(pool)
    .await
}
