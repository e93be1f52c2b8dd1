use std::sync::LazyLock;

use axum::Json;
use axum::extract::{Path, Query, State};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use uuid::Uuid;

use crate::auth::extractor::{AuthUser, MaybeAuthUser};
use crate::db;
use crate::db::Page;
use crate::db::projects::{NewProject, ProjectPatch, SortColumn, SortOrder};
use crate::error::AppError;
use crate::middleware::audit::{self, Change};
use crate::middleware::request_meta::RequestMeta;
use crate::models::{
    ChainInfo, ChangeType, EnabledModules, Project, ProjectLinks, ProjectStatus, RoadmapItem,
};
use crate::slug;
use crate::state::SharedState;

const MAX_SLUG_ATTEMPTS: u32 = 100;

static CONTRACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid contract regex"));
static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,12}$").expect("valid symbol regex"));

const EVM_NETWORKS: &[&str] = &[
    "ethereum", "bsc", "polygon", "arbitrum", "optimism", "base", "avalanche",
];

#[derive(Deserialize)]
pub struct CreateProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub logo_url: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: ProjectLinks,
    #[serde(default)]
    pub blockchain: ChainInfo,
    #[serde(default)]
    pub enabled_modules: EnabledModules,
}

/// Every field is optional; only fields that differ from the stored value are written.
#[derive(Deserialize, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub links: Option<ProjectLinks>,
    pub blockchain: Option<ChainInfo>,
    pub roadmap: Option<Vec<RoadmapItem>>,
    pub is_public: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct ModulesPatch {
    pub documents: Option<bool>,
    pub roadmap: Option<bool>,
    pub team: Option<bool>,
    pub tokenomics: Option<bool>,
    pub voting: Option<bool>,
    pub chat: Option<bool>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ProjectStatus>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub owner: Option<Uuid>,
    #[serde(default)]
    pub mine: bool,
    #[serde(default)]
    pub include_deleted: bool,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectList {
    pub projects: Vec<Project>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Load a live project or 404.
pub(crate) async fn load(state: &SharedState, id: Uuid) -> Result<Project, AppError> {
    db::projects::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(AppError::project_not_found)
}

pub(crate) fn ensure(allowed: bool, message: &str) -> Result<(), AppError> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(message.to_string()))
    }
}

pub async fn list(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ProjectList>, AppError> {
    let viewer = auth.user_id();
    if viewer.is_none() && (q.mine || q.include_deleted) {
        return Err(AppError::Unauthorized(
            "Sign in to list your own projects".to_string(),
        ));
    }

    let page = Page::new(q.page, q.limit);
    let params = db::projects::ListParams {
        viewer,
        status: q.status,
        category: q.category.filter(|s| !s.is_empty()),
        tag: q.tag.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()),
        search: q.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        owner_id: q.owner,
        mine: q.mine,
        include_deleted: q.mine && q.include_deleted,
        sort_by: SortColumn::parse(q.sort_by.as_deref().unwrap_or("created_at")),
        sort_order: SortOrder::parse(q.sort_order.as_deref().unwrap_or("desc")),
        limit: page.limit(),
        offset: page.offset(),
    };

    let projects = db::projects::list(&state.pool, &params).await?;
    let total = db::projects::count(&state.pool, &params).await?;

    Ok(Json(ProjectList {
        projects: projects.into_iter().map(|p| p.redacted_for(viewer)).collect(),
        total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages(total),
    }))
}

pub async fn create(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Json(req): Json<CreateProject>,
) -> Result<Json<Project>, AppError> {
    let name = req.name.trim();
    let logo_url = non_empty(req.logo_url);
    let category = non_empty(req.category);
    let tags = normalize_tags(req.tags);

    let mut problems = validate_name(name);
    problems.extend(validate_details(
        &req.description,
        logo_url.as_deref(),
        category.as_deref(),
        &tags,
    ));
    problems.extend(validate_links(&req.links));
    problems.extend(validate_chain(&req.blockchain));
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let base = slug::slugify(name);
    let mut attempt = 0u32;
    let project = loop {
        let candidate = if attempt <= MAX_SLUG_ATTEMPTS {
            slug::candidate(&base, attempt)
        } else {
            format!("{base}-{}", &Uuid::new_v4().simple().to_string()[..8])
        };
        attempt += 1;

        if attempt <= MAX_SLUG_ATTEMPTS && db::projects::slug_exists(&state.pool, &candidate).await? {
            continue;
        }

        let new = NewProject {
            owner_id: auth.user_id,
            name,
            slug: &candidate,
            description: req.description.trim(),
            logo_url: logo_url.as_deref(),
            category: category.as_deref(),
            tags: &tags,
            links: &req.links,
            blockchain: &req.blockchain,
            enabled_modules: &req.enabled_modules,
        };

        match db::projects::insert(&state.pool, &new).await {
            Ok(project) => break project,
            // Lost a race for this slug; try the next one
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tracing::debug!("Slug {candidate} taken concurrently, retrying");
                if attempt > MAX_SLUG_ATTEMPTS + 5 {
                    return Err(AppError::Conflict(
                        "Could not allocate a unique slug".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    tracing::info!(project_id = %project.id, slug = %project.slug, "Project created");

    audit::record_one(
        &state.pool,
        project.id,
        auth.user_id,
        &meta,
        Change::new(ChangeType::Create).describe(format!("Created project {}", project.name)),
    )
    .await;

    Ok(Json(project))
}

pub async fn get(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    present(&state, project, auth.user_id()).await
}

pub async fn get_by_slug(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<Json<Project>, AppError> {
    if !slug::is_valid(&slug) {
        return Err(AppError::project_not_found());
    }
    let project = db::projects::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(AppError::project_not_found)?;
    present(&state, project, auth.user_id()).await
}

async fn present(
    state: &SharedState,
    mut project: Project,
    viewer: Option<Uuid>,
) -> Result<Json<Project>, AppError> {
    ensure(
        project.can_view(viewer),
        "You do not have access to this project",
    )?;

    if !viewer.is_some_and(|id| project.can_edit(id)) {
        db::projects::increment_views(&state.pool, project.id).await?;
        project.view_count += 1;
    }

    Ok(Json(project.redacted_for(viewer)))
}

pub async fn update(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProject>,
) -> Result<Json<Project>, AppError> {
    let mut project = load(&state, id).await?;
    ensure(
        project.can_edit(auth.user_id),
        "You do not have permission to edit this project",
    )?;

    let (patch, changes) = apply_update(&mut project, req);
    if changes.is_empty() {
        return Ok(Json(project));
    }

    let problems = validate_project(&project);
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let project = db::projects::update_fields(&state.pool, id, &patch)
        .await?
        .ok_or_else(AppError::project_not_found)?;
    audit::record(&state.pool, project.id, auth.user_id, &meta, changes).await;

    Ok(Json(project))
}

pub async fn delete(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.is_owner(auth.user_id),
        "Only the owner can delete a project",
    )?;

    if !db::projects::soft_delete(&state.pool, id).await? {
        return Err(AppError::project_not_found());
    }

    tracing::info!(project_id = %id, "Project deleted");

    audit::record_one(
        &state.pool,
        id,
        auth.user_id,
        &meta,
        Change::new(ChangeType::Delete).describe(format!("Deleted project {}", project.name)),
    )
    .await;

    Ok(Json(serde_json::json!({ "message": "Deleted" })))
}

pub async fn update_modules(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ModulesPatch>,
) -> Result<Json<Project>, AppError> {
    let mut project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id),
        "Only the owner or a project admin can change modules",
    )?;

    let changes = apply_modules(&mut project.enabled_modules, &patch);
    if changes.is_empty() {
        return Ok(Json(project));
    }

    let project = db::projects::merge_modules(&state.pool, id, &changed_flags(&changes))
        .await?
        .ok_or_else(AppError::project_not_found)?;
    audit::record(&state.pool, project.id, auth.user_id, &meta, changes).await;

    Ok(Json(project))
}

pub async fn publish(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id),
        "Only the owner or a project admin can publish",
    )?;

    let previous = project.status;
    if previous == ProjectStatus::Archived {
        return Err(archived_publish());
    }
    if previous == ProjectStatus::Published && project.is_public {
        return Ok(Json(project));
    }

    let Some(project) = db::projects::publish(&state.pool, id).await? else {
        // Deleted or archived since it was loaded
        load(&state, id).await?;
        return Err(archived_publish());
    };
    tracing::info!(project_id = %project.id, "Project published");

    audit::record_one(
        &state.pool,
        project.id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::Publish,
            "status",
            previous.as_str().into(),
            ProjectStatus::Published.as_str().into(),
        ),
    )
    .await;

    Ok(Json(project))
}

pub async fn unpublish(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    change_status(auth, meta, state, id, ProjectStatus::Draft).await
}

pub async fn archive(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    change_status(auth, meta, state, id, ProjectStatus::Archived).await
}

async fn change_status(
    auth: AuthUser,
    meta: RequestMeta,
    state: SharedState,
    id: Uuid,
    target: ProjectStatus,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id),
        "Only the owner or a project admin can change the status",
    )?;

    if project.status == target {
        return Ok(Json(project));
    }

    let previous = project.status;
    let project = db::projects::set_status(&state.pool, id, target)
        .await?
        .ok_or_else(AppError::project_not_found)?;

    audit::record_one(
        &state.pool,
        project.id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::StatusChange,
            "status",
            previous.as_str().into(),
            target.as_str().into(),
        ),
    )
    .await;

    Ok(Json(project))
}

fn archived_publish() -> AppError {
    AppError::BadRequest("Archived projects cannot be published".to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Write each changed field into `project`, collect it into the patch and
/// describe it as a history entry.
fn apply_update(project: &mut Project, req: UpdateProject) -> (ProjectPatch, Vec<Change>) {
    let mut patch = ProjectPatch::default();
    let mut changes = Vec::new();

    macro_rules! diff {
        ($field:ident, $target:expr, $value:expr) => {
            let value = $value;
            if *$target != value {
                changes.push(Change::field(
                    ChangeType::Update,
                    stringify!($field),
                    to_json(&*$target),
                    to_json(&value),
                ));
                patch.$field = Some(value.clone());
                *$target = value;
            }
        };
    }

    if let Some(name) = req.name {
        diff!(name, &mut project.name, name.trim().to_string());
    }
    if let Some(description) = req.description {
        diff!(description, &mut project.description, description.trim().to_string());
    }
    if let Some(logo_url) = req.logo_url {
        diff!(logo_url, &mut project.logo_url, non_empty(Some(logo_url)));
    }
    if let Some(category) = req.category {
        diff!(category, &mut project.category, non_empty(Some(category)));
    }
    if let Some(tags) = req.tags {
        diff!(tags, &mut project.tags, normalize_tags(tags));
    }
    if let Some(links) = req.links {
        diff!(links, &mut project.links.0, links);
    }
    if let Some(blockchain) = req.blockchain {
        diff!(blockchain, &mut project.blockchain.0, blockchain);
    }
    if let Some(roadmap) = req.roadmap {
        diff!(roadmap, &mut project.roadmap.0, roadmap);
    }
    if let Some(is_public) = req.is_public {
        diff!(is_public, &mut project.is_public, is_public);
    }

    (patch, changes)
}

fn apply_modules(modules: &mut SqlJson<EnabledModules>, patch: &ModulesPatch) -> Vec<Change> {
    let before = modules.0;
    let m = &mut modules.0;

    if let Some(v) = patch.documents {
        m.documents = v;
    }
    if let Some(v) = patch.roadmap {
        m.roadmap = v;
    }
    if let Some(v) = patch.team {
        m.team = v;
    }
    if let Some(v) = patch.tokenomics {
        m.tokenomics = v;
    }
    if let Some(v) = patch.voting {
        m.voting = v;
    }
    if let Some(v) = patch.chat {
        m.chat = v;
    }

    before
        .flags()
        .into_iter()
        .zip(m.flags())
        .filter(|((_, old), (_, new))| old != new)
        .map(|((name, old), (_, new))| {
            Change::field(ChangeType::ModuleToggle, name, old.into(), new.into()).describe(
                format!("{} module {name}", if new { "Enabled" } else { "Disabled" }),
            )
        })
        .collect()
}

/// The flipped module flags as a JSON object to merge into the stored modules.
fn changed_flags(changes: &[Change]) -> serde_json::Value {
    changes
        .iter()
        .filter_map(|c| Some((c.field.clone()?, c.new_value.clone()?)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn validate_project(project: &Project) -> Vec<String> {
    let mut problems = validate_name(&project.name);
    problems.extend(validate_details(
        &project.description,
        project.logo_url.as_deref(),
        project.category.as_deref(),
        &project.tags,
    ));
    problems.extend(validate_links(&project.links));
    problems.extend(validate_chain(&project.blockchain));
    problems.extend(validate_roadmap(&project.roadmap));
    problems
}

fn validate_name(name: &str) -> Vec<String> {
    let len = name.trim().chars().count();
    if len < 2 || len > 100 {
        vec!["Name must be between 2 and 100 characters".to_string()]
    } else {
        vec![]
    }
}

fn validate_details(
    description: &str,
    logo_url: Option<&str>,
    category: Option<&str>,
    tags: &[String],
) -> Vec<String> {
    let mut problems = Vec::new();
    if description.chars().count() > 5000 {
        problems.push("Description must be at most 5000 characters".to_string());
    }
    if logo_url.is_some_and(|u| !is_http_url(u)) {
        problems.push("Logo URL must be an http(s) URL".to_string());
    }
    if category.is_some_and(|c| c.chars().count() > 50) {
        problems.push("Category must be at most 50 characters".to_string());
    }
    if tags.len() > 10 {
        problems.push("At most 10 tags are allowed".to_string());
    }
    if tags.iter().any(|t| t.chars().count() > 30) {
        problems.push("Tags must be at most 30 characters".to_string());
    }
    problems
}

fn validate_links(links: &ProjectLinks) -> Vec<String> {
    links
        .entries()
        .into_iter()
        .filter_map(|(name, url)| {
            url.filter(|u| !is_http_url(u) || u.len() > 500)
                .map(|_| format!("Link '{name}' must be an http(s) URL"))
        })
        .collect()
}

fn validate_chain(chain: &ChainInfo) -> Vec<String> {
    let mut problems = Vec::new();
    let is_evm = chain
        .network
        .as_deref()
        .is_some_and(|n| EVM_NETWORKS.contains(&n.to_lowercase().as_str()));

    if let Some(address) = chain.contract_address.as_deref() {
        if chain.network.is_none() {
            problems.push("A network is required when a contract address is set".to_string());
        } else if is_evm && !CONTRACT_RE.is_match(address) {
            problems.push("Contract address must be 0x followed by 40 hex characters".to_string());
        }
    }
    if chain.token_symbol.as_deref().is_some_and(|s| !SYMBOL_RE.is_match(s)) {
        problems.push("Token symbol must be 1-12 letters or digits".to_string());
    }
    if chain.decimals.is_some_and(|d| d > 36) {
        problems.push("Token decimals must be at most 36".to_string());
    }
    problems
}

fn validate_roadmap(roadmap: &[RoadmapItem]) -> Vec<String> {
    let mut problems = Vec::new();
    if roadmap.len() > 50 {
        problems.push("Roadmap may hold at most 50 items".to_string());
    }
    if roadmap
        .iter()
        .any(|item| item.title.trim().is_empty() || item.title.chars().count() > 200)
    {
        problems.push("Roadmap items need a title of at most 200 characters".to_string());
    }
    problems
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    rest.is_some_and(|r| !r.is_empty() && !r.contains(char::is_whitespace))
}
