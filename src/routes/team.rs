use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::extractor::{AuthUser, MaybeAuthUser};
use crate::db;
use crate::error::AppError;
use crate::middleware::audit::{self, Change};
use crate::middleware::request_meta::RequestMeta;
use crate::models::{ChangeType, Project, TeamMember, TeamRole, UserSummary};
use crate::routes::projects::{ensure, load};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: TeamRole,
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Option<TeamRole>,
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct TeamEntry {
    #[serde(flatten)]
    pub member: TeamMember,
    pub user: Option<UserSummary>,
}

/// Team roster with public profile details for each member.
pub async fn list(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TeamEntry>>, AppError> {
    let project = load(&state, id).await?;
    let viewer = auth.user_id();
    ensure(
        project.can_view(viewer),
        "You do not have access to this project",
    )?;

    let project = project.redacted_for(viewer);
    let ids: Vec<Uuid> = project.team.iter().map(|m| m.user_id).collect();
    let summaries = db::users::summaries(&state.pool, &ids).await?;

    let entries = project
        .team
        .0
        .into_iter()
        .map(|member| {
            let user = summaries.iter().find(|u| u.id == member.user_id).cloned();
            TeamEntry { member, user }
        })
        .collect();

    Ok(Json(entries))
}

pub async fn add_member(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id),
        "Only the owner or a project admin can manage the team",
    )?;

    let user = match (req.user_id, req.email.as_deref()) {
        (Some(user_id), _) => db::users::find_by_id(&state.pool, user_id).await?,
        (None, Some(email)) => {
            db::users::find_by_email(&state.pool, &email.trim().to_lowercase()).await?
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either user_id or email is required".to_string(),
            ));
        }
    }
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if project.is_owner(user.id) {
        return Err(AppError::BadRequest(
            "The owner is already part of the project".to_string(),
        ));
    }
    if project.member(user.id).is_some() {
        return Err(AppError::BadRequest(
            "User is already a team member".to_string(),
        ));
    }

    let member = TeamMember {
        user_id: user.id,
        role: req.role,
        title: clean_title(req.title)?,
        added_at: Utc::now(),
    };

    // The guard in the UPDATE catches a concurrent add of the same user
    let project = db::projects::add_team_member(&state.pool, id, &member)
        .await?
        .ok_or_else(|| AppError::BadRequest("User is already a team member".to_string()))?;

    tracing::info!(project_id = %id, user_id = %user.id, role = member.role.as_str(), "Team member added");

    audit::record_one(
        &state.pool,
        id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::TeamAdd,
            "team",
            serde_json::Value::Null,
            serde_json::json!({ "user_id": user.id, "role": member.role }),
        )
        .describe(format!("Added {} as {}", user.name, member.role.as_str())),
    )
    .await;

    if let Some(mailer) = state.system_mailer.clone() {
        let project_url = format!("{}/projects/{}", state.config.base_url, project.slug);
        let project_name = project.name.clone();
        let role = member.role.as_str();
        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_team_added(&user.email, &user.name, &project_name, role, &project_url)
                .await
            {
                tracing::warn!("Failed to send team invitation email: {e}");
            }
        });
    }

    Ok(Json(project))
}

pub async fn update_member(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMemberRequest>,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id),
        "Only the owner or a project admin can manage the team",
    )?;

    let before = project
        .member(user_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound("Team member not found".to_string()))?;

    let mut after = before.clone();
    if let Some(role) = req.role {
        after.role = role;
    }
    if req.title.is_some() {
        after.title = clean_title(req.title)?;
    }
    if after == before {
        return Ok(Json(project));
    }

    let project = db::projects::update_team_member(
        &state.pool,
        id,
        user_id,
        &member_fields(&before, &after),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Team member not found".to_string()))?;

    audit::record_one(
        &state.pool,
        id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::TeamUpdate,
            "team",
            serde_json::json!({ "user_id": user_id, "role": before.role, "title": before.title }),
            serde_json::json!({ "user_id": user_id, "role": after.role, "title": after.title }),
        ),
    )
    .await;

    Ok(Json(project))
}

pub async fn remove_member(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Project>, AppError> {
    let project = load(&state, id).await?;
    ensure(
        project.can_manage(auth.user_id) || auth.user_id == user_id,
        "Only the owner or a project admin can manage the team",
    )?;

    let removed = project
        .member(user_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound("Team member not found".to_string()))?;

    let project = db::projects::remove_team_member(&state.pool, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Team member not found".to_string()))?;

    tracing::info!(project_id = %id, user_id = %user_id, "Team member removed");

    audit::record_one(
        &state.pool,
        id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::TeamRemove,
            "team",
            serde_json::json!({ "user_id": user_id, "role": removed.role }),
            serde_json::Value::Null,
        ),
    )
    .await;

    Ok(Json(project))
}

/// The role and title keys that differ between `before` and `after`.
fn member_fields(before: &TeamMember, after: &TeamMember) -> serde_json::Value {
    let mut fields = serde_json::Map::new();
    if after.role != before.role {
        fields.insert("role".to_string(), serde_json::json!(after.role));
    }
    if after.title != before.title {
        fields.insert("title".to_string(), serde_json::json!(after.title));
    }
    fields.into()
}

fn clean_title(title: Option<String>) -> Result<Option<String>, AppError> {
    let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    if title.as_ref().is_some_and(|t| t.chars().count() > 100) {
        return Err(AppError::BadRequest(
            "Title must be at most 100 characters".to_string(),
        ));
    }
    Ok(title)
}
