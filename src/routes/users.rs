use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::extractor::{AuthUser, MaybeAuthUser};
use crate::db;
use crate::db::Page;
use crate::error::AppError;
use crate::routes::history::{HistoryPage, into_page};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Changes on every project the caller owns or belongs to.
pub async fn my_activity(
    auth: AuthUser,
    State(state): State<SharedState>,
    Query(q): Query<ActivityQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    let page = Page::new(q.page, q.limit);
    let rows = db::change_history::list_for_member(
        &state.pool,
        auth.user_id,
        page.limit(),
        page.offset(),
    )
    .await?;
    let total = db::change_history::count_for_member(&state.pool, auth.user_id).await?;

    Ok(Json(into_page(&state, rows, total, &page, false).await?))
}

/// Changes authored by a user. Other callers only see entries on public projects.
pub async fn user_activity(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(user_id): Path<Uuid>,
    Query(q): Query<ActivityQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    if db::users::find_by_id(&state.pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let is_self = auth.user_id() == Some(user_id);
    let viewer = auth.user_id().unwrap_or(Uuid::nil());
    let page = Page::new(q.page, q.limit);
    let rows = db::change_history::list_by_author(
        &state.pool,
        user_id,
        viewer,
        !is_self,
        page.limit(),
        page.offset(),
    )
    .await?;
    let total =
        db::change_history::count_by_author(&state.pool, user_id, viewer, !is_self).await?;

    Ok(Json(into_page(&state, rows, total, &page, is_self).await?))
}
