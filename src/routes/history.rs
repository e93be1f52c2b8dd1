use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::extractor::MaybeAuthUser;
use crate::db;
use crate::db::Page;
use crate::error::AppError;
use crate::models::{ChangeHistory, ChangeType, HistoryStat, UserSummary};
use crate::routes::projects::{ensure, load};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub change_type: Option<ChangeType>,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub change: ChangeHistory,
    pub user: Option<UserSummary>,
}

#[derive(Serialize)]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Serialize)]
pub struct HistoryStats {
    pub stats: Vec<HistoryStat>,
    pub total: i64,
}

/// Attach author summaries and wrap a page of history rows.
///
/// User agents are only kept when `reveal_user_agent` is set.
pub(crate) async fn into_page(
    state: &SharedState,
    rows: Vec<ChangeHistory>,
    total: i64,
    page: &Page,
    reveal_user_agent: bool,
) -> Result<HistoryPage, AppError> {
    let mut ids: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let authors = db::users::summaries(&state.pool, &ids).await?;

    let history = rows
        .into_iter()
        .map(|mut change| {
            if !reveal_user_agent {
                change.user_agent = None;
            }
            let user = authors.iter().find(|u| u.id == change.user_id).cloned();
            HistoryEntry { change, user }
        })
        .collect();

    Ok(HistoryPage {
        history,
        total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages(total),
    })
}

pub async fn project_history(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    let project = load(&state, project_id).await?;
    let viewer = auth.user_id();
    ensure(
        project.can_view(viewer),
        "You do not have access to this project",
    )?;
    let can_edit = viewer.is_some_and(|id| project.can_edit(id));
    let viewer = viewer.unwrap_or(Uuid::nil());

    let page = Page::new(q.page, q.limit);
    let rows = db::change_history::list_for_project(
        &state.pool,
        project_id,
        q.change_type,
        viewer,
        page.limit(),
        page.offset(),
    )
    .await?;
    let total =
        db::change_history::count_for_project(&state.pool, project_id, q.change_type, viewer)
            .await?;

    Ok(Json(into_page(&state, rows, total, &page, can_edit).await?))
}

pub async fn project_stats(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<HistoryStats>, AppError> {
    let project = load(&state, project_id).await?;
    ensure(
        project.can_view(auth.user_id()),
        "You do not have access to this project",
    )?;

    let stats = db::change_history::stats_for_project(&state.pool, project_id).await?;
    let total = stats.iter().map(|s| s.count).sum();

    Ok(Json(HistoryStats { stats, total }))
}
