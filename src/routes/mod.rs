pub mod auth;
pub mod documents;
pub mod history;
pub mod projects;
pub mod team;
pub mod users;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};

use crate::state::SharedState;

// Room for multipart boundaries and the text fields around the file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn api_routes(max_upload_size: usize) -> Router<SharedState> {
    Router::new()
        // Auth
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/me", get(auth::me).put(auth::update_me))
        .route("/api/v1/auth/forgot-password", post(auth::forgot_password))
        .route("/api/v1/auth/reset-password", post(auth::reset_password))
        .route("/api/v1/auth/change-password", post(auth::change_password))
        // Projects
        .route("/api/v1/projects", get(projects::list).post(projects::create))
        .route("/api/v1/projects/slug/{slug}", get(projects::get_by_slug))
        .route(
            "/api/v1/projects/{id}",
            get(projects::get)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route("/api/v1/projects/{id}/modules", put(projects::update_modules))
        .route("/api/v1/projects/{id}/publish", post(projects::publish))
        .route("/api/v1/projects/{id}/unpublish", post(projects::unpublish))
        .route("/api/v1/projects/{id}/archive", post(projects::archive))
        // Team
        .route(
            "/api/v1/projects/{id}/team",
            get(team::list).post(team::add_member),
        )
        .route(
            "/api/v1/projects/{id}/team/{user_id}",
            put(team::update_member).delete(team::remove_member),
        )
        // Documents
        .route(
            "/api/v1/projects/{id}/documents",
            get(documents::list)
                .post(documents::upload)
                .layer(DefaultBodyLimit::max(max_upload_size + MULTIPART_OVERHEAD)),
        )
        .route(
            "/api/v1/projects/{id}/documents/versions/{doc_type}",
            get(documents::versions),
        )
        .route(
            "/api/v1/projects/{id}/documents/{document_id}",
            get(documents::get)
                .put(documents::update)
                .delete(documents::delete),
        )
        .route(
            "/api/v1/projects/{id}/documents/{document_id}/download",
            get(documents::download),
        )
        // History
        .route("/api/v1/projects/{id}/history", get(history::project_history))
        .route("/api/v1/projects/{id}/history/stats", get(history::project_stats))
        // Users
        .route("/api/v1/users/me/activity", get(users::my_activity))
        .route("/api/v1/users/{user_id}/activity", get(users::user_activity))
}
