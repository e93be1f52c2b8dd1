mod common;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE};
use serde_json::{Value, json};
use uuid::Uuid;

use projecthub::db;
use projecthub::db::projects::ProjectPatch;
use projecthub::models::ProjectStatus;

fn pdf(marker: &str) -> Vec<u8> {
    format!("%PDF-1.7\n{marker}\n%%EOF").into_bytes()
}

fn history_types(body: &Value) -> Vec<String> {
    body["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["change_type"].as_str().unwrap().to_string())
        .collect()
}

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(resp.text().await.unwrap(), "ok");

    common::cleanup(app).await;
}

// ── Registration & Auth ─────────────────────────────────────────

#[tokio::test]
async fn register_returns_session_and_user() {
    let app = common::spawn_app().await;

    let (body, status) = app.register("Alice@Test.com", "password123", "Alice").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["user"]["email"], "alice@test.com");
    assert!(body["user"].get("password_hash").is_none());

    common::cleanup(app).await;
}

#[tokio::test]
async fn register_rejects_duplicate_email() {
    let app = common::spawn_app().await;
    app.user("alice@test.com", "Alice").await;

    let (_, status) = app.register("ALICE@test.com", "password123", "Again").await;
    assert_eq!(status, StatusCode::CONFLICT);

    common::cleanup(app).await;
}

#[tokio::test]
async fn register_validates_input() {
    let app = common::spawn_app().await;

    let (_, status) = app.register("alice@test.com", "short", "Alice").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, status) = app.register("not-an-email", "password123", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("email"));
    assert!(error.contains("Name"));

    common::cleanup(app).await;
}

#[tokio::test]
async fn login_valid_and_invalid_credentials() {
    let app = common::spawn_app().await;
    app.user("alice@test.com", "Alice").await;

    let (body, status) = app.login("alice@test.com", "password123").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());

    let (_, status) = app.login("alice@test.com", "wrongpassword").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, status) = app.login("nobody@test.com", "password123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn login_is_rate_limited_after_repeated_failures() {
    let app = common::spawn_app().await;
    app.user("alice@test.com", "Alice").await;

    for _ in 0..5 {
        let (_, status) = app.login("alice@test.com", "wrongpassword").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (_, status) = app.login("alice@test.com", "password123").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    common::cleanup(app).await;
}

#[tokio::test]
async fn me_requires_valid_token() {
    let app = common::spawn_app().await;
    let alice = app.user("alice@test.com", "Alice").await;

    let (body, status) = app.get_auth("/api/v1/auth/me", &alice.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Alice");

    let (_, status) = app.get("/api/v1/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, status) = app.get_auth("/api/v1/auth/me", "garbage").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn update_profile() {
    let app = common::spawn_app().await;
    let alice = app.user("alice@test.com", "Alice").await;

    let (body, status) = app
        .put_auth(
            "/api/v1/auth/me",
            &alice.token,
            &json!({ "name": "Alice Doe", "bio": "Builder" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Alice Doe");
    assert_eq!(body["bio"], "Builder");

    common::cleanup(app).await;
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let app = common::spawn_app().await;
    let (body, _) = app.register("alice@test.com", "password123", "Alice").await;
    let original = body["refresh_token"].as_str().unwrap().to_string();

    let refresh = |token: String| {
        let req = app
            .client
            .post(app.url("/api/v1/auth/refresh"))
            .header(COOKIE, format!("refresh_token={token}"));
        async move { req.send().await.unwrap() }
    };

    let resp = refresh(original.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let rotated = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, original);

    // Replaying the old token revokes every session
    let resp = refresh(original).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = refresh(rotated).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn refresh_without_cookie_is_unauthorized() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/auth/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn change_password_then_login() {
    let app = common::spawn_app().await;
    let alice = app.user("alice@test.com", "Alice").await;

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/change-password",
            &alice.token,
            &json!({ "current_password": "wrongpassword", "new_password": "newpassword456" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/change-password",
            &alice.token,
            &json!({ "current_password": "password123", "new_password": "newpassword456" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app.login("alice@test.com", "password123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, status) = app.login("alice@test.com", "newpassword456").await;
    assert_eq!(status, StatusCode::OK);

    common::cleanup(app).await;
}

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() {
    let app = common::spawn_app().await;
    let alice = app.user("alice@test.com", "Alice").await;

    let (known, status) = app
        .post_auth(
            "/api/v1/auth/forgot-password",
            &alice.token,
            &json!({ "email": "alice@test.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (unknown, status) = app
        .post_auth(
            "/api/v1/auth/forgot-password",
            &alice.token,
            &json!({ "email": "nobody@test.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, unknown);

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/reset-password",
            &alice.token,
            &json!({ "token": "not-a-real-token", "password": "newpassword456" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    common::cleanup(app).await;
}

// ── Projects ────────────────────────────────────────────────────

#[tokio::test]
async fn acme_token_scenario() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;

    let first = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    assert_eq!(first["slug"], "acme-token");
    assert_eq!(first["status"], "draft");
    assert_eq!(first["is_public"], false);
    assert_eq!(first["enabled_modules"]["documents"], true);
    assert_eq!(first["enabled_modules"]["voting"], false);

    let second = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    assert_eq!(second["slug"], "acme-token-1");

    let id = first["id"].as_str().unwrap();
    let (published, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["status"], "published");
    assert_eq!(published["is_public"], true);
    assert!(published["published_at"].is_string());

    let (history, status) = app
        .get_auth(&format!("/api/v1/projects/{id}/history"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let types = history_types(&history);
    assert_eq!(types[0], "publish");
    assert!(types.contains(&"create".to_string()));

    // Anyone can now read it by slug
    let (body, status) = app.get("/api/v1/projects/slug/acme-token").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    common::cleanup(app).await;
}

#[tokio::test]
async fn create_project_validates_fields() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;

    let (_, status) = app
        .post_auth("/api/v1/projects", &owner.token, &json!({ "name": "A" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, status) = app
        .post_auth(
            "/api/v1/projects",
            &owner.token,
            &json!({
                "name": "Chain Project",
                "links": { "website": "not a url" },
                "blockchain": { "network": "ethereum", "contract_address": "0x1234" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("website"));
    assert!(error.contains("Contract address"));

    let (_, status) = app
        .post_auth("/api/v1/projects", "bad-token", &json!({ "name": "Anon" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn private_projects_are_hidden_from_outsiders() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let stranger = app.user("stranger@test.com", "Stranger").await;

    let project = app
        .create_project(&owner.token, &json!({ "name": "Secret Sauce" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (_, status) = app.get(&format!("/api/v1/projects/{id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}"), &stranger.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (list, _) = app.get("/api/v1/projects").await;
    assert_eq!(list["total"], 0);

    let (list, _) = app.get_auth("/api/v1/projects", &owner.token).await;
    assert_eq!(list["total"], 1);

    let (_, status) = app
        .get(&format!("/api/v1/projects/{}", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup(app).await;
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;

    for (name, category) in [("Alpha Swap", "defi"), ("Beta Games", "gaming"), ("Gamma Lend", "defi")] {
        let p = app
            .create_project(
                &owner.token,
                &json!({ "name": name, "category": category, "tags": ["Layer2"] }),
            )
            .await;
        let id = p["id"].as_str().unwrap();
        app.post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
            .await;
    }

    let (body, _) = app.get("/api/v1/projects?category=defi").await;
    assert_eq!(body["total"], 2);

    let (body, _) = app.get("/api/v1/projects?search=games").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["projects"][0]["name"], "Beta Games");

    let (body, _) = app.get("/api/v1/projects?tag=layer2&limit=2&page=2").await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["projects"].as_array().unwrap().len(), 1);
    assert_eq!(body["total_pages"], 2);

    let (body, _) = app.get("/api/v1/projects?tag=Layer2").await;
    assert_eq!(body["total"], 3);

    // Wildcards in a search term match literally
    let (body, _) = app.get("/api/v1/projects?search=_").await;
    assert_eq!(body["total"], 0);
    let (body, _) = app.get("/api/v1/projects?search=%25").await;
    assert_eq!(body["total"], 0);

    let (body, _) = app.get("/api/v1/projects?sort_by=name&sort_order=asc").await;
    assert_eq!(body["projects"][0]["name"], "Alpha Swap");

    let (_, status) = app.get("/api/v1/projects?mine=true").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    common::cleanup(app).await;
}

#[tokio::test]
async fn update_records_each_changed_field() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token", "description": "Old" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (body, status) = app
        .put_auth(
            &format!("/api/v1/projects/{id}"),
            &owner.token,
            &json!({ "name": "Acme Token", "description": "New", "category": "defi" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "New");
    assert_eq!(body["slug"], "acme-token");

    let (history, _) = app
        .get_auth(
            &format!("/api/v1/projects/{id}/history?change_type=update"),
            &owner.token,
        )
        .await;
    assert_eq!(history["total"], 2);
    let fields: Vec<&str> = history["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"description"));
    assert!(fields.contains(&"category"));
    assert!(history["history"][0]["user"]["name"] == "Owner");

    common::cleanup(app).await;
}

#[tokio::test]
async fn view_count_ignores_editors() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();
    app.post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;

    app.get_auth(&format!("/api/v1/projects/{id}"), &owner.token).await;
    let (body, _) = app.get(&format!("/api/v1/projects/{id}")).await;
    assert_eq!(body["view_count"], 1);
    let (body, _) = app.get(&format!("/api/v1/projects/{id}")).await;
    assert_eq!(body["view_count"], 2);

    common::cleanup(app).await;
}

#[tokio::test]
async fn status_transitions() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (body, _) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;
    assert_eq!(body["status"], "published");

    let (body, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/unpublish"), &owner.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "draft");
    assert_eq!(body["is_public"], false);

    let (body, _) = app
        .post_auth(&format!("/api/v1/projects/{id}/archive"), &owner.token, &json!({}))
        .await;
    assert_eq!(body["status"], "archived");

    let (_, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (stats, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/history/stats"), &owner.token)
        .await;
    let status_changes = stats["stats"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["change_type"] == "status_change")
        .unwrap();
    assert_eq!(status_changes["count"], 2);
    assert_eq!(stats["total"], 4);

    common::cleanup(app).await;
}

#[tokio::test]
async fn writes_from_a_stale_read_keep_concurrent_changes() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let editor = app.user("editor@test.com", "Editor").await;
    let viewer = app.user("viewer@test.com", "Viewer").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token", "description": "Old" }))
        .await;
    let id = project["id"].as_str().unwrap();
    let project_id: Uuid = id.parse().unwrap();
    let editor_id: Uuid = editor.id.parse().unwrap();
    app.post_auth(
        &format!("/api/v1/projects/{id}/team"),
        &owner.token,
        &json!({ "user_id": editor.id, "role": "viewer" }),
    )
    .await;

    // Row as a handler saw it before the publish and the new member landed
    let stale = db::projects::find_by_id(&app.pool, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.status, ProjectStatus::Draft);
    assert_eq!(stale.team.len(), 1);

    let (_, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, status) = app
        .post_auth(
            &format!("/api/v1/projects/{id}/team"),
            &owner.token,
            &json!({ "user_id": viewer.id, "role": "viewer" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let patch = ProjectPatch {
        description: Some("New".to_string()),
        ..Default::default()
    };
    let updated = db::projects::update_fields(&app.pool, project_id, &patch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.description, "New");
    assert_eq!(updated.status, ProjectStatus::Published);
    assert!(updated.is_public);
    assert!(updated.published_at.is_some());

    let updated = db::projects::merge_modules(&app.pool, project_id, &json!({ "voting": true }))
        .await
        .unwrap()
        .unwrap();
    assert!(updated.enabled_modules.voting);
    assert!(updated.enabled_modules.documents);
    assert_eq!(updated.description, "New");
    assert_eq!(updated.status, ProjectStatus::Published);

    let updated = db::projects::update_team_member(
        &app.pool,
        project_id,
        editor_id,
        &json!({ "role": "editor" }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(updated.team.len(), 2);
    assert!(updated.can_edit(editor_id));
    assert_eq!(updated.team[1].user_id.to_string(), viewer.id);

    // Through the API: an update after publishing leaves the status alone
    let (body, status) = app
        .put_auth(&format!("/api/v1/projects/{id}"), &owner.token, &json!({ "name": "Acme Two" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "published");
    assert_eq!(body["is_public"], true);
    assert_eq!(body["description"], "New");

    common::cleanup(app).await;
}

#[tokio::test]
async fn parallel_creates_get_distinct_slugs() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let body = json!({ "name": "Race Coin" });

    let created = futures_util::future::join_all(
        (0..5).map(|_| app.create_project(&owner.token, &body)),
    )
    .await;

    let mut slugs: Vec<String> = created
        .iter()
        .map(|p| p["slug"].as_str().unwrap().to_string())
        .collect();
    slugs.sort();
    assert_eq!(
        slugs,
        vec!["race-coin", "race-coin-1", "race-coin-2", "race-coin-3", "race-coin-4"]
    );

    common::cleanup(app).await;
}

#[tokio::test]
async fn soft_deleted_projects_are_excluded() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let other = app.user("other@test.com", "Other").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (_, status) = app
        .delete_auth(&format!("/api/v1/projects/{id}"), &other.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .delete_auth(&format!("/api/v1/projects/{id}"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (list, _) = app.get_auth("/api/v1/projects", &owner.token).await;
    assert_eq!(list["total"], 0);

    let (list, _) = app
        .get_auth("/api/v1/projects?mine=true&include_deleted=true", &owner.token)
        .await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["projects"][0]["is_deleted"], true);

    // The slug stays reserved
    let again = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    assert_eq!(again["slug"], "acme-token-1");

    common::cleanup(app).await;
}

// ── Modules ─────────────────────────────────────────────────────

#[tokio::test]
async fn module_toggles_are_logged_and_enforced() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (body, status) = app
        .put_auth(
            &format!("/api/v1/projects/{id}/modules"),
            &owner.token,
            &json!({ "documents": false, "voting": true, "team": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled_modules"]["documents"], false);
    assert_eq!(body["enabled_modules"]["voting"], true);

    let (history, _) = app
        .get_auth(
            &format!("/api/v1/projects/{id}/history?change_type=module_toggle"),
            &owner.token,
        )
        .await;
    assert_eq!(history["total"], 2);

    let (_, status) = app
        .upload_document(
            &owner.token,
            id,
            "whitepaper",
            "paper.pdf",
            "application/pdf",
            pdf("v1"),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    common::cleanup(app).await;
}

// ── Team ────────────────────────────────────────────────────────

#[tokio::test]
async fn team_roles_control_permissions() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let editor = app.user("editor@test.com", "Editor").await;
    let viewer = app.user("viewer@test.com", "Viewer").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();
    let team_url = format!("/api/v1/projects/{id}/team");

    let (body, status) = app
        .post_auth(
            &team_url,
            &owner.token,
            &json!({ "email": "editor@test.com", "role": "editor", "title": "CTO" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["team"].as_array().unwrap().len(), 1);

    let (_, status) = app
        .post_auth(&team_url, &owner.token, &json!({ "user_id": viewer.id, "role": "viewer" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Duplicates and the owner are rejected
    let (_, status) = app
        .post_auth(&team_url, &owner.token, &json!({ "user_id": editor.id, "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, status) = app
        .post_auth(&team_url, &owner.token, &json!({ "user_id": owner.id, "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Private project is now visible to both members
    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}"), &viewer.token)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .put_auth(
            &format!("/api/v1/projects/{id}"),
            &editor.token,
            &json!({ "description": "Edited by the editor" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .put_auth(
            &format!("/api/v1/projects/{id}"),
            &viewer.token,
            &json!({ "description": "Viewer edit" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &editor.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .post_auth(&team_url, &editor.token, &json!({ "email": "x@test.com", "role": "viewer" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Promote the editor to admin, who may then publish
    let (body, status) = app
        .put_auth(
            &format!("{team_url}/{}", editor.id),
            &owner.token,
            &json!({ "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["team"][0]["role"], "admin");

    let (_, status) = app
        .post_auth(&format!("/api/v1/projects/{id}/publish"), &editor.token, &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (roster, status) = app.get(&team_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roster[0]["user"]["name"], "Editor");
    assert_eq!(roster[0]["title"], "CTO");

    let (history, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/history"), &owner.token)
        .await;
    let types = history_types(&history);
    assert_eq!(types.iter().filter(|t| *t == "team_add").count(), 2);
    assert!(types.contains(&"team_update".to_string()));

    common::cleanup(app).await;
}

#[tokio::test]
async fn members_can_leave_but_not_remove_others() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let a = app.user("a@test.com", "A").await;
    let b = app.user("b@test.com", "B").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();
    let team_url = format!("/api/v1/projects/{id}/team");

    for user in [&a, &b] {
        let (_, status) = app
            .post_auth(&team_url, &owner.token, &json!({ "user_id": user.id, "role": "editor" }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, status) = app.delete_auth(&format!("{team_url}/{}", b.id), &a.token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (body, status) = app.delete_auth(&format!("{team_url}/{}", a.id), &a.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["team"].as_array().unwrap().len(), 1);

    let (_, status) = app.delete_auth(&format!("{team_url}/{}", a.id), &owner.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}"), &a.token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    common::cleanup(app).await;
}

#[tokio::test]
async fn adding_unknown_user_is_not_found() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (_, status) = app
        .post_auth(
            &format!("/api/v1/projects/{id}/team"),
            &owner.token,
            &json!({ "email": "ghost@test.com", "role": "viewer" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, status) = app
        .post_auth(
            &format!("/api/v1/projects/{id}/team"),
            &owner.token,
            &json!({ "role": "viewer" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    common::cleanup(app).await;
}

// ── Documents ───────────────────────────────────────────────────

#[tokio::test]
async fn document_versions_supersede_previous() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (v1, status) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("v1"), true)
        .await;
    assert_eq!(status, StatusCode::OK, "upload failed: {v1}");
    assert_eq!(v1["version"], 1);
    assert_eq!(v1["is_active"], true);
    assert!(v1.get("storage_key").is_none());

    let (v2, status) = app
        .upload_document(&owner.token, id, "whitepaper", "paper-v2.pdf", "application/pdf", pdf("v2"), true)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v2["version"], 2);
    assert_eq!(v2["is_active"], true);

    let (versions, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents/versions/whitepaper"), &owner.token)
        .await;
    let versions = versions.as_array().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0]["version"], 2);
    assert_eq!(versions[1]["version"], 1);
    assert_eq!(versions[1]["is_active"], false);

    let (active, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents"), &owner.token)
        .await;
    assert_eq!(active.as_array().unwrap().len(), 1);

    let (all, _) = app
        .get_auth(
            &format!("/api/v1/projects/{id}/documents?include_inactive=true"),
            &owner.token,
        )
        .await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    // A different type starts its own sequence
    let (audit, _) = app
        .upload_document(&owner.token, id, "audit", "audit.pdf", "application/pdf", pdf("audit"), true)
        .await;
    assert_eq!(audit["version"], 1);

    assert_eq!(app.storage.len(), 3);

    let (history, _) = app
        .get_auth(
            &format!("/api/v1/projects/{id}/history?change_type=document_upload"),
            &owner.token,
        )
        .await;
    assert_eq!(history["total"], 3);

    let (_, status) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents/versions/memo"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    common::cleanup(app).await;
}

#[tokio::test]
async fn parallel_uploads_get_distinct_versions() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let uploads = (0..5).map(|i| {
        app.upload_document(
            &owner.token,
            id,
            "whitepaper",
            "paper.pdf",
            "application/pdf",
            pdf(&format!("v{i}")),
            true,
        )
    });
    let results = futures_util::future::join_all(uploads).await;

    let mut versions: Vec<i64> = results
        .iter()
        .map(|(body, status)| {
            assert_eq!(*status, StatusCode::OK, "upload failed: {body}");
            body["version"].as_i64().unwrap()
        })
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);

    let (active, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents"), &owner.token)
        .await;
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["version"], 5);

    let active_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE doc_type = 'whitepaper' AND is_active",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(active_rows, 1);

    common::cleanup(app).await;
}

#[tokio::test]
async fn other_documents_stay_active_together() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    for name in ["logo.png", "banner.png"] {
        let (_, status) = app
            .upload_document(&owner.token, id, "other", name, "image/png", vec![0x89, 0x50, 0x4e, 0x47], true)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (docs, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents?type=other"), &owner.token)
        .await;
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d["is_active"] == true));

    common::cleanup(app).await;
}

#[tokio::test]
async fn upload_rejects_bad_input() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let stranger = app.user("stranger@test.com", "Stranger").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (_, status) = app
        .upload_document(&owner.token, id, "whitepaper", "notes.txt", "text/plain", b"hello".to_vec(), true)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .upload_document(&owner.token, id, "memo", "paper.pdf", "application/pdf", pdf("x"), true)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .upload_document(&stranger.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("x"), true)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .upload_document(
            &owner.token,
            id,
            "whitepaper",
            "huge.pdf",
            "application/pdf",
            vec![0u8; 50 * 1024 * 1024 + 1],
            true,
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    assert!(app.storage.is_empty());

    common::cleanup(app).await;
}

#[tokio::test]
async fn private_documents_visible_to_editors_only() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();
    app.post_auth(&format!("/api/v1/projects/{id}/publish"), &owner.token, &json!({}))
        .await;

    let (public_doc, _) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("pub"), true)
        .await;
    let (private_doc, _) = app
        .upload_document(&owner.token, id, "legal", "terms.pdf", "application/pdf", pdf("priv"), false)
        .await;

    let (docs, status) = app.get(&format!("/api/v1/projects/{id}/documents")).await;
    assert_eq!(status, StatusCode::OK);
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], public_doc["id"]);

    let private_id = private_doc["id"].as_str().unwrap();
    let (_, status) = app
        .get(&format!("/api/v1/projects/{id}/documents/{private_id}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (body, status) = app
        .get_auth(&format!("/api/v1/projects/{id}/documents/{private_id}"), &owner.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doc_type"], "legal");

    common::cleanup(app).await;
}

#[tokio::test]
async fn download_streams_stored_bytes() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (doc, _) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("bytes"), true)
        .await;
    let doc_id = doc["id"].as_str().unwrap();

    let resp = app
        .client
        .get(app.url(&format!("/api/v1/projects/{id}/documents/{doc_id}/download")))
        .bearer_auth(&owner.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/pdf");
    assert_eq!(
        resp.headers().get(CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"paper.pdf\""
    );
    assert_eq!(resp.bytes().await.unwrap().to_vec(), pdf("bytes"));

    common::cleanup(app).await;
}

#[tokio::test]
async fn update_and_delete_document() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (doc, _) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("x"), true)
        .await;
    let doc_id = doc["id"].as_str().unwrap();
    let doc_url = format!("/api/v1/projects/{id}/documents/{doc_id}");
    assert_eq!(doc["title"], "paper.pdf");

    let (body, status) = app
        .put_auth(
            &doc_url,
            &owner.token,
            &json!({ "title": "Whitepaper 2025", "is_public": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Whitepaper 2025");
    assert_eq!(body["is_public"], false);

    let (_, status) = app.put_auth(&doc_url, &owner.token, &json!({ "title": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app.delete_auth(&doc_url, &owner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.storage.is_empty());

    let (_, status) = app.get_auth(&doc_url, &owner.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The next upload of the type continues the version sequence
    let (next, _) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("y"), true)
        .await;
    assert_eq!(next["version"], 2);

    let (stats, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/history/stats"), &owner.token)
        .await;
    let types: Vec<&str> = stats["stats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["change_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"document_update"));
    assert!(types.contains(&"document_delete"));

    common::cleanup(app).await;
}

// ── History & Activity ──────────────────────────────────────────

#[tokio::test]
async fn history_masks_client_ip() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;

    let resp = app
        .client
        .post(app.url("/api/v1/projects"))
        .bearer_auth(&owner.token)
        .header("x-forwarded-for", "203.0.113.7")
        .header("user-agent", "history-test/1.0")
        .json(&json!({ "name": "Acme Token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let project: Value = resp.json().await.unwrap();
    let id = project["id"].as_str().unwrap();

    let (history, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/history"), &owner.token)
        .await;
    let entry = &history["history"][0];
    assert_eq!(entry["change_type"], "create");
    assert_eq!(entry["ip_address"], "***.***.***.7");
    assert_eq!(entry["user_agent"], "history-test/1.0");

    let stored: String = sqlx::query_scalar("SELECT ip_address FROM change_history LIMIT 1")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, "203.0.113.7");

    common::cleanup(app).await;
}

#[tokio::test]
async fn private_document_history_is_hidden_from_readers() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let outsider = app.user("outsider@test.com", "Outsider").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let resp = app
        .client
        .post(app.url(&format!("/api/v1/projects/{id}/publish")))
        .bearer_auth(&owner.token)
        .header("user-agent", "history-test/1.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, status) = app
        .upload_document(&owner.token, id, "whitepaper", "paper.pdf", "application/pdf", pdf("p"), true)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (secret, status) = app
        .upload_document(&owner.token, id, "audit", "secret-audit.pdf", "application/pdf", pdf("s"), false)
        .await;
    assert_eq!(status, StatusCode::OK);
    let secret_id = secret["id"].as_str().unwrap();
    let (_, status) = app
        .put_auth(
            &format!("/api/v1/projects/{id}/documents/{secret_id}"),
            &owner.token,
            &json!({ "title": "Internal review" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Owner: create, publish, two uploads, one update
    let (full, _) = app
        .get_auth(&format!("/api/v1/projects/{id}/history"), &owner.token)
        .await;
    assert_eq!(full["total"], 5);
    assert!(full.to_string().contains("secret-audit.pdf"));
    assert!(full.to_string().contains("history-test/1.0"));

    let (public, status) = app.get(&format!("/api/v1/projects/{id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(public["total"], 3);
    let text = public.to_string();
    assert!(!text.contains("secret-audit.pdf"));
    assert!(!text.contains("Internal review"));
    assert!(!text.contains(secret_id));
    assert!(!text.contains("history-test/1.0"));
    assert!(text.contains("paper.pdf"));

    let (seen, _) = app
        .get_auth(&format!("/api/v1/users/{}/activity", owner.id), &outsider.token)
        .await;
    assert_eq!(seen["total"], 3);
    assert!(!seen.to_string().contains("secret-audit.pdf"));

    common::cleanup(app).await;
}

#[tokio::test]
async fn history_of_private_project_requires_membership() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let project = app
        .create_project(&owner.token, &json!({ "name": "Acme Token" }))
        .await;
    let id = project["id"].as_str().unwrap();

    let (_, status) = app.get(&format!("/api/v1/projects/{id}/history")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, status) = app.get(&format!("/api/v1/projects/{id}/history/stats")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    common::cleanup(app).await;
}

#[tokio::test]
async fn activity_feeds() {
    let app = common::spawn_app().await;
    let owner = app.user("owner@test.com", "Owner").await;
    let member = app.user("member@test.com", "Member").await;
    let outsider = app.user("outsider@test.com", "Outsider").await;

    let public = app
        .create_project(&owner.token, &json!({ "name": "Public One" }))
        .await;
    let public_id = public["id"].as_str().unwrap();
    app.post_auth(&format!("/api/v1/projects/{public_id}/publish"), &owner.token, &json!({}))
        .await;

    let private = app
        .create_project(&owner.token, &json!({ "name": "Private One" }))
        .await;
    let private_id = private["id"].as_str().unwrap();
    app.post_auth(
        &format!("/api/v1/projects/{private_id}/team"),
        &owner.token,
        &json!({ "user_id": member.id, "role": "viewer" }),
    )
    .await;

    // Owner: create + publish on public, create + team_add on private
    let (mine, status) = app.get_auth("/api/v1/users/me/activity", &owner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 4);

    // Member sees everything on the project they joined
    let (theirs, _) = app.get_auth("/api/v1/users/me/activity", &member.token).await;
    assert_eq!(theirs["total"], 2);

    let (_, status) = app.get("/api/v1/users/me/activity").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A third party only sees the owner's changes on public projects
    let (seen, status) = app
        .get_auth(&format!("/api/v1/users/{}/activity", owner.id), &outsider.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen["total"], 2);
    assert!(
        seen["history"]
            .as_array()
            .unwrap()
            .iter()
            .all(|h| h["project_id"] == public_id)
    );

    let (own, _) = app
        .get_auth(&format!("/api/v1/users/{}/activity", owner.id), &owner.token)
        .await;
    assert_eq!(own["total"], 4);

    let (_, status) = app
        .get(&format!("/api/v1/users/{}/activity", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup(app).await;
}
