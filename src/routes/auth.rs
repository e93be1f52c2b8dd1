use axum::Json;
use axum::extract::State;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::extractor::AuthUser;
use crate::auth::jwt::{Claims, encode_token};
use crate::auth::{generate_opaque_token, hash_token, password};
use crate::config::RegistrationMode;
use crate::db;
use crate::error::AppError;
use crate::models::User;
use crate::state::SharedState;

const REFRESH_TOKEN_DAYS: i64 = 7;
const MAX_NAME_LEN: usize = 100;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn refresh_cookie(refresh_token: &str) -> CookieJar {
    let refresh = Cookie::build(("refresh_token", refresh_token.to_string()))
        .path("/api/v1/auth")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(REFRESH_TOKEN_DAYS))
        .build();
    CookieJar::new().add(refresh)
}

fn clear_refresh_cookie() -> CookieJar {
    let refresh = Cookie::build(("refresh_token", ""))
        .path("/api/v1/auth")
        .max_age(time::Duration::ZERO)
        .build();
    CookieJar::new().add(refresh)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Option<String> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    (!valid).then(|| "A valid email address is required".to_string())
}

fn validate_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        Some("Name is required".to_string())
    } else if name.chars().count() > MAX_NAME_LEN {
        Some(format!("Name must be at most {MAX_NAME_LEN} characters"))
    } else {
        None
    }
}

/// Issue an access token and a fresh refresh token for `user`.
async fn issue_session(
    state: &SharedState,
    user: User,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let access_token = encode_token(&Claims::new(user.id, &user.name), &state.config.jwt_secret)
        .map_err(AppError::Internal)?;

    let refresh = generate_opaque_token();
    db::refresh_tokens::create(
        &state.pool,
        user.id,
        &hash_token(&refresh),
        Utc::now() + Duration::days(REFRESH_TOKEN_DAYS),
    )
    .await?;

    Ok((
        refresh_cookie(&refresh),
        Json(AuthResponse {
            access_token,
            refresh_token: refresh,
            user,
        }),
    ))
}

pub async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    if state.config.registration == RegistrationMode::Closed {
        return Err(AppError::Forbidden(
            "Registration is disabled. Contact your administrator.".to_string(),
        ));
    }

    let email = normalize_email(&req.email);
    let mut problems: Vec<String> = [validate_email(&email), validate_name(&req.name)]
        .into_iter()
        .flatten()
        .collect();
    problems.extend(password::policy_violations(
        &req.password,
        state.config.password_min_length,
    ));
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let pw_hash = password::hash(&req.password).map_err(AppError::Internal)?;

    let user = db::users::create(&state.pool, &email, &pw_hash, req.name.trim())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("An account with this email already exists".to_string())
            }
            _ => AppError::Database(e),
        })?;

    tracing::info!(user_id = %user.id, "User registered");

    if let Some(mailer) = state.system_mailer.clone() {
        let (to, name, base_url) = (user.email.clone(), user.name.clone(), state.config.base_url.clone());
        tokio::spawn(async move {
            if let Err(e) = mailer.send_welcome(&to, &name, &base_url).await {
                tracing::warn!("Failed to send welcome email: {e}");
            }
        });
    }

    issue_session(&state, user).await
}

pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let email = normalize_email(&req.email);

    if state.login_limiter.check(&email).is_err() {
        return Err(AppError::RateLimited(
            "Too many login attempts. Please try again later.".to_string(),
        ));
    }

    let Some(user) = db::users::find_by_email(&state.pool, &email).await? else {
        state.login_limiter.record_failure(&email);
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    let valid = password::verify(&req.password, &user.password_hash).map_err(AppError::Internal)?;
    if !valid {
        state.login_limiter.record_failure(&email);
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    state.login_limiter.reset(&email);
    issue_session(&state, user).await
}

pub async fn refresh(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let refresh_value = jar
        .get("refresh_token")
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Missing refresh token".to_string()))?;

    let stored = db::refresh_tokens::find_by_hash(&state.pool, &hash_token(&refresh_value))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid refresh token".to_string()))?;

    if stored.used {
        tracing::warn!(
            "Refresh token reuse detected for user {}. Revoking all sessions.",
            stored.user_id
        );
        db::refresh_tokens::delete_all_for_user(&state.pool, stored.user_id).await?;
        return Err(AppError::Unauthorized(
            "Refresh token reuse detected. All sessions revoked.".to_string(),
        ));
    }

    if stored.is_expired() {
        return Err(AppError::Unauthorized("Refresh token expired".to_string()));
    }

    let user = db::users::find_by_id(&state.pool, stored.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    let new_refresh = generate_opaque_token();
    db::refresh_tokens::rotate(
        &state.pool,
        stored.id,
        user.id,
        &hash_token(&new_refresh),
        Utc::now() + Duration::days(REFRESH_TOKEN_DAYS),
    )
    .await?
    .ok_or_else(|| AppError::Unauthorized("Refresh token already used".to_string()))?;

    let access_token = encode_token(&Claims::new(user.id, &user.name), &state.config.jwt_secret)
        .map_err(AppError::Internal)?;

    Ok((
        refresh_cookie(&new_refresh),
        Json(AuthResponse {
            access_token,
            refresh_token: new_refresh,
            user,
        }),
    ))
}

pub async fn logout(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    if let Some(cookie) = jar.get("refresh_token") {
        db::refresh_tokens::delete_by_hash(&state.pool, &hash_token(cookie.value())).await?;
    }

    Ok((
        clear_refresh_cookie(),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

pub async fn me(auth: AuthUser, State(state): State<SharedState>) -> Result<Json<User>, AppError> {
    let user = db::users::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;
    Ok(Json(user))
}

pub async fn update_me(
    auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    let current = db::users::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    let name = req.name.unwrap_or(current.name);
    let avatar_url = req.avatar_url.or(current.avatar_url);
    let bio = req.bio.or(current.bio);

    let mut problems: Vec<String> = validate_name(&name).into_iter().collect();
    if bio.as_deref().is_some_and(|b| b.chars().count() > 1000) {
        problems.push("Bio must be at most 1000 characters".to_string());
    }
    if let Some(url) = avatar_url.as_deref() {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            problems.push("Avatar URL must be an http(s) URL".to_string());
        }
    }
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let user = db::users::update_profile(
        &state.pool,
        auth.user_id,
        name.trim(),
        avatar_url.as_deref(),
        bio.as_deref(),
    )
    .await?;
    Ok(Json(user))
}

pub async fn forgot_password(
    State(state): State<SharedState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    // Always return 200 to not reveal whether email exists
    let response = Json(MessageResponse {
        message: "If that email is registered, a reset link has been sent.".to_string(),
    });

    let pool = state.pool.clone();
    let mailer = state.system_mailer.clone();
    let base_url = state.config.base_url.clone();
    let email = normalize_email(&req.email);

    tokio::spawn(async move {
        let Ok(Some(user)) = db::users::find_by_email(&pool, &email).await else {
            return;
        };

        let token = generate_opaque_token();
        let created = db::password_reset_tokens::create(
            &pool,
            user.id,
            &hash_token(&token),
            Utc::now() + Duration::hours(1),
        )
        .await;

        if let Err(e) = created {
            tracing::error!("Failed to store password reset token: {e}");
            return;
        }

        match mailer {
            Some(mailer) => {
                let reset_url = format!("{base_url}/reset-password?token={token}");
                if let Err(e) = mailer.send_password_reset(&user.email, &reset_url).await {
                    tracing::error!("Failed to send password reset email: {e}");
                }
            }
            None => tracing::warn!(
                user_id = %user.id,
                "System SMTP not configured; password reset email not sent"
            ),
        }
    });

    Ok(response)
}

pub async fn reset_password(
    State(state): State<SharedState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let problems = password::policy_violations(&req.password, state.config.password_min_length);
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let reset_token = db::password_reset_tokens::consume(&state.pool, &hash_token(&req.token))
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".to_string()))?;

    let pw_hash = password::hash(&req.password).map_err(AppError::Internal)?;
    db::users::update_password(&state.pool, reset_token.user_id, &pw_hash).await?;

    db::refresh_tokens::delete_all_for_user(&state.pool, reset_token.user_id).await?;

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

pub async fn change_password(
    auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let problems =
        password::policy_violations(&req.new_password, state.config.password_min_length);
    if !problems.is_empty() {
        return Err(AppError::validation(problems));
    }

    let user = db::users::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    let valid = password::verify(&req.current_password, &user.password_hash)
        .map_err(AppError::Internal)?;
    if !valid {
        return Err(AppError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }

    let pw_hash = password::hash(&req.new_password).map_err(AppError::Internal)?;
    db::users::update_password(&state.pool, user.id, &pw_hash).await?;

    // Every other session dies with the old password
    db::refresh_tokens::delete_all_for_user(&state.pool, user.id).await?;

    tracing::info!(user_id = %user.id, "Password changed");
    issue_session(&state, user).await
}
