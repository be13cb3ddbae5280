use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, MessageResponse, PasswordResetConfirm,
            PasswordResetRequest, PublicUser, RefreshRequest, RegisterRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password_async, verify_password_async, MIN_PASSWORD_LEN},
        repo_types::User,
        services::{
            is_valid_email, issue_tokens, normalize_email, reset_link, validate_login,
            validate_registration, INVALID_EMAIL,
        },
    },
    error::{is_unique_violation, ApiError, ApiResult},
    state::AppState,
};

const EMAIL_IN_USE: &str = "Email is already in use.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/password-reset", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    validate_registration(&payload)?;
    let email = normalize_email(&payload.email);

    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::Conflict(EMAIL_IN_USE.into()));
    }

    let hash = hash_password_async(payload.password).await?;
    let user = match User::create(&state.db, payload.full_name.trim(), &email, &hash).await {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            warn!(%email, "email registered concurrently");
            return Err(ApiError::Conflict(EMAIL_IN_USE.into()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    let keys = JwtKeys::from_ref(&state);
    Ok((StatusCode::CREATED, Json(issue_tokens(&keys, user)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    validate_login(&payload)?;
    let email = normalize_email(&payload.email);

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(%email, "login unknown email");
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !verify_password_async(payload.password, user.password_hash.clone()).await? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(issue_tokens(&keys, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    if user.token_is_stale(claims.iat) {
        warn!(user_id = %user.id, "refresh token predates password change");
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }

    Ok(Json(issue_tokens(&keys, user)?))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation(INVALID_EMAIL));
    }

    match User::find_by_email(&state.db, &email).await? {
        Some(user) => {
            let keys = JwtKeys::from_ref(&state);
            let token = keys.sign_reset(user.id)?;
            let link = reset_link(&state.config.public_base_url, &token);
            state.notifier.send_reset_link(user.id, &user.email, &link).await?;
        }
        None => info!(%email, "password reset for unknown email"),
    }

    Ok(Json(MessageResponse {
        message: format!("Password reset link sent to {}", email),
    }))
}

#[instrument(skip(state, payload))]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetConfirm>,
) -> ApiResult<Json<MessageResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_reset(&payload.token)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    if payload.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 6 characters."));
    }

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    if user.token_is_stale(claims.iat) {
        warn!(user_id = %user.id, "reset link reused");
        return Err(ApiError::unauthorized("Reset link is no longer valid"));
    }

    let hash = hash_password_async(payload.new_password).await?;
    if !User::update_password(&state.db, user.id, &hash).await? {
        return Err(ApiError::unauthorized("User not found"));
    }

    info!(user_id = %claims.sub, "password reset");
    Ok(Json(MessageResponse {
        message: "Password has been reset".into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<PublicUser>> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    Ok(Json(user.into()))
}
