use axum::{
    extract::Extension,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::identity::ensure_user;
use crate::middleware::auth::{extract_token, ACCESS_TOKEN_COOKIE};
use crate::state::AppState;

pub fn auth_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/check-verification", get(check_verification))
        .route("/admin/auth", post(admin_login))
        .layer(Extension(state))
}

async fn register(
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<RegisterPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let identity = state.identity.sign_up(&email, &payload.password).await?;

    let user = ensure_user(state.db.as_ref(), &identity, Some(payload.name.trim().to_owned())).await?;
    info!(user_id = %user.id, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration successful. Please verify your email.",
            "user_id": user.id,
        })),
    ))
}

async fn login(
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<LoginPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let session = state.identity.sign_in(&email, &payload.password).await?;
    ensure_user(state.db.as_ref(), &session.user, None).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "access_token": session.access_token,
    })))
}

async fn check_verification(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_token(&headers)
        .ok_or_else(|| ApiError::Unauthenticated("Missing access token".to_owned()))?;
    let identity = state.identity.get_user(token).await?;

    Ok(Json(json!({ "verified": identity.email_confirmed })))
}

async fn admin_login(
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<LoginPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if !state.config.is_admin_email(&email) {
        return Err(ApiError::Forbidden("Not an admin account".to_owned()));
    }

    let session = state.identity.sign_in(&email, &payload.password).await?;
    ensure_user(state.db.as_ref(), &session.user, None).await?;

    let cookie = format!(
        "{ACCESS_TOKEN_COOKIE}={}; HttpOnly; Path=/; SameSite=Lax",
        session.access_token
    );
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|_| ApiError::Internal("Invalid session token".to_owned()))?;

    info!(email = %email, "Admin signed in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Admin login successful" })),
    ))
}

#[derive(Deserialize, Validate)]
struct RegisterPayload {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    name: String,
    #[serde(default)]
    #[validate(email(message = "a valid email is required"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    password: String,
}

#[derive(Deserialize, Validate)]
struct LoginPayload {
    #[serde(default)]
    #[validate(email(message = "a valid email is required"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}
