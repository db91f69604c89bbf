use axum::{extract::Extension, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde::Deserialize;
use validator::Validate;

use crate::entities::user;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub fn profile_router(state: AppState) -> Router {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .layer(Extension(state))
}

async fn get_profile(Extension(auth): Extension<AuthContext>) -> impl IntoResponse {
    Json(auth.user)
}

async fn update_profile(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<UpdateProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let mut active: user::ActiveModel = auth.user.into();
    if let Some(name) = payload.name {
        active.name = Set(Some(name.trim().to_owned()));
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(Some(phone.trim().to_owned()));
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(state.db.as_ref()).await?;
    Ok(Json(updated))
}

#[derive(Deserialize, Validate)]
struct UpdateProfile {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    name: Option<String>,
    #[validate(length(min = 7, max = 15, message = "phone must be 7-15 characters"))]
    phone: Option<String>,
}
