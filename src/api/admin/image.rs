use std::path::Path as FsPath;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Extension, Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use sea_orm::{EntityTrait, TransactionTrait};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::entities::variant_image::{self, ImageRole};
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::services::catalog;
use crate::services::images::{
    self, allowed_extension, is_stored_file_name, ImageChanges, NewImage, UPLOADS_URL_PREFIX,
};
use crate::state::AppState;

const MAX_BULK_FILES: usize = 20;
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn admin_image_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .uploads
        .file_size_limit
        .saturating_mul(MAX_BULK_FILES)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/products/:id/images",
            get(list_images).post(create_image),
        )
        .route(
            "/products/:id/images/bulk",
            post(bulk_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/images/:id", put(update_image).delete(delete_image))
        .layer(Extension(state))
}

async fn list_images(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    catalog::find_product(db, id).await?;

    Ok(Json(catalog::images_of(db, id, None).await?))
}

async fn create_image(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<CreateImage>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    catalog::find_product(&txn, id).await?;

    let created = images::create_image(
        &txn,
        id,
        NewImage {
            color: payload.color.trim().to_owned(),
            image_url: payload.image_url,
            role: payload.role.unwrap_or_default(),
            sort_order: payload.sort_order,
        },
    )
    .await?;
    txn.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_image(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<UpdateImage>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let updated = images::update_image(
        &txn,
        id,
        ImageChanges {
            color: payload.color.map(|color| color.trim().to_owned()),
            image_url: payload.image_url,
            role: payload.role,
            sort_order: payload.sort_order,
        },
    )
    .await?;
    txn.commit().await?;

    Ok(Json(updated))
}

async fn delete_image(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let image = variant_image::Entity::find_by_id(id)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_owned()))?;

    variant_image::Entity::delete_by_id(image.id)
        .exec(state.db.as_ref())
        .await?;

    if let Some(file_name) = image
        .image_url
        .strip_prefix(UPLOADS_URL_PREFIX)
        .filter(|name| is_stored_file_name(name))
    {
        let path = FsPath::new(&state.config.uploads.dir).join(file_name);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), "Failed to remove upload: {err}");
        }
    }

    Ok(Json(json!({ "message": "Image deleted" })))
}

struct PendingFile {
    extension: &'static str,
    data: Bytes,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Payload too large".to_owned())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Multipart upload of one or more `files` for a color. The optional `role`
/// goes to the first file; the rest join the gallery.
async fn bulk_upload(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.config.uploads.file_size_limit;

    let mut color: Option<String> = None;
    let mut role: Option<ImageRole> = None;
    let mut files: Vec<PendingFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "color" => {
                let value = field.text().await.map_err(multipart_error)?;
                color = Some(value.trim().to_owned()).filter(|value| !value.is_empty());
            }
            "role" => {
                let value = field.text().await.map_err(multipart_error)?;
                let value = value.trim();
                if !value.is_empty() {
                    role = Some(value.parse().map_err(ApiError::BadRequest)?);
                }
            }
            "files" => {
                let content_type = field
                    .content_type()
                    .ok_or_else(|| ApiError::BadRequest("Content type is not set.".to_owned()))?
                    .to_owned();
                let extension = allowed_extension(&content_type).ok_or_else(|| {
                    ApiError::BadRequest("Only JPEG and PNG images are allowed.".to_owned())
                })?;

                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() > limit {
                    return Err(ApiError::PayloadTooLarge("Payload too large".to_owned()));
                }
                if files.len() == MAX_BULK_FILES {
                    return Err(ApiError::BadRequest(format!(
                        "At most {MAX_BULK_FILES} files per upload"
                    )));
                }
                files.push(PendingFile { extension, data });
            }
            _ => {}
        }
    }

    let color = color.ok_or_else(|| ApiError::BadRequest("color is required".to_owned()))?;
    if files.is_empty() {
        return Err(ApiError::BadRequest("At least one file is required".to_owned()));
    }

    let txn = state.db.begin().await?;
    catalog::find_product(&txn, id).await?;

    let mut created = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let image_url = images::store_upload(&state.config.uploads.dir, file.extension, &file.data)
            .await
            .map_err(|err| ApiError::Internal(format!("Failed to store upload: {err}")))?;

        let role = match index {
            0 => role.unwrap_or_default(),
            _ => ImageRole::Gallery,
        };
        let image = images::create_image(
            &txn,
            id,
            NewImage {
                color: color.clone(),
                image_url,
                role,
                sort_order: None,
            },
        )
        .await?;
        created.push(image);
    }
    txn.commit().await?;

    info!(product_id = id, count = created.len(), "Images uploaded");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize, Validate)]
struct CreateImage {
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "color is required"))]
    color: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 500, message = "image_url is required"))]
    image_url: String,
    role: Option<ImageRole>,
    #[validate(range(min = 0))]
    sort_order: Option<i32>,
}

#[derive(Deserialize, Validate)]
struct UpdateImage {
    #[validate(length(min = 1, max = 50, message = "color must not be empty"))]
    color: Option<String>,
    #[validate(length(min = 1, max = 500, message = "image_url must not be empty"))]
    image_url: Option<String>,
    role: Option<ImageRole>,
    #[validate(range(min = 0))]
    sort_order: Option<i32>,
}
