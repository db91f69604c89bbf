use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::services::catalog::{self, ProductFilter};
use crate::state::AppState;

pub fn product_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(get_products))
        .route("/products/:id", get(get_product))
        .route("/products/:id/variants", get(get_variants))
        .route("/products/:id/images", get(get_images))
        .layer(Extension(state))
}

async fn get_products(
    Query(filter): Query<ProductFilter>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let page = catalog::list_products(state.db.as_ref(), filter).await?;
    Ok(Json(page))
}

async fn get_product(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = catalog::product_detail(state.db.as_ref(), id).await?;
    Ok(Json(detail))
}

async fn get_variants(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    catalog::find_product(db, id).await?;

    Ok(Json(catalog::variants_of(db, id).await?))
}

async fn get_images(
    Path(id): Path<i32>,
    Query(params): Query<ImagesQuery>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    catalog::find_product(db, id).await?;

    Ok(Json(catalog::images_of(db, id, params.color.as_deref()).await?))
}

#[derive(Deserialize)]
struct ImagesQuery {
    color: Option<String>,
}
