use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set, TransactionTrait};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::entities::{product, variant};
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::services::catalog;
use crate::state::AppState;

pub fn admin_product_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/products/:id/duplicate", post(duplicate_product))
        .route(
            "/products/:id/variants",
            get(list_variants).post(create_variant),
        )
        .route("/variants/:id", put(update_variant).delete(delete_variant))
        .layer(Extension(state))
}

fn non_negative(field: &str, value: Option<Decimal>) -> Result<(), ApiError> {
    match value {
        Some(value) if value.is_sign_negative() => {
            Err(ApiError::BadRequest(format!("{field} must not be negative")))
        }
        _ => Ok(()),
    }
}

async fn list_products(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let products = product::Entity::find()
        .order_by_asc(product::Column::Id)
        .all(state.db.as_ref())
        .await?;
    Ok(Json(products))
}

async fn get_product(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    let product = catalog::find_product(db, id).await?;
    let variants = catalog::variants_of(db, id).await?;
    let images = catalog::images_of(db, id, None).await?;

    Ok(Json(json!({
        "product": product,
        "variants": variants,
        "images": images,
    })))
}

async fn create_product(
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<CreateProduct>,
) -> Result<impl IntoResponse, ApiError> {
    non_negative("price", payload.price)?;
    let name = payload.name.trim().to_owned();

    let txn = state.db.begin().await?;
    catalog::ensure_unique_name(&txn, &name, None).await?;

    let created = product::ActiveModel {
        name: Set(name),
        description: Set(payload.description),
        price: Set(payload.price.unwrap_or_default().round_dp(2)),
        category: Set(payload.category),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(product_id = created.id, "Product created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_product(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<UpdateProduct>,
) -> Result<impl IntoResponse, ApiError> {
    non_negative("price", payload.price)?;

    let txn = state.db.begin().await?;
    let existing = catalog::find_product(&txn, id).await?;

    let mut active: product::ActiveModel = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_owned();
        catalog::ensure_unique_name(&txn, &name, Some(id)).await?;
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price.round_dp(2));
    }
    if let Some(category) = payload.category {
        active.category = Set(Some(category));
    }

    let updated = active.update(&txn).await?;
    txn.commit().await?;

    Ok(Json(updated))
}

async fn delete_product(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let existing = catalog::find_product(&txn, id).await?;
    catalog::ensure_deletable(&txn, existing.id).await?;

    product::Entity::delete_by_id(existing.id).exec(&txn).await?;
    txn.commit().await?;

    info!(product_id = id, "Product deleted");
    Ok(Json(json!({ "message": "Product deleted" })))
}

async fn duplicate_product(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let copy = catalog::duplicate_product(&txn, id).await?;
    txn.commit().await?;

    info!(source_id = id, product_id = copy.id, "Product duplicated");
    Ok((StatusCode::CREATED, Json(copy)))
}

async fn list_variants(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    catalog::find_product(db, id).await?;

    Ok(Json(catalog::variants_of(db, id).await?))
}

async fn create_variant(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<CreateVariant>,
) -> Result<impl IntoResponse, ApiError> {
    non_negative("price_override", payload.price_override)?;
    let color = payload.color.trim().to_owned();
    let size = payload.size.trim().to_owned();

    let txn = state.db.begin().await?;
    catalog::find_product(&txn, id).await?;
    catalog::ensure_unique_variant(&txn, id, &color, &size, None).await?;

    let created = variant::ActiveModel {
        product_id: Set(id),
        color: Set(color),
        size: Set(size),
        stock: Set(payload.stock.unwrap_or(0)),
        price_override: Set(payload.price_override.map(|price| price.round_dp(2))),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_variant(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<UpdateVariant>,
) -> Result<impl IntoResponse, ApiError> {
    non_negative("price_override", payload.price_override)?;

    let txn = state.db.begin().await?;
    let existing = variant::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| ApiError::NotFound("Variant not found".to_owned()))?;

    let color = payload
        .color
        .map(|color| color.trim().to_owned())
        .unwrap_or_else(|| existing.color.clone());
    let size = payload
        .size
        .map(|size| size.trim().to_owned())
        .unwrap_or_else(|| existing.size.clone());
    catalog::ensure_unique_variant(&txn, existing.product_id, &color, &size, Some(id)).await?;

    let mut active: variant::ActiveModel = existing.into();
    active.color = Set(color);
    active.size = Set(size);
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if payload.clear_price_override {
        active.price_override = Set(None);
    } else if let Some(price) = payload.price_override {
        active.price_override = Set(Some(price.round_dp(2)));
    }

    let updated = active.update(&txn).await?;
    txn.commit().await?;

    Ok(Json(updated))
}

async fn delete_variant(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let result = variant::Entity::delete_by_id(id)
        .exec(state.db.as_ref())
        .await?;
    if result.rows_affected == 0 {
        return Err(ApiError::NotFound("Variant not found".to_owned()));
    }

    Ok(Json(json!({ "message": "Variant deleted" })))
}

#[derive(Deserialize, Validate)]
struct CreateProduct {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    name: String,
    description: Option<String>,
    #[validate(required(message = "price is required"))]
    price: Option<Decimal>,
    #[validate(length(max = 100))]
    category: Option<String>,
}

#[derive(Deserialize, Validate)]
struct UpdateProduct {
    #[validate(length(min = 1, max = 200, message = "name must not be empty"))]
    name: Option<String>,
    description: Option<String>,
    price: Option<Decimal>,
    #[validate(length(max = 100))]
    category: Option<String>,
}

#[derive(Deserialize, Validate)]
struct CreateVariant {
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "color is required"))]
    color: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 20, message = "size is required"))]
    size: String,
    #[validate(range(min = 0, message = "stock must not be negative"))]
    stock: Option<i32>,
    price_override: Option<Decimal>,
}

#[derive(Deserialize, Validate)]
struct UpdateVariant {
    #[validate(length(min = 1, max = 50, message = "color must not be empty"))]
    color: Option<String>,
    #[validate(length(min = 1, max = 20, message = "size must not be empty"))]
    size: Option<String>,
    #[validate(range(min = 0, message = "stock must not be negative"))]
    stock: Option<i32>,
    price_override: Option<Decimal>,
    #[serde(default)]
    clear_price_override: bool,
}
