//! Variant images and their roles.
//!
//! At most one `primary` image per (product, color) and one `thumbnail` per
//! product. Assigning either role demotes the previous holder to `gallery`.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entities::variant_image::{self, ImageRole};
use crate::error::ApiError;

/// Public URL prefix under which stored uploads are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads/";

#[derive(Clone, Debug)]
pub struct NewImage {
    pub color: String,
    pub image_url: String,
    pub role: ImageRole,
    pub sort_order: Option<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct ImageChanges {
    pub color: Option<String>,
    pub image_url: Option<String>,
    pub role: Option<ImageRole>,
    pub sort_order: Option<i32>,
}

/// Demotes whoever else holds `role` in its scope.
pub async fn demote_conflicting<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    color: &str,
    role: ImageRole,
    except: Option<i32>,
) -> Result<(), DbErr> {
    let mut query = variant_image::Entity::update_many()
        .col_expr(
            variant_image::Column::Role,
            Expr::value(ImageRole::Gallery),
        )
        .filter(variant_image::Column::ProductId.eq(product_id))
        .filter(variant_image::Column::Role.eq(role));

    match role {
        ImageRole::Primary => {
            query = query.filter(variant_image::Column::Color.eq(color));
        }
        ImageRole::Thumbnail => {}
        ImageRole::Gallery => return Ok(()),
    }
    if let Some(id) = except {
        query = query.filter(variant_image::Column::Id.ne(id));
    }

    query.exec(db).await?;
    Ok(())
}

async fn next_sort_order<C: ConnectionTrait>(db: &C, product_id: i32) -> Result<i32, DbErr> {
    let last = variant_image::Entity::find()
        .filter(variant_image::Column::ProductId.eq(product_id))
        .order_by_desc(variant_image::Column::SortOrder)
        .one(db)
        .await?;
    Ok(last.map(|image| image.sort_order + 1).unwrap_or(0))
}

pub async fn create_image<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    input: NewImage,
) -> Result<variant_image::Model, DbErr> {
    demote_conflicting(db, product_id, &input.color, input.role, None).await?;

    let sort_order = match input.sort_order {
        Some(order) => order,
        None => next_sort_order(db, product_id).await?,
    };

    variant_image::ActiveModel {
        product_id: Set(product_id),
        color: Set(input.color),
        image_url: Set(input.image_url),
        role: Set(input.role),
        sort_order: Set(sort_order),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn update_image<C: ConnectionTrait>(
    db: &C,
    image_id: i32,
    changes: ImageChanges,
) -> Result<variant_image::Model, ApiError> {
    let image = variant_image::Entity::find_by_id(image_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_owned()))?;

    let color = changes.color.unwrap_or_else(|| image.color.clone());
    let role = changes.role.unwrap_or(image.role);
    demote_conflicting(db, image.product_id, &color, role, Some(image.id)).await?;

    let mut active: variant_image::ActiveModel = image.into();
    active.color = Set(color);
    active.role = Set(role);
    if let Some(url) = changes.image_url {
        active.image_url = Set(url);
    }
    if let Some(order) = changes.sort_order {
        active.sort_order = Set(order);
    }

    Ok(active.update(db).await?)
}

/// File extension for the upload content types we accept.
pub fn allowed_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// Writes an upload under a fresh uuid name and returns its public URL.
pub async fn store_upload(dir: &str, extension: &str, data: &[u8]) -> std::io::Result<String> {
    tokio::fs::create_dir_all(dir).await?;

    let file_name = format!("{}.{extension}", Uuid::new_v4());
    tokio::fs::write(Path::new(dir).join(&file_name), data).await?;

    Ok(format!("{UPLOADS_URL_PREFIX}{file_name}"))
}

static STORED_FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.(jpg|png)$")
        .expect("valid regex")
});

/// Stored file names are `<uuid>.<ext>`; anything else is not ours to serve.
pub fn is_stored_file_name(name: &str) -> bool {
    STORED_FILE_NAME.is_match(name)
}
