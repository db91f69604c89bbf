use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

use crate::entities::{
    order_item, product, variant,
    variant_image::{self, ImageRole},
};
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;
const SIMILAR_LIMIT: u64 = 4;

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductPage {
    pub products: Vec<ProductSummary>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct SizeOption {
    pub variant_id: i32,
    pub size: String,
    pub stock: i32,
    pub price_override: Option<Decimal>,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ColorGroup {
    pub color: String,
    pub images: Vec<String>,
    pub sizes: Vec<SizeOption>,
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    pub product: ProductSummary,
    pub colors: Vec<ColorGroup>,
    pub similar: Vec<ProductSummary>,
}

fn summary(product: product::Model, thumbnail: Option<String>) -> ProductSummary {
    ProductSummary {
        id: product.id,
        name: product.name,
        description: product.description,
        price: product.price.round_dp(2),
        category: product.category,
        thumbnail,
    }
}

/// First thumbnail (by sort order) of each product.
async fn thumbnails<C: ConnectionTrait>(
    db: &C,
    product_ids: Vec<i32>,
) -> Result<HashMap<i32, String>, DbErr> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let images = variant_image::Entity::find()
        .filter(variant_image::Column::ProductId.is_in(product_ids))
        .filter(variant_image::Column::Role.eq(ImageRole::Thumbnail))
        .order_by_asc(variant_image::Column::SortOrder)
        .order_by_asc(variant_image::Column::Id)
        .all(db)
        .await?;

    let mut map = HashMap::new();
    for image in images {
        map.entry(image.product_id).or_insert(image.image_url);
    }
    Ok(map)
}

async fn summaries<C: ConnectionTrait>(
    db: &C,
    products: Vec<product::Model>,
) -> Result<Vec<ProductSummary>, DbErr> {
    let mut thumbs = thumbnails(db, products.iter().map(|p| p.id).collect()).await?;
    Ok(products
        .into_iter()
        .map(|p| {
            let thumb = thumbs.remove(&p.id);
            summary(p, thumb)
        })
        .collect())
}

pub async fn list_products<C: ConnectionTrait>(
    db: &C,
    filter: ProductFilter,
) -> Result<ProductPage, DbErr> {
    let page = filter.page.unwrap_or(1).max(1);
    let page_size = filter
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let mut query = product::Entity::find().order_by_asc(product::Column::Id);
    if let Some(category) = filter.category.filter(|c| !c.is_empty()) {
        query = query.filter(product::Column::Category.eq(category));
    }

    let paginator = query.paginate(db, page_size);
    let total = paginator.num_items().await?;
    let products = paginator.fetch_page(page - 1).await?;

    Ok(ProductPage {
        products: summaries(db, products).await?,
        page,
        page_size,
        total,
    })
}

pub async fn find_product<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<product::Model, ApiError> {
    product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_owned()))
}

pub async fn variants_of<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<Vec<variant::Model>, DbErr> {
    variant::Entity::find()
        .filter(variant::Column::ProductId.eq(product_id))
        .order_by_asc(variant::Column::Id)
        .all(db)
        .await
}

pub async fn images_of<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    color: Option<&str>,
) -> Result<Vec<variant_image::Model>, DbErr> {
    let mut query =
        variant_image::Entity::find().filter(variant_image::Column::ProductId.eq(product_id));
    if let Some(color) = color.filter(|c| !c.is_empty()) {
        query = query.filter(variant_image::Column::Color.eq(color));
    }

    query
        .order_by_asc(variant_image::Column::SortOrder)
        .order_by_asc(variant_image::Column::Id)
        .all(db)
        .await
}

/// Product page: variants grouped by color (in first-seen order) with that
/// color's images, plus a few products from the same category.
pub async fn product_detail<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<ProductDetail, ApiError> {
    let product = find_product(db, product_id).await?;
    let variants = variants_of(db, product_id).await?;
    let images = images_of(db, product_id, None).await?;

    let mut colors: Vec<ColorGroup> = Vec::new();
    for variant in variants {
        let index = match colors.iter().position(|group| group.color == variant.color) {
            Some(index) => index,
            None => {
                colors.push(ColorGroup {
                    color: variant.color.clone(),
                    images: images
                        .iter()
                        .filter(|image| image.color == variant.color)
                        .map(|image| image.image_url.clone())
                        .collect(),
                    sizes: Vec::new(),
                });
                colors.len() - 1
            }
        };

        colors[index].sizes.push(SizeOption {
            variant_id: variant.id,
            price: variant.unit_price(product.price),
            size: variant.size,
            stock: variant.stock,
            price_override: variant.price_override.map(|p| p.round_dp(2)),
        });
    }

    let similar = match &product.category {
        Some(category) => {
            product::Entity::find()
                .filter(product::Column::Category.eq(category.as_str()))
                .filter(product::Column::Id.ne(product.id))
                .order_by_asc(product::Column::Id)
                .limit(SIMILAR_LIMIT)
                .all(db)
                .await?
        }
        None => Vec::new(),
    };

    let mut thumbs = thumbnails(db, vec![product.id]).await?;
    let thumbnail = thumbs.remove(&product.id);

    Ok(ProductDetail {
        product: summary(product, thumbnail),
        colors,
        similar: summaries(db, similar).await?,
    })
}

pub async fn ensure_unique_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
    except: Option<i32>,
) -> Result<(), ApiError> {
    let mut query = product::Entity::find().filter(product::Column::Name.eq(name));
    if let Some(id) = except {
        query = query.filter(product::Column::Id.ne(id));
    }

    if query.one(db).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "A product named {name} already exists"
        )));
    }
    Ok(())
}

/// Products referenced by any order cannot be deleted.
pub async fn ensure_deletable<C: ConnectionTrait>(db: &C, product_id: i32) -> Result<(), ApiError> {
    let referenced = order_item::Entity::find()
        .filter(order_item::Column::ProductId.eq(product_id))
        .count(db)
        .await?;

    if referenced > 0 {
        return Err(ApiError::Conflict(
            "Product is referenced by existing orders".to_owned(),
        ));
    }
    Ok(())
}

pub async fn ensure_unique_variant<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    color: &str,
    size: &str,
    except: Option<i32>,
) -> Result<(), ApiError> {
    let mut query = variant::Entity::find()
        .filter(variant::Column::ProductId.eq(product_id))
        .filter(variant::Column::Color.eq(color))
        .filter(variant::Column::Size.eq(size));
    if let Some(id) = except {
        query = query.filter(variant::Column::Id.ne(id));
    }

    if query.one(db).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Variant {color}/{size} already exists for this product"
        )));
    }
    Ok(())
}

/// Picks "<name> (Copy)", then "<name> (Copy 2)", ... until unused.
async fn copy_name<C: ConnectionTrait>(db: &C, name: &str) -> Result<String, DbErr> {
    let mut candidate = format!("{name} (Copy)");
    let mut n = 2;
    while product::Entity::find()
        .filter(product::Column::Name.eq(candidate.as_str()))
        .one(db)
        .await?
        .is_some()
    {
        candidate = format!("{name} (Copy {n})");
        n += 1;
    }
    Ok(candidate)
}

/// Deep-copies a product with its variants and images under a new id.
pub async fn duplicate_product<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<product::Model, ApiError> {
    let source = find_product(db, product_id).await?;

    let copy = product::ActiveModel {
        name: Set(copy_name(db, &source.name).await?),
        description: Set(source.description.clone()),
        price: Set(source.price),
        category: Set(source.category.clone()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    for v in variants_of(db, source.id).await? {
        variant::ActiveModel {
            product_id: Set(copy.id),
            color: Set(v.color),
            size: Set(v.size),
            stock: Set(v.stock),
            price_override: Set(v.price_override),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    for image in images_of(db, source.id, None).await? {
        variant_image::ActiveModel {
            product_id: Set(copy.id),
            color: Set(image.color),
            image_url: Set(image.image_url),
            role: Set(image.role),
            sort_order: Set(image.sort_order),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(copy)
}
