use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::{cart, cart_item, product, variant};
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("Product not found")]
    ProductNotFound,
    #[error("Variant not found")]
    VariantNotFound,
    #[error("Variant does not belong to this product")]
    VariantMismatch,
    #[error("Insufficient stock for variant {variant_id}: {available} available")]
    InsufficientStock { variant_id: i32, available: i32 },
    #[error("Invalid quantity")]
    InvalidQuantity,
    #[error("Item not found")]
    ItemNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ProductNotFound | CartError::VariantNotFound | CartError::ItemNotFound => {
                ApiError::NotFound(err.to_string())
            }
            CartError::VariantMismatch
            | CartError::InsufficientStock { .. }
            | CartError::InvalidQuantity => ApiError::BadRequest(err.to_string()),
            CartError::Unauthorized => ApiError::Forbidden(err.to_string()),
            CartError::Database(err) => err.into(),
        }
    }
}

pub struct AddItem {
    pub product_id: i32,
    pub variant_id: Option<i32>,
    pub quantity: i32,
}

/// One cart line joined with its catalog rows.
#[derive(Clone, Debug)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub product: product::Model,
    pub variant: Option<variant::Model>,
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub variant_id: Option<i32>,
    pub variant_color: Option<String>,
    pub variant_size: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub cart: Vec<CartLineView>,
    pub total: Decimal,
}

pub async fn find_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, DbErr> {
    cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn get_or_create_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<cart::Model, DbErr> {
    if let Some(cart) = find_cart(db, user_id).await? {
        return Ok(cart);
    }

    let now = Utc::now();
    cart::ActiveModel {
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Loads a product and, when given, a variant that must belong to it.
pub async fn resolve_product<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
    variant_id: Option<i32>,
) -> Result<(product::Model, Option<variant::Model>), CartError> {
    let product = product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or(CartError::ProductNotFound)?;

    let variant = match variant_id {
        Some(id) => {
            let variant = variant::Entity::find_by_id(id)
                .one(db)
                .await?
                .ok_or(CartError::VariantNotFound)?;
            if variant.product_id != product.id {
                return Err(CartError::VariantMismatch);
            }
            Some(variant)
        }
        None => None,
    };

    Ok((product, variant))
}

pub fn ensure_stock(variant: Option<&variant::Model>, quantity: i32) -> Result<(), CartError> {
    match variant {
        Some(variant) if variant.stock < quantity => Err(CartError::InsufficientStock {
            variant_id: variant.id,
            available: variant.stock,
        }),
        _ => Ok(()),
    }
}

/// Adds a line or merges into the matching one. A merged line keeps the price
/// it was first added at.
pub async fn add_item<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    input: AddItem,
) -> Result<cart_item::Model, CartError> {
    if input.quantity < 1 {
        return Err(CartError::InvalidQuantity);
    }

    let (product, variant) = resolve_product(db, input.product_id, input.variant_id).await?;
    let cart = get_or_create_cart(db, user_id).await?;

    let existing = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .filter(cart_item::Column::ProductId.eq(product.id))
        .filter(match input.variant_id {
            Some(id) => cart_item::Column::VariantId.eq(id),
            None => cart_item::Column::VariantId.is_null(),
        })
        .one(db)
        .await?;

    let item = match existing {
        Some(existing) => {
            let quantity = existing.quantity + input.quantity;
            ensure_stock(variant.as_ref(), quantity)?;

            let mut active: cart_item::ActiveModel = existing.into();
            active.quantity = Set(quantity);
            active.update(db).await?
        }
        None => {
            ensure_stock(variant.as_ref(), input.quantity)?;

            let price = match &variant {
                Some(variant) => variant.unit_price(product.price),
                None => product.price.round_dp(2),
            };
            cart_item::ActiveModel {
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                variant_id: Set(variant.as_ref().map(|v| v.id)),
                quantity: Set(input.quantity),
                price_at_time: Set(price),
                ..Default::default()
            }
            .insert(db)
            .await?
        }
    };

    Ok(item)
}

async fn owned_item<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    item_id: i32,
) -> Result<cart_item::Model, CartError> {
    let (item, cart) = cart_item::Entity::find_by_id(item_id)
        .find_also_related(cart::Entity)
        .one(db)
        .await?
        .ok_or(CartError::ItemNotFound)?;

    match cart {
        Some(cart) if cart.user_id == user_id => Ok(item),
        _ => Err(CartError::Unauthorized),
    }
}

pub async fn update_quantity<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    item_id: i32,
    quantity: i32,
) -> Result<cart_item::Model, CartError> {
    let item = owned_item(db, user_id, item_id).await?;
    if quantity < 1 {
        return Err(CartError::InvalidQuantity);
    }

    let mut active: cart_item::ActiveModel = item.into();
    active.quantity = Set(quantity);
    Ok(active.update(db).await?)
}

pub async fn remove_item<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    item_id: i32,
) -> Result<(), CartError> {
    let item = owned_item(db, user_id, item_id).await?;
    cart_item::Entity::delete_by_id(item.id).exec(db).await?;
    Ok(())
}

/// Empties the user's cart. Returns how many lines were removed.
pub async fn clear_cart<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<u64, DbErr> {
    let Some(cart) = find_cart(db, user_id).await? else {
        return Ok(0);
    };

    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub async fn cart_lines<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<Vec<CartLine>, DbErr> {
    let Some(cart) = find_cart(db, user_id).await? else {
        return Ok(Vec::new());
    };

    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(product::Entity)
        .all(db)
        .await?;

    let mut lines = Vec::with_capacity(items.len());
    for (item, product) in items {
        let Some(product) = product else {
            continue;
        };
        let variant = match item.variant_id {
            Some(id) => variant::Entity::find_by_id(id).one(db).await?,
            None => None,
        };
        lines.push(CartLine {
            item,
            product,
            variant,
        });
    }

    Ok(lines)
}

pub async fn cart_view<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<CartView, DbErr> {
    let lines = cart_lines(db, user_id).await?;

    let cart: Vec<CartLineView> = lines
        .into_iter()
        .map(|line| CartLineView {
            id: line.item.id,
            product_id: line.product.id,
            product_name: line.product.name,
            variant_id: line.item.variant_id,
            variant_color: line.variant.as_ref().map(|v| v.color.clone()),
            variant_size: line.variant.as_ref().map(|v| v.size.clone()),
            quantity: line.item.quantity,
            price: line.item.price_at_time.round_dp(2),
            subtotal: line.item.subtotal(),
        })
        .collect();
    let total = cart.iter().map(|line| line.subtotal).sum();

    Ok(CartView { cart, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(stock: i32) -> variant::Model {
        variant::Model {
            id: 7,
            product_id: 1,
            color: "Black".to_owned(),
            size: "M".to_owned(),
            stock,
            price_override: None,
        }
    }

    #[test]
    fn stock_check_uses_requested_quantity() {
        assert!(ensure_stock(Some(&variant(2)), 2).is_ok());
        assert!(matches!(
            ensure_stock(Some(&variant(2)), 3),
            Err(CartError::InsufficientStock {
                variant_id: 7,
                available: 2
            })
        ));
        assert!(ensure_stock(None, 100).is_ok());
    }
}
