//! Shipping addresses. Every user with at least one address has exactly one
//! default; each mutation below re-establishes that.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entities::address;
use crate::error::ApiError;

#[derive(Clone, Debug)]
pub struct AddressInput {
    pub label: Option<String>,
    pub full_name: String,
    pub phone: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub is_default: bool,
}

pub async fn list<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<Vec<address::Model>, DbErr> {
    address::Entity::find()
        .filter(address::Column::UserId.eq(user_id))
        .order_by_desc(address::Column::IsDefault)
        .order_by_asc(address::Column::CreatedAt)
        .order_by_asc(address::Column::Id)
        .all(db)
        .await
}

/// An address owned by `user_id`: 404 when missing, 403 when someone else's.
pub async fn find_owned<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: i32,
) -> Result<address::Model, ApiError> {
    let address = address::Entity::find_by_id(address_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Address not found".to_owned()))?;

    if address.user_id != user_id {
        return Err(ApiError::Forbidden("Unauthorized".to_owned()));
    }
    Ok(address)
}

pub async fn find_default<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<Option<address::Model>, DbErr> {
    address::Entity::find()
        .filter(address::Column::UserId.eq(user_id))
        .filter(address::Column::IsDefault.eq(true))
        .one(db)
        .await
}

async fn clear_default<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<(), DbErr> {
    address::Entity::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(false))
        .filter(address::Column::UserId.eq(user_id))
        .filter(address::Column::IsDefault.eq(true))
        .exec(db)
        .await?;
    Ok(())
}

/// Makes the oldest address the default if the user has none.
async fn promote_oldest_if_needed<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<(), DbErr> {
    if find_default(db, user_id).await?.is_some() {
        return Ok(());
    }

    let oldest = address::Entity::find()
        .filter(address::Column::UserId.eq(user_id))
        .order_by_asc(address::Column::CreatedAt)
        .order_by_asc(address::Column::Id)
        .one(db)
        .await?;

    if let Some(oldest) = oldest {
        let mut active: address::ActiveModel = oldest.into();
        active.is_default = Set(true);
        active.update(db).await?;
    }
    Ok(())
}

pub async fn create<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    input: AddressInput,
) -> Result<address::Model, DbErr> {
    let is_first = find_default(db, user_id).await?.is_none();
    let is_default = input.is_default || is_first;
    if is_default {
        clear_default(db, user_id).await?;
    }

    let now = Utc::now();
    let created = address::ActiveModel {
        user_id: Set(user_id),
        label: Set(input.label),
        full_name: Set(input.full_name),
        phone: Set(input.phone),
        address_line_1: Set(input.address_line_1),
        address_line_2: Set(input.address_line_2),
        city: Set(input.city),
        state: Set(input.state),
        pincode: Set(input.pincode),
        is_default: Set(is_default),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    promote_oldest_if_needed(db, user_id).await?;
    Ok(created)
}

pub async fn update<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: i32,
    input: AddressInput,
) -> Result<address::Model, ApiError> {
    let existing = find_owned(db, user_id, address_id).await?;
    if input.is_default && !existing.is_default {
        clear_default(db, user_id).await?;
    }

    let mut active: address::ActiveModel = existing.into();
    active.label = Set(input.label);
    active.full_name = Set(input.full_name);
    active.phone = Set(input.phone);
    active.address_line_1 = Set(input.address_line_1);
    active.address_line_2 = Set(input.address_line_2);
    active.city = Set(input.city);
    active.state = Set(input.state);
    active.pincode = Set(input.pincode);
    active.is_default = Set(input.is_default);
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;

    // Un-defaulting the default hands the flag to the oldest address, which
    // may be this one again when it is the only address.
    promote_oldest_if_needed(db, user_id).await?;

    Ok(address::Entity::find_by_id(updated.id)
        .one(db)
        .await?
        .unwrap_or(updated))
}

pub async fn set_default<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: i32,
) -> Result<address::Model, ApiError> {
    let existing = find_owned(db, user_id, address_id).await?;
    if existing.is_default {
        return Ok(existing);
    }

    clear_default(db, user_id).await?;
    let mut active: address::ActiveModel = existing.into();
    active.is_default = Set(true);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

pub async fn delete<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: i32,
) -> Result<(), ApiError> {
    let existing = find_owned(db, user_id, address_id).await?;
    address::Entity::delete_by_id(existing.id).exec(db).await?;

    promote_oldest_if_needed(db, user_id).await?;
    Ok(())
}
