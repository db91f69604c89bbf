use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use thiserror::Error;
use uuid::Uuid;

use crate::entities::{
    coupon::{self, CouponKind},
    coupon_usage,
};

#[derive(Debug, Error)]
pub enum CouponError {
    #[error("Invalid coupon code")]
    Invalid,
    #[error("Coupon already used")]
    AlreadyUsed,
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Codes are stored and matched upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Percentage coupons take 0 < value <= 100, flat coupons any positive amount.
pub fn check_value(kind: CouponKind, value: Decimal) -> Result<(), &'static str> {
    if value <= Decimal::ZERO {
        return Err("value must be positive");
    }
    if kind == CouponKind::Percentage && value > Decimal::ONE_HUNDRED {
        return Err("percentage must not exceed 100");
    }
    Ok(())
}

pub async fn find_by_code<C: ConnectionTrait>(
    db: &C,
    code: &str,
) -> Result<Option<coupon::Model>, DbErr> {
    coupon::Entity::find()
        .filter(coupon::Column::Code.eq(normalize_code(code)))
        .one(db)
        .await
}

/// Resolves a code for `user_id` and computes its discount on `total`.
pub async fn apply<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    code: &str,
    total: Decimal,
) -> Result<(coupon::Model, Decimal), CouponError> {
    let coupon = find_by_code(db, code)
        .await?
        .filter(|coupon| coupon.active)
        .ok_or(CouponError::Invalid)?;

    let used = coupon_usage::Entity::find()
        .filter(coupon_usage::Column::CouponId.eq(coupon.id))
        .filter(coupon_usage::Column::UserId.eq(user_id))
        .one(db)
        .await?;
    if used.is_some() {
        return Err(CouponError::AlreadyUsed);
    }

    let discount = coupon.discount_for(total);
    Ok((coupon, discount))
}

pub async fn record_usage<C: ConnectionTrait>(
    db: &C,
    coupon_id: i32,
    user_id: Uuid,
    order_id: i32,
) -> Result<(), DbErr> {
    coupon_usage::ActiveModel {
        coupon_id: Set(coupon_id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        used_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}
