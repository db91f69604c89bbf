use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Discount this coupon grants on `total`, never more than `total`.
    pub fn discount_for(&self, total: Decimal) -> Decimal {
        let discount = match self.kind {
            CouponKind::Percentage => total * self.value / Decimal::ONE_HUNDRED,
            CouponKind::Flat => self.value,
        };
        discount.min(total).max(Decimal::ZERO).round_dp(2)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    CouponUsage,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CouponUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(
    enum_name = "coupon_kind_enum",
    db_type = "String(StringLen::N(20))",
    rs_type = "String"
)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "flat")]
    Flat,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(kind: CouponKind, value: Decimal) -> Model {
        Model {
            id: 1,
            code: "WELCOME".into(),
            kind,
            value,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount() {
        let c = coupon(CouponKind::Percentage, Decimal::from(10));
        assert_eq!(c.discount_for(Decimal::new(99900, 2)), Decimal::new(9990, 2));
    }

    #[test]
    fn flat_discount_is_capped_at_total() {
        let c = coupon(CouponKind::Flat, Decimal::from(500));
        assert_eq!(c.discount_for(Decimal::from(300)), Decimal::from(300));
        assert_eq!(c.discount_for(Decimal::from(800)), Decimal::from(500));
    }
}
