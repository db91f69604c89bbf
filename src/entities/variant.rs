use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A purchasable color/size combination of a product.
///
/// `(product_id, color, size)` is unique, enforced by an index created in
/// `setup_schema`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub product_id: i32,
    pub color: String,
    pub size: String,
    pub stock: i32,
    #[sea_orm(nullable)]
    pub price_override: Option<Decimal>,
}

impl Model {
    /// Unit price for this variant: its override when set, else the product price.
    pub fn unit_price(&self, product_price: Decimal) -> Decimal {
        self.price_override.unwrap_or(product_price).round_dp(2)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
