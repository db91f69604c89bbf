pub mod address;
pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod coupon_usage;
pub mod order;
pub mod order_item;
pub mod outbox_task;
pub mod product;
pub mod user;
pub mod variant;
pub mod variant_image;

use sea_orm::{
    sea_query::{Index, IndexCreateStatement},
    ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema,
};

/// Creates every table (dependencies first) and the composite unique indexes.
/// Safe to run against an existing database.
pub async fn setup_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, user::Entity).await?;
    create_table(db, product::Entity).await?;
    create_table(db, variant::Entity).await?;
    create_table(db, variant_image::Entity).await?;
    create_table(db, address::Entity).await?;
    create_table(db, cart::Entity).await?;
    create_table(db, cart_item::Entity).await?;
    create_table(db, coupon::Entity).await?;
    create_table(db, order::Entity).await?;
    create_table(db, order_item::Entity).await?;
    create_table(db, coupon_usage::Entity).await?;
    create_table(db, outbox_task::Entity).await?;

    create_index(
        db,
        Index::create()
            .name("idx_variant_product_color_size")
            .table(variant::Entity)
            .col(variant::Column::ProductId)
            .col(variant::Column::Color)
            .col(variant::Column::Size)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    create_index(
        db,
        Index::create()
            .name("idx_coupon_usage_coupon_user")
            .table(coupon_usage::Entity)
            .col(coupon_usage::Column::CouponId)
            .col(coupon_usage::Column::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();

    db.execute(backend.build(&statement)).await?;
    Ok(())
}

async fn create_index(db: &DatabaseConnection, statement: IndexCreateStatement) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}
