use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A checkout transaction. Shipping fields are a snapshot of the address taken
/// at checkout, not a reference to it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub status: Status,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub checkout_source: CheckoutSource,
    #[sea_orm(nullable)]
    pub coupon_id: Option<i32>,

    #[sea_orm(unique, nullable)]
    pub razorpay_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub razorpay_payment_id: Option<String>,

    pub shipping_name: String,
    pub shipping_phone: String,
    pub shipping_address_line_1: String,
    #[sea_orm(nullable)]
    pub shipping_address_line_2: Option<String>,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_pincode: String,

    #[sea_orm(nullable)]
    pub shipping_provider: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub shipment_id: Option<String>,
    #[sea_orm(nullable)]
    pub awb_code: Option<String>,
    #[sea_orm(nullable)]
    pub courier_name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Amount the customer actually pays.
    pub fn payable_amount(&self) -> Decimal {
        (self.total_amount - self.discount_amount)
            .max(Decimal::ZERO)
            .round_dp(2)
    }

    /// Payable amount in minor currency units, as the payment gateway expects it.
    pub fn payable_minor_units(&self) -> i64 {
        to_minor_units(self.payable_amount())
    }
}

pub fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::{prelude::ToPrimitive, RoundingStrategy};

    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or_default()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(
    enum_name = "order_status_enum",
    db_type = "String(StringLen::N(32))",
    rs_type = "String"
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[sea_orm(string_value = "pending_payment")]
    PendingPayment,
    #[sea_orm(string_value = "pending_whatsapp")]
    PendingWhatsapp,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "shipping_created")]
    ShippingCreated,
    #[sea_orm(string_value = "awb_assigned")]
    AwbAssigned,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl Status {
    /// Manual (admin) transitions. They only ever move forward;
    /// `pending_whatsapp` is the entry state for direct (COD / WhatsApp)
    /// orders. `pending_payment -> paid` is left to payment verification,
    /// which also commits the stock decrement and follow-up tasks.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;

        matches!(
            (self, next),
            (PendingPayment, Cancelled)
                | (PendingWhatsapp, Paid | ShippingCreated | Cancelled)
                | (Paid, ShippingCreated | Cancelled)
                | (ShippingCreated, AwbAssigned | Cancelled)
                | (AwbAssigned, InTransit | Cancelled)
                | (InTransit, Delivered)
        )
    }

    /// Customer-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending payment",
            Self::Paid => "payment successful",
            Self::ShippingCreated => "order confirmed",
            Self::AwbAssigned => "picked up",
            Self::InTransit => "on the way",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            _ => "processing",
        }
    }

    /// Whether a shipment can be booked for an order in this state.
    pub fn is_shippable(self) -> bool {
        matches!(self, Self::Paid | Self::PendingWhatsapp)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(Self::PendingPayment),
            "pending_whatsapp" => Ok(Self::PendingWhatsapp),
            "paid" => Ok(Self::Paid),
            "shipping_created" => Ok(Self::ShippingCreated),
            "awb_assigned" => Ok(Self::AwbAssigned),
            "in_transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(
    enum_name = "payment_method_enum",
    db_type = "String(StringLen::N(20))",
    rs_type = "String"
)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "razorpay")]
    Razorpay,
    #[sea_orm(string_value = "cod")]
    Cod,
    #[sea_orm(string_value = "whatsapp")]
    Whatsapp,
}

impl PaymentMethod {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Razorpay)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(
    enum_name = "checkout_source_enum",
    db_type = "String(StringLen::N(20))",
    rs_type = "String"
)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutSource {
    #[sea_orm(string_value = "cart")]
    Cart,
    #[sea_orm(string_value = "buy_now")]
    BuyNow,
}
