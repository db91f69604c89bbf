pub mod addresses;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod images;
pub mod orders;
pub mod outbox;
