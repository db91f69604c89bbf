mod common;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::atomic::Ordering;

use common::{decimal, json, spawn_app, GATEWAY_SECRET};
use sniipe_store::entities::coupon::CouponKind;
use sniipe_store::entities::{order, outbox_task};
use sniipe_store::payments::sign;

#[tokio::test]
async fn buy_now_pays_decrements_stock_and_ships_once() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Oversized Tee", 500, Some("tees")).await;
    let variant = app.variant(product.id, "Black", "L", 3).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "variant_id": variant.id,
                "quantity": 2,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(decimal(&body["total_amount"]), Decimal::from(1000));
    let order_id = body["id"].as_i64().unwrap();

    // Nothing is reserved before payment.
    assert_eq!(app.stock(variant.id).await, 3);

    let gateway = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(gateway["amount"], 100000);
    assert_eq!(gateway["currency"], "INR");
    assert_eq!(gateway["key_id"], "rzp_test");
    let rzp_order_id = gateway["razorpay_order_id"].as_str().unwrap().to_owned();

    let again = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(again["razorpay_order_id"], rzp_order_id.as_str());

    let verify = json!({
        "razorpay_order_id": rzp_order_id,
        "razorpay_payment_id": "pay_1",
        "razorpay_signature": sign(GATEWAY_SECRET, &rzp_order_id, "pay_1"),
    });
    let paid = json(
        app.post("/payments/razorpay/verify", &token, verify.clone()).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["order_id"], order_id);

    assert_eq!(app.stock(variant.id).await, 1);
    assert_eq!(app.shipments(), 1);
    assert_eq!(app.emails(), 1);

    let order = json(
        app.get(&format!("/orders/{order_id}"), &token).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(order["status"], "shipping_created");
    assert_eq!(order["shipping_order_id"], format!("SHIP-{order_id}"));

    // Replaying the same verification changes nothing.
    json(
        app.post("/payments/razorpay/verify", &token, verify).await,
        StatusCode::OK,
    )
    .await;

    // A replay still needs a valid signature.
    let forged = json!({
        "razorpay_order_id": rzp_order_id,
        "razorpay_payment_id": "pay_1",
        "razorpay_signature": sign("wrong_secret", &rzp_order_id, "pay_1"),
    });
    json(
        app.post("/payments/razorpay/verify", &token, forged).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(app.stock(variant.id).await, 1);
    assert_eq!(app.shipments(), 1);
    assert_eq!(app.emails(), 1);
}

#[tokio::test]
async fn buy_now_rejects_more_than_stock() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Hoodie", 1200, None).await;
    let variant = app.variant(product.id, "Grey", "M", 1).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "variant_id": variant.id,
                "quantity": 2,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(body["error"].as_str().unwrap().contains("Insufficient stock"));
}

#[tokio::test]
async fn online_checkout_requires_an_address() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;

    json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "payment_method": "paypal",
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
}

#[tokio::test]
async fn invalid_signature_leaves_order_pending() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Oversized Tee", 500, None).await;
    let variant = app.variant(product.id, "Black", "L", 3).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "variant_id": variant.id,
                "quantity": 1,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let order_id = body["id"].as_i64().unwrap();

    let gateway = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    let rzp_order_id = gateway["razorpay_order_id"].as_str().unwrap();

    json(
        app.post(
            "/payments/razorpay/verify",
            &token,
            json!({
                "razorpay_order_id": rzp_order_id,
                "razorpay_payment_id": "pay_1",
                "razorpay_signature": sign("wrong_secret", rzp_order_id, "pay_1"),
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let order = json(
        app.get(&format!("/orders/{order_id}"), &token).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(order["status"], "pending_payment");
    assert_eq!(app.stock(variant.id).await, 3);
    assert_eq!(app.shipments(), 0);
}

#[tokio::test]
async fn other_users_cannot_pay_for_an_order() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let (_, other) = app.user("ravi@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    json(
        app.post(
            "/payments/razorpay/create-order",
            &other,
            json!({ "order_id": body["id"] }),
        )
        .await,
        StatusCode::FORBIDDEN,
    )
    .await;
}

#[tokio::test]
async fn stale_pending_orders_are_removed_on_next_checkout() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;
    let request = json!({
        "product_id": product.id,
        "quantity": 1,
        "address_id": address_id,
        "payment_method": "razorpay",
    });

    let first = json(
        app.post("/checkout/buy-now", &token, request.clone()).await,
        StatusCode::CREATED,
    )
    .await;
    let stale_id = first["id"].as_i64().unwrap() as i32;

    order::Entity::update_many()
        .col_expr(
            order::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::hours(2)),
        )
        .filter(order::Column::Id.eq(stale_id))
        .exec(app.db.as_ref())
        .await
        .unwrap();

    json(
        app.post("/checkout/buy-now", &token, request).await,
        StatusCode::CREATED,
    )
    .await;

    json(
        app.get(&format!("/orders/{stale_id}"), &token).await,
        StatusCode::NOT_FOUND,
    )
    .await;
    let orders = json(app.get("/orders", &token).await, StatusCode::OK).await;
    assert_eq!(orders.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stale_cleanup_sticks_when_checkout_is_rejected() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;
    let variant = app.variant(product.id, "Red", "Free", 1).await;

    let first = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let stale_id = first["id"].as_i64().unwrap() as i32;

    order::Entity::update_many()
        .col_expr(
            order::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::hours(2)),
        )
        .filter(order::Column::Id.eq(stale_id))
        .exec(app.db.as_ref())
        .await
        .unwrap();

    json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "variant_id": variant.id,
                "quantity": 5,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let remaining = order::Entity::find_by_id(stale_id)
        .one(app.db.as_ref())
        .await
        .unwrap();
    assert!(remaining.is_none());
}

#[tokio::test]
async fn cod_cart_checkout_uses_default_address_and_clears_cart() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    app.address(user.id).await;
    let product = app.product("Oversized Tee", 500, None).await;
    let variant = app.variant(product.id, "Black", "L", 5).await;

    json(
        app.post(
            "/cart/add",
            &token,
            json!({ "product_id": product.id, "variant_id": variant.id, "quantity": 2 }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    let body = json(
        app.post("/checkout/cart", &token, json!({ "payment_method": "cod" }))
            .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(body["status"], "pending_whatsapp");
    assert_eq!(body["payment_method"], "cod");
    assert_eq!(body["shipping_address"]["pincode"], "560001");

    assert_eq!(app.stock(variant.id).await, 3);
    assert_eq!(app.emails(), 1);
    assert_eq!(app.shipments(), 0);

    let cart = json(app.get("/cart", &token).await, StatusCode::OK).await;
    assert!(cart["cart"].as_array().unwrap().is_empty());

    json(
        app.post("/checkout/cart", &token, json!({ "payment_method": "cod" }))
            .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
}

#[tokio::test]
async fn coupon_discount_reaches_the_gateway_once_per_user() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let address_id = app.address(user.id).await;
    let product = app.product("Jacket", 1000, None).await;
    app.coupon("WELCOME10", CouponKind::Percentage, 10).await;

    let request = json!({
        "product_id": product.id,
        "quantity": 1,
        "address_id": address_id,
        "payment_method": "razorpay",
        "coupon_code": "welcome10",
    });
    let body = json(
        app.post("/checkout/buy-now", &token, request.clone()).await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(decimal(&body["total_amount"]), Decimal::from(1000));
    assert_eq!(decimal(&body["discount_amount"]), Decimal::from(100));
    assert_eq!(decimal(&body["payable_amount"]), Decimal::from(900));

    let order_id = body["id"].as_i64().unwrap();
    let gateway = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(gateway["amount"], 90000);

    let rzp_order_id = gateway["razorpay_order_id"].as_str().unwrap();
    json(
        app.post(
            "/payments/razorpay/verify",
            &token,
            json!({
                "razorpay_order_id": rzp_order_id,
                "razorpay_payment_id": "pay_9",
                "razorpay_signature": sign(GATEWAY_SECRET, rzp_order_id, "pay_9"),
            }),
        )
        .await,
        StatusCode::OK,
    )
    .await;

    let body = json(
        app.post("/checkout/buy-now", &token, request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "Coupon already used");
}

#[tokio::test]
async fn failed_shipment_stays_in_outbox_until_retried() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let admin = app.admin().await;
    let address_id = app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let order_id = body["id"].as_i64().unwrap();
    let gateway = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    let rzp_order_id = gateway["razorpay_order_id"].as_str().unwrap();

    app.shipping.fail.store(true, Ordering::SeqCst);
    let paid = json(
        app.post(
            "/payments/razorpay/verify",
            &token,
            json!({
                "razorpay_order_id": rzp_order_id,
                "razorpay_payment_id": "pay_1",
                "razorpay_signature": sign(GATEWAY_SECRET, rzp_order_id, "pay_1"),
            }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(paid["status"], "paid");

    let task = outbox_task::Entity::find()
        .filter(outbox_task::Column::OrderId.eq(order_id as i32))
        .filter(outbox_task::Column::Kind.eq(outbox_task::TaskKind::CreateShipment))
        .one(app.db.as_ref())
        .await
        .unwrap()
        .expect("Shipment task missing");
    assert_eq!(task.status, outbox_task::TaskStatus::Pending);
    assert_eq!(task.attempts, 1);
    assert!(task.last_error.is_some());
    assert!(task.next_attempt_at > Utc::now());

    app.shipping.fail.store(false, Ordering::SeqCst);
    let retried = json(
        app.post(&format!("/admin/outbox/{}/retry", task.id), &admin, json!({}))
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(retried["status"], "done");

    // A manual shipment request after that is a no-op.
    let manual = json(
        app.post(&format!("/admin/orders/{order_id}/shipment"), &admin, json!({}))
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(manual["shipping_order_id"], format!("SHIP-{order_id}"));
    assert_eq!(app.shipments(), 2);

    json(
        app.post(&format!("/admin/outbox/{}/retry", task.id), &admin, json!({}))
            .await,
        StatusCode::CONFLICT,
    )
    .await;
}

#[tokio::test]
async fn shipment_task_finishes_when_order_was_moved_on_by_hand() {
    let app = spawn_app().await;
    let (user, token) = app.user("asha@example.com").await;
    let admin = app.admin().await;
    let address_id = app.address(user.id).await;
    let product = app.product("Cap", 300, None).await;

    let body = json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({
                "product_id": product.id,
                "quantity": 1,
                "address_id": address_id,
                "payment_method": "razorpay",
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let order_id = body["id"].as_i64().unwrap();
    let gateway = json(
        app.post(
            "/payments/razorpay/create-order",
            &token,
            json!({ "order_id": order_id }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    let rzp_order_id = gateway["razorpay_order_id"].as_str().unwrap();

    app.shipping.fail.store(true, Ordering::SeqCst);
    json(
        app.post(
            "/payments/razorpay/verify",
            &token,
            json!({
                "razorpay_order_id": rzp_order_id,
                "razorpay_payment_id": "pay_1",
                "razorpay_signature": sign(GATEWAY_SECRET, rzp_order_id, "pay_1"),
            }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(app.shipments(), 1);

    json(
        app.patch(
            &format!("/admin/orders/{order_id}"),
            &admin,
            json!({ "status": "shipping_created", "awb_code": "AWB9" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;

    let task = outbox_task::Entity::find()
        .filter(outbox_task::Column::OrderId.eq(order_id as i32))
        .filter(outbox_task::Column::Kind.eq(outbox_task::TaskKind::CreateShipment))
        .one(app.db.as_ref())
        .await
        .unwrap()
        .expect("Shipment task missing");
    assert_eq!(task.status, outbox_task::TaskStatus::Pending);

    let retried = json(
        app.post(&format!("/admin/outbox/{}/retry", task.id), &admin, json!({}))
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(retried["status"], "done");
    assert!(retried["last_error"].is_null());
    assert_eq!(app.shipments(), 1);
}
