mod common;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::json;

use common::{decimal, json, spawn_app, TestApp, FILE_SIZE_LIMIT};

fn png_part(len: usize) -> Part {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    data.resize(len, 0);
    Part::bytes(data)
        .file_name("look.png")
        .mime_str("image/png")
        .unwrap()
}

async fn upload(app: &TestApp, token: &str, product_id: i32, form: Form) -> reqwest::Response {
    app.client
        .post(app.url(&format!("/admin/products/{product_id}/images/bulk")))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request")
}

#[tokio::test]
async fn admin_routes_require_an_admin() {
    let app = spawn_app().await;
    let (_, customer) = app.user("asha@example.com").await;

    let response = app.client.get(app.url("/admin/stats")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    json(app.get("/admin/stats", &customer).await, StatusCode::FORBIDDEN).await;

    let admin = app.admin().await;
    app.product("Cap", 300, None).await;
    let stats = json(app.get("/admin/stats", &admin).await, StatusCode::OK).await;
    assert_eq!(stats["products"], 1);
    assert_eq!(stats["orders"], 0);
    assert_eq!(stats["users"], 2);
}

#[tokio::test]
async fn product_names_are_unique() {
    let app = spawn_app().await;
    let admin = app.admin().await;

    let created = json(
        app.post(
            "/admin/products",
            &admin,
            json!({ "name": "Linen Shirt", "price": "1499.50", "category": "shirts" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(decimal(&created["price"]), Decimal::new(149950, 2));

    json(
        app.post(
            "/admin/products",
            &admin,
            json!({ "name": "Linen Shirt", "price": "999" }),
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;

    json(
        app.post(
            "/admin/products",
            &admin,
            json!({ "name": "Cheap Shirt", "price": "-1" }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let other = app.product("Denim Shirt", 900, None).await;
    json(
        app.put(
            &format!("/admin/products/{}", other.id),
            &admin,
            json!({ "name": "Linen Shirt" }),
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;
}

#[tokio::test]
async fn duplicate_copies_variants_and_ordered_products_stay() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let (user, token) = app.user("asha@example.com").await;
    app.address(user.id).await;
    let tee = app.product("Tee", 500, Some("tees")).await;
    app.variant(tee.id, "Black", "M", 4).await;
    app.variant(tee.id, "Black", "L", 2).await;

    let copy = json(
        app.post(&format!("/admin/products/{}/duplicate", tee.id), &admin, json!({}))
            .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(copy["name"], "Tee (Copy)");

    let detail = json(
        app.get(&format!("/admin/products/{}", copy["id"]), &admin).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(detail["variants"].as_array().unwrap().len(), 2);

    let again = json(
        app.post(&format!("/admin/products/{}/duplicate", tee.id), &admin, json!({}))
            .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(again["name"], "Tee (Copy 2)");

    json(
        app.post(
            "/checkout/buy-now",
            &token,
            json!({ "product_id": tee.id, "quantity": 1, "payment_method": "cod" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    json(
        app.delete(&format!("/admin/products/{}", tee.id), &admin).await,
        StatusCode::CONFLICT,
    )
    .await;
    json(
        app.delete(&format!("/admin/products/{}", again["id"]), &admin).await,
        StatusCode::OK,
    )
    .await;
}

#[tokio::test]
async fn variants_are_unique_per_color_and_size() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let tee = app.product("Tee", 500, None).await;
    let path = format!("/admin/products/{}/variants", tee.id);

    let created = json(
        app.post(&path, &admin, json!({ "color": "Black", "size": "M", "stock": 5 }))
            .await,
        StatusCode::CREATED,
    )
    .await;
    json(
        app.post(&path, &admin, json!({ "color": "Black", "size": "M", "stock": 1 }))
            .await,
        StatusCode::CONFLICT,
    )
    .await;
    json(
        app.post(&path, &admin, json!({ "color": "Black", "size": "L", "stock": -1 }))
            .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let updated = json(
        app.put(
            &format!("/admin/variants/{}", created["id"]),
            &admin,
            json!({ "stock": 9, "price_override": "550" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(updated["stock"], 9);
    assert_eq!(decimal(&updated["price_override"]), Decimal::from(550));

    let cleared = json(
        app.put(
            &format!("/admin/variants/{}", created["id"]),
            &admin,
            json!({ "clear_price_override": true }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert!(cleared["price_override"].is_null());
}

#[tokio::test]
async fn a_new_thumbnail_demotes_the_old_one() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let tee = app.product("Tee", 500, None).await;
    let path = format!("/admin/products/{}/images", tee.id);

    let first = json(
        app.post(
            &path,
            &admin,
            json!({ "color": "Black", "image_url": "https://cdn.example.com/a.png", "role": "thumbnail" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let second = json(
        app.post(
            &path,
            &admin,
            json!({ "color": "White", "image_url": "https://cdn.example.com/b.png", "role": "thumbnail" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    let images = json(app.get(&path, &admin).await, StatusCode::OK).await;
    let role_of = |id: &serde_json::Value| {
        images
            .as_array()
            .unwrap()
            .iter()
            .find(|image| image["id"] == *id)
            .map(|image| image["role"].clone())
            .unwrap()
    };
    assert_eq!(role_of(&first["id"]), "gallery");
    assert_eq!(role_of(&second["id"]), "thumbnail");

    let listed = json(
        app.client
            .get(app.url("/products"))
            .send()
            .await
            .unwrap(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(listed["products"][0]["thumbnail"], "https://cdn.example.com/b.png");
}

async fn add_image(app: &TestApp, token: &str, product_id: i32, color: &str, role: &str) -> i64 {
    let created = json(
        app.post(
            &format!("/admin/products/{product_id}/images"),
            token,
            json!({
                "color": color,
                "image_url": format!("https://cdn.example.com/{color}-{role}.png"),
                "role": role,
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    created["id"].as_i64().unwrap()
}

async fn roles(app: &TestApp, token: &str, product_id: i32) -> Vec<(i64, String)> {
    let images = json(
        app.get(&format!("/admin/products/{product_id}/images"), token)
            .await,
        StatusCode::OK,
    )
    .await;
    images
        .as_array()
        .unwrap()
        .iter()
        .map(|image| {
            (
                image["id"].as_i64().unwrap(),
                image["role"].as_str().unwrap().to_owned(),
            )
        })
        .collect()
}

fn role_of(roles: &[(i64, String)], id: i64) -> &str {
    roles
        .iter()
        .find(|(image_id, _)| *image_id == id)
        .map(|(_, role)| role.as_str())
        .unwrap()
}

#[tokio::test]
async fn primary_images_are_exclusive_per_color() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let tee = app.product("Tee", 500, None).await;

    let black_a = add_image(&app, &admin, tee.id, "Black", "primary").await;
    let white = add_image(&app, &admin, tee.id, "White", "primary").await;
    let black_b = add_image(&app, &admin, tee.id, "Black", "primary").await;

    let current = roles(&app, &admin, tee.id).await;
    assert_eq!(role_of(&current, black_a), "gallery");
    assert_eq!(role_of(&current, black_b), "primary");
    assert_eq!(role_of(&current, white), "primary");

    // Promoting through an update demotes the other holder of that color.
    let updated = json(
        app.put(
            &format!("/admin/images/{black_a}"),
            &admin,
            json!({ "role": "primary" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(updated["role"], "primary");

    let current = roles(&app, &admin, tee.id).await;
    assert_eq!(role_of(&current, black_a), "primary");
    assert_eq!(role_of(&current, black_b), "gallery");
    assert_eq!(role_of(&current, white), "primary");

    // A thumbnail set by update is exclusive across the whole product.
    json(
        app.put(
            &format!("/admin/images/{white}"),
            &admin,
            json!({ "role": "thumbnail" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    json(
        app.put(
            &format!("/admin/images/{black_b}"),
            &admin,
            json!({ "role": "thumbnail" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    let current = roles(&app, &admin, tee.id).await;
    assert_eq!(role_of(&current, white), "gallery");
    assert_eq!(role_of(&current, black_b), "thumbnail");
    assert_eq!(role_of(&current, black_a), "primary");
}

#[tokio::test]
async fn bulk_upload_stores_and_serves_files() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let tee = app.product("Tee", 500, None).await;

    let form = Form::new()
        .text("color", "Black")
        .text("role", "primary")
        .part("files", png_part(64))
        .part("files", png_part(128));
    let created = json(upload(&app, &admin, tee.id, form).await, StatusCode::CREATED).await;
    let created = created.as_array().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["role"], "primary");
    assert_eq!(created[1]["role"], "gallery");

    let url = created[0]["image_url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/") && url.ends_with(".png"));

    let served = app.client.get(app.url(url)).send().await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.headers()["content-type"], "image/png");
    assert_eq!(served.bytes().await.unwrap().len(), 64);

    let missing = app
        .client
        .get(app.url("/uploads/not-a-stored-file.png"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let form = Form::new()
        .text("color", "Black")
        .part("files", png_part(FILE_SIZE_LIMIT + 1));
    let response = upload(&app, &admin, tee.id, form).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let gif = Part::bytes(b"GIF89a".to_vec())
        .file_name("look.gif")
        .mime_str("image/gif")
        .unwrap();
    let form = Form::new().text("color", "Black").part("files", gif);
    let response = upload(&app, &admin, tee.id, form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let form = Form::new().part("files", png_part(16));
    let response = upload(&app, &admin, tee.id, form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_lists_one_row_per_item() {
    let app = spawn_app().await;
    let admin = app.admin().await;
    let (user, token) = app.user("asha@example.com").await;
    app.address(user.id).await;
    let cap = app.product("Cap", 300, None).await;
    let tee = app.product("Tee", 500, None).await;

    for product_id in [cap.id, tee.id] {
        json(
            app.post(
                "/cart/add",
                &token,
                json!({ "product_id": product_id, "quantity": 2 }),
            )
            .await,
            StatusCode::CREATED,
        )
        .await;
    }
    json(
        app.post("/checkout/cart", &token, json!({ "payment_method": "cod" }))
            .await,
        StatusCode::CREATED,
    )
    .await;

    let rows = json(app.get("/admin/export/orders", &admin).await, StatusCode::OK).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["customer_email"] == "asha@example.com"));
    assert!(rows
        .iter()
        .all(|row| decimal(&row["order_total"]) == Decimal::from(1600)));

    let detail = json(
        app.get(&format!("/admin/users/{}", user.id), &admin).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(detail["order_count"], 1);
    assert_eq!(detail["user"]["email"], "asha@example.com");

    let tasks = json(app.get("/admin/outbox?status=done", &admin).await, StatusCode::OK).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["kind"], "admin_email");
    assert_eq!(app.emails(), 1);
}

#[tokio::test]
async fn coupons_can_be_created_and_deleted() {
    let app = spawn_app().await;
    let admin = app.admin().await;

    let created = json(
        app.post(
            "/admin/coupons",
            &admin,
            json!({ "code": " welcome10 ", "kind": "percentage", "value": "10" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(created["code"], "WELCOME10");
    assert_eq!(created["active"], true);

    json(
        app.post(
            "/admin/coupons",
            &admin,
            json!({ "code": "WELCOME10", "kind": "flat", "value": "100" }),
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;
    json(
        app.post(
            "/admin/coupons",
            &admin,
            json!({ "code": "HALFPLUS", "kind": "percentage", "value": "150" }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let list = json(app.get("/admin/coupons", &admin).await, StatusCode::OK).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    json(
        app.delete(&format!("/admin/coupons/{}", created["id"]), &admin).await,
        StatusCode::OK,
    )
    .await;
    json(
        app.delete(&format!("/admin/coupons/{}", created["id"]), &admin).await,
        StatusCode::NOT_FOUND,
    )
    .await;
}
