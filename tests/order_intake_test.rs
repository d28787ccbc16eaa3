//! Integration tests for the on-site order intake decision: server-side
//! pricing, first-order pre-authorization gating, and special codes.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn order_payload(product_id: Uuid, quantity: u32, special_code: Option<&str>) -> serde_json::Value {
    json!({
        "customer": {
            "first_name": "Marie",
            "last_name": "Dupont",
            "email": "marie@example.com",
            "phone": "+33612345678"
        },
        "pickup_date": (chrono::Utc::now().date_naive() + chrono::Duration::days(3)).to_string(),
        "pickup_time": "14:30",
        "payment_method": "onsite",
        "special_code": special_code,
        "items": [
            { "product_id": product_id, "quantity": quantity, "price": 19.99 }
        ]
    })
}

#[tokio::test]
async fn first_time_customer_without_code_must_preauthorize() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Paris-Brest", dec!(21.00)).await;
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id, 2, None)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["requires_preauth"], true);
    // The hold covers the server-computed total, not the client-sent price.
    assert_eq!(body["data"]["preauth_amount"], "42.00");
    assert_eq!(body["data"]["currency"], "EUR");

    // No order was materialized.
    let list = app
        .request(Method::GET, "/api/v1/orders", Some(&token), None)
        .await;
    let list_body = response_json(list).await;
    assert_eq!(list_body["data"]["total"], 0);
}

#[tokio::test]
async fn repeat_customer_orders_directly_with_catalog_pricing() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Paris-Brest", dec!(21.00)).await;
    let customer = Uuid::new_v4();
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id, 2, None)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let order = &body["data"]["order"];

    // Client claimed 19.99; the catalog says 21.00 and the catalog wins.
    assert_eq!(order["total_amount"], "42.00");
    assert_eq!(order["payment_method"], "onsite");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["requires_preauth"], false);

    let order_number = order["order_number"].as_str().unwrap();
    let re = regex::Regex::new(r"^\d{6}-\d{3}$").unwrap();
    assert!(re.is_match(order_number), "bad order number {order_number}");

    // Fan-out ran: customer + shop email, shop SMS, two receipt copies.
    assert_eq!(app.mailer.sent.lock().unwrap().len(), 2);
    assert_eq!(app.sms.sent.lock().unwrap().len(), 1);
    assert_eq!(app.printer.printed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn sequential_orders_get_distinct_sequential_numbers() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Flan", dec!(3.50)).await;
    let customer = Uuid::new_v4();
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/orders",
                Some(&token),
                Some(order_payload(product_id, 1, None)),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response_json(response).await;
        numbers.push(
            body["data"]["order"]["order_number"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    let unique: std::collections::HashSet<_> = numbers.iter().collect();
    assert_eq!(unique.len(), numbers.len(), "numbers must be unique: {numbers:?}");
    // Same day prefix, increasing sequence.
    assert_eq!(&numbers[0][..7], &numbers[1][..7]);
}

#[tokio::test]
async fn invalid_special_code_rejects_without_side_effects() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Eclair", dec!(4.80)).await;
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id, 1, Some("NOPE1234"))),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let list = app
        .request(Method::GET, "/api/v1/orders", Some(&token), None)
        .await;
    let list_body = response_json(list).await;
    assert_eq!(list_body["data"]["total"], 0);
}

#[tokio::test]
async fn valid_special_code_waives_preauth_and_burns_exactly_once() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Tarte citron", dec!(24.00)).await;
    let admin = app.admin_token();

    let generated = app
        .request(
            Method::POST,
            "/api/v1/admin/special-codes",
            Some(&admin),
            Some(json!({ "expires_in_days": 7 })),
        )
        .await;
    assert_eq!(generated.status(), StatusCode::CREATED);
    let code = response_json(generated).await["data"]["code"]
        .as_str()
        .unwrap()
        .to_string();

    // First-time customer with the code: order materializes immediately.
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id, 1, Some(&code))),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order"]["requires_preauth"], false);

    // Another first-time customer cannot reuse the burned code.
    let other = Uuid::new_v4();
    let other_token = app.customer_token(other);
    let reuse = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&other_token),
            Some(order_payload(product_id, 1, Some(&code))),
        )
        .await;
    assert_eq!(reuse.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn online_method_is_redirected_to_session_endpoint() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Opera", dec!(30.00)).await;
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);

    let mut payload = order_payload(product_id, 1, None);
    payload["payment_method"] = json!("online");

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_product_is_rejected() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(Uuid::new_v4(), 1, None)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api/v1/orders", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
