//! Integration tests for per-channel failure isolation in the notification
//! fan-out and for the internal dispatch endpoints.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, TEST_CRON_SECRET};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use patisserie_api::services::notifications::print::PosResponse;

fn order_payload(product_id: Uuid) -> serde_json::Value {
    json!({
        "customer": {
            "first_name": "Marie",
            "last_name": "Dupont",
            "email": "marie@example.com",
            "phone": "+33612345678"
        },
        "pickup_date": (Utc::now().date_naive() + Duration::days(3)).to_string(),
        "pickup_time": "14:30",
        "payment_method": "onsite",
        "items": [{ "product_id": product_id, "quantity": 2 }]
    })
}

fn failed_print() -> Option<PosResponse> {
    Some(PosResponse {
        document_printed: Some(0),
        ..Default::default()
    })
}

#[tokio::test]
async fn total_print_failure_never_blocks_the_order() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Paris-Brest", dec!(21.00)).await;
    let customer = Uuid::new_v4();
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    // Both copies exhaust their three attempts.
    app.printer.script_responses(vec![
        failed_print(),
        failed_print(),
        failed_print(),
        failed_print(),
        failed_print(),
        failed_print(),
    ]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id)),
        )
        .await;

    // The customer-facing outcome is unaffected by the printer.
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order"]["status"], "pending");

    // Other channels still delivered: customer + shop mail, plus the
    // critical escalation email.
    let mails = app.mailer.sent.lock().unwrap();
    assert_eq!(mails.len(), 3);
    assert!(mails.iter().any(|m| m.subject.contains("CRITICAL")));
    drop(mails);

    // Shop got the order SMS and the escalation SMS, both within one
    // segment.
    let sms = app.sms.sent.lock().unwrap();
    assert_eq!(sms.len(), 2);
    assert!(sms.iter().all(|(_, body)| body.chars().count() <= 160));
    drop(sms);

    // The failure is visible to the back office.
    let admin = app.admin_token();
    let errors = app
        .request(
            Method::GET,
            "/api/v1/admin/notification-errors",
            Some(&admin),
            None,
        )
        .await;
    let errors_body = response_json(errors).await;
    let entries = errors_body["data"].as_array().unwrap();
    assert!(entries
        .iter()
        .any(|e| e["channel"] == "print" && e["severity"] == "critical"));
}

#[tokio::test]
async fn partial_print_failure_escalates_as_warning() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Tarte citron", dec!(24.00)).await;
    let customer = Uuid::new_v4();
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    // Copy 1 prints, copy 2 fails three times.
    app.printer.script_responses(vec![
        Some(PosResponse {
            document_printed: Some(1),
            ..Default::default()
        }),
        failed_print(),
        failed_print(),
        failed_print(),
    ]);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Warning tier: SMS escalation, no escalation email (SMS is configured).
    let sms = app.sms.sent.lock().unwrap();
    assert_eq!(sms.len(), 2);
    drop(sms);
    let mails = app.mailer.sent.lock().unwrap();
    assert_eq!(mails.len(), 2);
    assert!(!mails.iter().any(|m| m.subject.contains("WARNING")));
}

#[tokio::test]
async fn internal_endpoints_dispatch_with_shared_secret() {
    let app = TestApp::new().await;

    let unauthorized = app
        .request(
            Method::POST,
            "/api/v1/internal/notifications/email",
            None,
            Some(json!({ "to": "x@example.com", "subject": "s", "body": "b" })),
        )
        .await;
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let email = app
        .request(
            Method::POST,
            "/api/v1/internal/notifications/email",
            Some(TEST_CRON_SECRET),
            Some(json!({ "to": "x@example.com", "subject": "Fermeture", "body": "On ferme lundi" })),
        )
        .await;
    assert_eq!(email.status(), StatusCode::OK);
    let body = response_json(email).await;
    assert_eq!(body["data"]["success"], true);
    assert_eq!(app.mailer.sent.lock().unwrap().len(), 1);

    let sms = app
        .request(
            Method::POST,
            "/api/v1/internal/notifications/sms",
            Some(TEST_CRON_SECRET),
            Some(json!({ "to": "+33612345678", "body": "Test" })),
        )
        .await;
    assert_eq!(sms.status(), StatusCode::OK);
    assert_eq!(app.sms.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn internal_print_endpoint_reruns_the_protocol() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Opera", dec!(30.00)).await;
    let customer = Uuid::new_v4();
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(order_payload(product_id)),
        )
        .await;
    let body = response_json(created).await;
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();

    let prints_before = app.printer.printed.lock().unwrap().len();

    let reprint = app
        .request(
            Method::POST,
            "/api/v1/internal/notifications/print",
            Some(TEST_CRON_SECRET),
            Some(json!({ "order_id": order_id })),
        )
        .await;
    assert_eq!(reprint.status(), StatusCode::OK);
    let reprint_body = response_json(reprint).await;
    assert_eq!(reprint_body["data"]["success"], true);
    assert_eq!(reprint_body["data"]["printed"], 2);

    assert_eq!(app.printer.printed.lock().unwrap().len(), prints_before + 2);
}
