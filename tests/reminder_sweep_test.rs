//! Integration tests for pickup-reminder scheduling and the cron sweep.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, TEST_CRON_SECRET};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;
use uuid::Uuid;

use patisserie_api::entities::scheduled_reminder;

async fn place_order(app: &TestApp, customer: Uuid, days_ahead: i64) -> Uuid {
    let product_id = app.seed_product("Flan", dec!(3.50)).await;
    app.seed_paid_order(customer).await;
    let token = app.customer_token(customer);

    let payload = json!({
        "customer": {
            "first_name": "Marie",
            "last_name": "Dupont",
            "email": "marie@example.com",
            "phone": "+33612345678"
        },
        "pickup_date": (Utc::now().date_naive() + Duration::days(days_ahead)).to_string(),
        "pickup_time": "15:00",
        "payment_method": "onsite",
        "items": [{ "product_id": product_id, "quantity": 1 }]
    });

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    Uuid::parse_str(body["data"]["order"]["id"].as_str().unwrap()).unwrap()
}

async fn reminders_for(app: &TestApp, order_id: Uuid) -> Vec<scheduled_reminder::Model> {
    scheduled_reminder::Entity::find()
        .filter(scheduled_reminder::Column::OrderId.eq(order_id))
        .all(&*app.state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn far_pickup_gets_a_pending_reminder() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, Uuid::new_v4(), 3).await;

    let reminders = reminders_for(&app, order_id).await;
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].status, "pending");
    assert!(reminders[0].remind_at > Utc::now());
}

#[tokio::test]
async fn short_notice_pickup_gets_no_reminder() {
    let app = TestApp::new().await;
    // Same-day pickup: reminder time is already in the past.
    let order_id = place_order(&app, Uuid::new_v4(), 0).await;

    let reminders = reminders_for(&app, order_id).await;
    assert!(reminders.is_empty());
}

#[tokio::test]
async fn sweep_sends_due_reminders_and_marks_them_sent() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, Uuid::new_v4(), 3).await;

    // Age the reminder into the due window.
    let reminder = reminders_for(&app, order_id).await.remove(0);
    let mut active: scheduled_reminder::ActiveModel = reminder.into();
    active.remind_at = Set(Utc::now() - Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    let sms_before = app.sms.sent.lock().unwrap().len();

    let response = app
        .request(
            Method::POST,
            "/api/v1/cron/reminders/dispatch",
            Some(TEST_CRON_SECRET),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["due"], 1);
    assert_eq!(body["data"]["sent"], 1);
    assert_eq!(body["data"]["failed"], 0);

    // The reminder SMS went to the customer.
    let sent = app.sms.sent.lock().unwrap();
    assert_eq!(sent.len(), sms_before + 1);
    let (to, sms_body) = sent.last().unwrap();
    assert_eq!(to, "+33612345678");
    assert!(sms_body.contains("15:00"));
    drop(sent);

    let after = reminders_for(&app, order_id).await.remove(0);
    assert_eq!(after.status, "sent");
    assert!(after.sent_at.is_some());

    // Terminal reminders are never re-sent.
    let again = app
        .request(
            Method::POST,
            "/api/v1/cron/reminders/dispatch",
            Some(TEST_CRON_SECRET),
            None,
        )
        .await;
    let again_body = response_json(again).await;
    assert_eq!(again_body["data"]["due"], 0);
}

#[tokio::test]
async fn failed_send_marks_reminder_failed_and_stays_terminal() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, Uuid::new_v4(), 3).await;

    let reminder = reminders_for(&app, order_id).await.remove(0);
    let mut active: scheduled_reminder::ActiveModel = reminder.into();
    active.remind_at = Set(Utc::now() - Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    app.sms.fail_next(1);

    let response = app
        .request(
            Method::POST,
            "/api/v1/cron/reminders/dispatch",
            Some(TEST_CRON_SECRET),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["due"], 1);
    assert_eq!(body["data"]["sent"], 0);
    assert_eq!(body["data"]["failed"], 1);

    let after = reminders_for(&app, order_id).await.remove(0);
    assert_eq!(after.status, "failed");

    // A later sweep does not resurrect it.
    let again = app
        .request(
            Method::POST,
            "/api/v1/cron/reminders/dispatch",
            Some(TEST_CRON_SECRET),
            None,
        )
        .await;
    let again_body = response_json(again).await;
    assert_eq!(again_body["data"]["due"], 0);
}

#[tokio::test]
async fn duplicate_scheduling_is_skipped() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, Uuid::new_v4(), 3).await;

    // Re-running the scheduler for the same order is a no-op.
    let order = app
        .state
        .services
        .orders
        .get_order(order_id)
        .await
        .unwrap()
        .unwrap();
    app.state
        .services
        .reminders
        .schedule_for_order(&order)
        .await
        .unwrap();

    let reminders = reminders_for(&app, order_id).await;
    assert_eq!(reminders.len(), 1);
}
