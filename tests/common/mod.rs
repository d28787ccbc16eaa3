//! Shared test harness: an application state backed by in-memory SQLite and
//! recording mocks for every external integration.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use patisserie_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{order, product},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        notifications::{
            email::{EmailMessage, EmailSender},
            print::{PosResponse, Receipt, ReceiptPrinter},
            sms::SmsSender,
        },
        orders::{NewOrder, OrderStatus, PaymentMethod, PaymentStatus},
        payment_gateway::{
            GatewayCharge, GatewaySession, GatewaySetupIntent, PaymentGateway, SessionRequest,
        },
    },
    AppState,
};

pub const TEST_JWT_SECRET: &str = "integration_test_jwt_secret_0123456789abcdef";
pub const TEST_CRON_SECRET: &str = "integration_cron_secret";

/// Scriptable payment gateway double. Sessions are held in memory; tests
/// flip them to completed the way a customer finishing the hosted page
/// would.
#[derive(Default)]
pub struct MockGateway {
    sessions: Mutex<HashMap<String, GatewaySession>>,
    setup_intents: Mutex<HashMap<String, GatewaySetupIntent>>,
    counter: Mutex<u32>,
    pub captured: Mutex<Vec<(String, i64)>>,
    pub released: Mutex<Vec<String>>,
    pub fail_release: Mutex<bool>,
}

impl MockGateway {
    fn next_id(&self, prefix: &str) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("{}_{:04}", prefix, counter)
    }

    /// Simulate the customer completing the hosted payment page.
    pub fn complete_payment(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session.payment_status = Some("paid".to_string());
        session.status = Some("complete".to_string());
    }

    /// Simulate the customer completing the hosted setup (hold) page.
    pub fn complete_setup(&self, session_id: &str) -> String {
        let setup_intent_id = self.next_id("seti");
        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions.get_mut(session_id).expect("unknown session");
            session.setup_intent = Some(setup_intent_id.clone());
            session.status = Some("complete".to_string());
        }
        self.setup_intents.lock().unwrap().insert(
            setup_intent_id.clone(),
            GatewaySetupIntent {
                id: setup_intent_id.clone(),
                status: "succeeded".to_string(),
                payment_method: Some("pm_test_visa".to_string()),
            },
        );
        setup_intent_id
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let id = self.next_id("cs");
        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("https://gateway.test/pay/{}", id)),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            setup_intent: None,
            amount_total: Some(request.amount_minor),
            metadata: request.metadata,
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn create_setup_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let id = self.next_id("cs_setup");
        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("https://gateway.test/setup/{}", id)),
            status: Some("open".to_string()),
            payment_status: None,
            setup_intent: None,
            amount_total: Some(request.amount_minor),
            metadata: request.metadata,
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Gateway session not found".to_string()))
    }

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<GatewaySetupIntent, ServiceError> {
        self.setup_intents
            .lock()
            .unwrap()
            .get(setup_intent_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Setup intent not found".to_string()))
    }

    async fn capture_hold(
        &self,
        setup_intent_id: &str,
        amount_minor: i64,
        _currency: &str,
        _description: &str,
    ) -> Result<GatewayCharge, ServiceError> {
        self.captured
            .lock()
            .unwrap()
            .push((setup_intent_id.to_string(), amount_minor));
        Ok(GatewayCharge {
            id: self.next_id("pi"),
            status: "succeeded".to_string(),
            amount: amount_minor,
            currency: "eur".to_string(),
        })
    }

    async fn release_hold(&self, setup_intent_id: &str) -> Result<(), ServiceError> {
        if *self.fail_release.lock().unwrap() {
            return Err(ServiceError::ExternalServiceError(
                "gateway unavailable".to_string(),
            ));
        }
        self.released
            .lock()
            .unwrap()
            .push(setup_intent_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_next: Mutex<u32>,
}

impl RecordingSms {
    pub fn fail_next(&self, count: u32) {
        *self.fail_next.lock().unwrap() = count;
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), ServiceError> {
        {
            let mut remaining = self.fail_next.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ServiceError::NotificationError(
                    "sms provider rejected message".to_string(),
                ));
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

/// Printer double: scripted responses first, then unconditional success.
#[derive(Default)]
pub struct MockPrinter {
    pub script: Mutex<VecDeque<Option<PosResponse>>>,
    pub printed: Mutex<Vec<String>>,
}

impl MockPrinter {
    pub fn script_responses(&self, responses: Vec<Option<PosResponse>>) {
        *self.script.lock().unwrap() = responses.into();
    }
}

#[async_trait]
impl ReceiptPrinter for MockPrinter {
    async fn print(&self, receipt: &Receipt) -> Result<Option<PosResponse>, ServiceError> {
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        self.printed.lock().unwrap().push(receipt.order_number.clone());
        Ok(Some(PosResponse {
            document_printed: Some(1),
            ..Default::default()
        }))
    }
}

/// Helper harness for spinning up an application backed by an in-memory
/// SQLite database and mock integrations.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub auth: Arc<AuthService>,
    pub gateway: Arc<MockGateway>,
    pub mailer: Arc<RecordingMailer>,
    pub sms: Arc<RecordingSms>,
    pub printer: Arc<MockPrinter>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state. All
    /// notification channels are enabled (production defaults) and the print
    /// retry pause is zeroed so retries don't slow the suite down.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            TEST_CRON_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "production".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.print_retry_delay_secs = 0;
        cfg.shop_phone = Some("+33600000000".to_string());
        cfg.shop_email = "shop@patisserie.example".to_string();

        let db = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("sqlite connection");
        db::run_migrations(&db).await.expect("migrations");
        let db = Arc::new(db);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth = Arc::new(AuthService::new(AuthConfig::new(
            TEST_JWT_SECRET.to_string(),
            Duration::from_secs(3600),
        )));

        let gateway = Arc::new(MockGateway::default());
        let mailer = Arc::new(RecordingMailer::default());
        let sms = Arc::new(RecordingSms::default());
        let printer = Arc::new(MockPrinter::default());

        let services = AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            &cfg,
            gateway.clone(),
            mailer.clone(),
            sms.clone(),
            printer.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
            auth: auth.clone(),
        };

        let router = patisserie_api::app_router(state.clone());

        Self {
            router,
            state,
            auth,
            gateway,
            mailer,
            sms,
            printer,
            _event_task: event_task,
        }
    }

    pub fn customer_token(&self, customer_id: Uuid) -> String {
        self.auth
            .generate_token(
                customer_id,
                Some("Marie Dupont".to_string()),
                Some("marie@example.com".to_string()),
                vec!["customer".to_string()],
                vec![],
            )
            .expect("token")
    }

    pub fn admin_token(&self) -> String {
        self.auth
            .generate_token(
                Uuid::new_v4(),
                Some("Chef".to_string()),
                Some("chef@patisserie.example".to_string()),
                vec!["admin".to_string()],
                vec![],
            )
            .expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Seed a catalog product and return its id.
    pub async fn seed_product(&self, name: &str, price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price: Set(price),
            sizes: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
        id
    }

    /// Seed a completed, paid order so the customer no longer counts as
    /// first-time.
    pub async fn seed_paid_order(&self, customer_id: Uuid) -> Uuid {
        let item = order::OrderItem {
            product_id: None,
            name: "Ancienne commande".to_string(),
            price: Decimal::new(1000, 2),
            quantity: 1,
            size: None,
        };
        let outcome = self
            .state
            .services
            .orders
            .create_order(NewOrder {
                customer_id,
                customer_name: "Marie Dupont".to_string(),
                customer_email: "marie@example.com".to_string(),
                customer_phone: "+33612345678".to_string(),
                items: vec![item.clone()],
                total_amount: item.subtotal(),
                currency: "EUR".to_string(),
                pickup_date: Utc::now().date_naive(),
                pickup_time: "10:00".to_string(),
                payment_method: PaymentMethod::Onsite,
                payment_status: PaymentStatus::Paid,
                status: OrderStatus::Completed,
                requires_preauth: false,
                preauth_status: None,
                preauth_amount: None,
                preauth_expires_at: None,
                payment_reference: None,
                special_code_id: None,
                notes: None,
            })
            .await
            .expect("seed paid order");
        outcome.order.id
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
