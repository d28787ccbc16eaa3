use crate::{
    db::DbPool,
    entities::notification_error,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        notifications::{
            email::{escalation_email, EmailSender},
            sms::{truncate_for_sms, SmsSender},
            RecentErrors,
        },
        orders::OrderResponse,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Raw response of the POS print API. Every field is optional; validation
/// applies a strict precedence over whatever subset is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosResponse {
    #[serde(default)]
    pub document_printed: Option<i64>,
    #[serde(default)]
    pub printer_status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub connection_failed: Option<bool>,
    #[serde(default)]
    pub timeout: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintValidation {
    Success { warning: Option<String> },
    Failure(String),
}

/// Decide whether a single print call succeeded.
///
/// Precedence: missing response, explicit success flag, explicit error,
/// known printer statuses, explicit not-printed, transport flags. A response
/// that carries no success flag at all counts as success with a warning:
/// the API omits the flag on some firmware versions.
pub fn validate_print_response(response: Option<&PosResponse>) -> PrintValidation {
    let Some(response) = response else {
        return PrintValidation::Failure("No response from print API".to_string());
    };

    if response.document_printed == Some(1) {
        return PrintValidation::Success { warning: None };
    }

    if let Some(err) = &response.error {
        return PrintValidation::Failure(err.clone());
    }

    match response.printer_status.as_deref() {
        Some("offline") => return PrintValidation::Failure("Printer is offline".to_string()),
        Some("no_paper") => {
            return PrintValidation::Failure("Printer is out of paper".to_string())
        }
        _ => {}
    }

    if response.document_printed == Some(0) {
        return PrintValidation::Failure("Document failed to print".to_string());
    }

    if response.connection_failed == Some(true) {
        return PrintValidation::Failure("Connection to printer failed".to_string());
    }
    if response.timeout == Some(true) {
        return PrintValidation::Failure("Print request timed out".to_string());
    }

    PrintValidation::Success {
        warning: Some("Success flag missing from response; assuming printed".to_string()),
    }
}

/// A rendered receipt ready for the POS API.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub order_number: String,
    pub content: String,
}

/// Render the physical receipt text for an order.
pub fn render_receipt(order: &OrderResponse) -> Receipt {
    let mut lines = vec![
        format!("COMMANDE {}", order.order_number),
        format!(
            "Retrait: {} {}",
            order.pickup_date.format("%d/%m/%Y"),
            order.pickup_time
        ),
        format!("Client: {}", order.customer_name),
        format!("Tel: {}", order.customer_phone),
        "------------------------------".to_string(),
    ];

    for item in &order.items {
        let size = item
            .size
            .as_deref()
            .map(|s| format!(" ({})", s))
            .unwrap_or_default();
        lines.push(format!("{:>2} x {}{}", item.quantity, item.name, size));
        lines.push(format!("     {} {}", item.subtotal(), order.currency));
    }

    lines.push("------------------------------".to_string());
    lines.push(format!("TOTAL: {} {}", order.total_amount, order.currency));
    lines.push(format!("Paiement: {}", order.payment_method));
    if let Some(notes) = &order.notes {
        lines.push(format!("Note: {}", notes));
    }

    Receipt {
        order_number: order.order_number.clone(),
        content: lines.join("\n"),
    }
}

/// POS printer seam. A transport-level failure maps to `Ok(None)` so the
/// validator reports it as "no response"; only misuse surfaces as `Err`.
#[async_trait]
pub trait ReceiptPrinter: Send + Sync {
    async fn print(&self, receipt: &Receipt) -> Result<Option<PosResponse>, ServiceError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// POS print API over HTTP.
#[derive(Clone)]
pub struct HttpReceiptPrinter {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    printer_id: String,
}

impl HttpReceiptPrinter {
    pub fn new(api_url: String, api_key: String, printer_id: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_url,
            api_key,
            printer_id,
        }
    }
}

#[async_trait]
impl ReceiptPrinter for HttpReceiptPrinter {
    #[instrument(skip(self, receipt), fields(order_number = %receipt.order_number))]
    async fn print(&self, receipt: &Receipt) -> Result<Option<PosResponse>, ServiceError> {
        let payload = serde_json::json!({
            "printer_id": self.printer_id,
            "title": format!("Commande {}", receipt.order_number),
            "content": receipt.content,
        });

        let response = match self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Print API transport failure");
                return Ok(None);
            }
        };

        match response.json::<PosResponse>().await {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(error = %e, "Print API returned an unreadable body");
                Ok(None)
            }
        }
    }
}

/// Stand-in when no printer is configured; reports success without printing.
pub struct NoopReceiptPrinter;

#[async_trait]
impl ReceiptPrinter for NoopReceiptPrinter {
    async fn print(&self, receipt: &Receipt) -> Result<Option<PosResponse>, ServiceError> {
        debug!(order_number = %receipt.order_number, "Print channel not configured; skipping");
        Ok(Some(PosResponse {
            document_printed: Some(1),
            ..Default::default()
        }))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PrintSeverity {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct PrintOutcome {
    pub requested: u32,
    pub printed: u32,
    pub severity: PrintSeverity,
    pub errors: Vec<String>,
}

/// Drives the two-copy print protocol: bounded retries per copy with a fixed
/// pause, strict sequencing, severity classification, and staff escalation.
pub struct PrintService {
    printer: Arc<dyn ReceiptPrinter>,
    sms: Arc<dyn SmsSender>,
    mailer: Arc<dyn EmailSender>,
    db: Arc<DbPool>,
    recent_errors: RecentErrors,
    copies: u32,
    attempts: u32,
    retry_delay: Duration,
    shop_phone: Option<String>,
    shop_email: String,
    event_sender: Option<Arc<EventSender>>,
}

impl PrintService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        printer: Arc<dyn ReceiptPrinter>,
        sms: Arc<dyn SmsSender>,
        mailer: Arc<dyn EmailSender>,
        db: Arc<DbPool>,
        recent_errors: RecentErrors,
        copies: u32,
        attempts: u32,
        retry_delay: Duration,
        shop_phone: Option<String>,
        shop_email: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            printer,
            sms,
            mailer,
            db,
            recent_errors,
            copies: copies.max(1),
            attempts: attempts.max(1),
            retry_delay,
            shop_phone,
            shop_email,
            event_sender,
        }
    }

    /// Print all copies of the order receipt.
    ///
    /// Returns `Ok` for full and partial success; only a total failure is an
    /// error, and by then staff escalation has already been attempted.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn print_order_receipts(
        &self,
        order: &OrderResponse,
    ) -> Result<PrintOutcome, ServiceError> {
        let receipt = render_receipt(order);
        let mut printed = 0u32;
        let mut errors: Vec<String> = Vec::new();

        for copy in 1..=self.copies {
            let mut copy_ok = false;

            for attempt in 1..=self.attempts {
                let response = match self.printer.print(&receipt).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(copy = copy, attempt = attempt, error = %e, "Print call failed");
                        None
                    }
                };

                match validate_print_response(response.as_ref()) {
                    PrintValidation::Success { warning } => {
                        if let Some(warning) = warning {
                            warn!(copy = copy, attempt = attempt, "{}", warning);
                        }
                        copy_ok = true;
                        break;
                    }
                    PrintValidation::Failure(message) => {
                        warn!(
                            copy = copy,
                            attempt = attempt,
                            error = %message,
                            "Receipt print attempt failed"
                        );
                        errors.push(format!("copy {} attempt {}: {}", copy, attempt, message));
                        if attempt < self.attempts {
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }

            if copy_ok {
                printed += 1;
            }
        }

        let severity = if printed == self.copies {
            PrintSeverity::Ok
        } else if printed > 0 {
            PrintSeverity::Warning
        } else {
            PrintSeverity::Critical
        };

        let outcome = PrintOutcome {
            requested: self.copies,
            printed,
            severity,
            errors,
        };

        match severity {
            PrintSeverity::Ok => {
                info!(printed = printed, "All receipt copies printed");
                Ok(outcome)
            }
            PrintSeverity::Warning => {
                warn!(
                    printed = printed,
                    requested = self.copies,
                    "Partial receipt print"
                );
                self.escalate(order, &outcome).await;
                Ok(outcome)
            }
            PrintSeverity::Critical => {
                error!(requested = self.copies, "No receipt copy printed");
                self.escalate(order, &outcome).await;
                Err(ServiceError::NotificationError(format!(
                    "Receipt printing failed for order {} (0/{} copies)",
                    order.order_number, self.copies
                )))
            }
        }
    }

    /// Alert shop staff about a degraded print. Escalation never retries and
    /// its own failures are only logged.
    async fn escalate(&self, order: &OrderResponse, outcome: &PrintOutcome) {
        let severity = outcome.severity.to_string();
        let raw_error = outcome
            .errors
            .last()
            .cloned()
            .unwrap_or_else(|| "unknown print error".to_string());

        self.record_error(order.id, &severity, &raw_error).await;

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::ReceiptPrintDegraded {
                    order_id: order.id,
                    severity: severity.clone(),
                    printed: outcome.printed,
                    requested: outcome.requested,
                })
                .await;
        }

        let formatted = format!(
            "Alerte impression ({}) commande {}: {}/{} tickets imprimes. Derniere erreur: {}",
            severity, order.order_number, outcome.printed, outcome.requested, raw_error
        );

        let sms_available = self.sms.is_configured() && self.shop_phone.is_some();
        if let Some(phone) = self.shop_phone.as_deref() {
            if self.sms.is_configured() {
                let body = truncate_for_sms(&formatted, &raw_error);
                if let Err(e) = self.sms.send(phone, &body).await {
                    warn!(error = %e, "Print escalation SMS failed");
                }
            }
        }

        if outcome.severity == PrintSeverity::Critical || !sms_available {
            let message =
                escalation_email(&severity, &order.order_number, &outcome.errors, &self.shop_email);
            if let Err(e) = self.mailer.send(&message).await {
                warn!(error = %e, "Print escalation email failed");
            }
        }
    }

    /// Persist the failure and mirror it into the ring buffer. Best-effort:
    /// a dead store must not take the escalation path down with it.
    async fn record_error(&self, order_id: Uuid, severity: &str, message: &str) {
        self.recent_errors
            .push("print", severity, message, Some(order_id));

        let row = notification_error::ActiveModel {
            id: Set(Uuid::new_v4()),
            channel: Set("print".to_string()),
            severity: Set(severity.to_string()),
            message: Set(message.to_string()),
            order_id: Set(Some(order_id)),
            created_at: Set(Utc::now()),
        };

        if let Err(e) = row.insert(&*self.db).await {
            warn!(error = %e, "Failed to persist notification error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::OrderItem;
    use crate::services::notifications::email::EmailMessage;
    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn sample_order() -> OrderResponse {
        OrderResponse {
            id: Uuid::new_v4(),
            order_number: "290824-001".to_string(),
            customer_id: Uuid::new_v4(),
            customer_name: "Marie Dupont".to_string(),
            customer_email: "marie@example.com".to_string(),
            customer_phone: "+33612345678".to_string(),
            items: vec![OrderItem {
                product_id: Some(Uuid::new_v4()),
                name: "Paris-Brest".to_string(),
                price: dec!(21.00),
                quantity: 2,
                size: None,
            }],
            total_amount: dec!(42.00),
            currency: "EUR".to_string(),
            pickup_date: Utc::now().date_naive(),
            pickup_time: "14:30".to_string(),
            payment_method: "onsite".to_string(),
            payment_status: "pending".to_string(),
            status: "pending".to_string(),
            requires_preauth: false,
            preauth_status: None,
            preauth_amount: None,
            preauth_expires_at: None,
            payment_reference: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    struct ScriptedPrinter {
        responses: Mutex<VecDeque<Option<PosResponse>>>,
    }

    impl ScriptedPrinter {
        fn new(responses: Vec<Option<PosResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl ReceiptPrinter for ScriptedPrinter {
        async fn print(&self, _receipt: &Receipt) -> Result<Option<PosResponse>, ServiceError> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(None))
        }
    }

    #[derive(Default)]
    struct RecordingSms {
        sent: Mutex<Vec<(String, String)>>,
        configured: bool,
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        async fn send(&self, to: &str, body: &str) -> Result<(), ServiceError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(())
        }

        fn is_configured(&self) -> bool {
            self.configured
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn printed() -> Option<PosResponse> {
        Some(PosResponse {
            document_printed: Some(1),
            ..Default::default()
        })
    }

    fn not_printed() -> Option<PosResponse> {
        Some(PosResponse {
            document_printed: Some(0),
            ..Default::default()
        })
    }

    fn service(
        printer: ScriptedPrinter,
        sms: Arc<RecordingSms>,
        mailer: Arc<RecordingMailer>,
    ) -> PrintService {
        PrintService::new(
            Arc::new(printer),
            sms,
            mailer,
            Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection()),
            RecentErrors::new(16),
            2,
            3,
            Duration::from_secs(2),
            Some("+33600000000".to_string()),
            "shop@patisserie.example".to_string(),
            None,
        )
    }

    // Validation precedence table

    #[test]
    fn explicit_success_flag_is_success() {
        let response = PosResponse {
            document_printed: Some(1),
            ..Default::default()
        };
        assert_eq!(
            validate_print_response(Some(&response)),
            PrintValidation::Success { warning: None }
        );
    }

    #[test]
    fn explicit_not_printed_is_failure() {
        let response = PosResponse {
            document_printed: Some(0),
            ..Default::default()
        };
        match validate_print_response(Some(&response)) {
            PrintValidation::Failure(msg) => assert!(msg.to_lowercase().contains("failed to print")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn offline_status_is_failure() {
        let response = PosResponse {
            printer_status: Some("offline".to_string()),
            ..Default::default()
        };
        match validate_print_response(Some(&response)) {
            PrintValidation::Failure(msg) => assert!(msg.contains("offline")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn no_paper_status_is_failure() {
        let response = PosResponse {
            printer_status: Some("no_paper".to_string()),
            ..Default::default()
        };
        match validate_print_response(Some(&response)) {
            PrintValidation::Failure(msg) => assert!(msg.contains("paper")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn missing_response_is_failure() {
        match validate_print_response(None) {
            PrintValidation::Failure(msg) => assert!(msg.contains("No response")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn empty_response_is_permissive_success() {
        let response = PosResponse::default();
        match validate_print_response(Some(&response)) {
            PrintValidation::Success { warning } => assert!(warning.is_some()),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn explicit_error_beats_status() {
        let response = PosResponse {
            error: Some("fuse blown".to_string()),
            printer_status: Some("offline".to_string()),
            ..Default::default()
        };
        assert_eq!(
            validate_print_response(Some(&response)),
            PrintValidation::Failure("fuse blown".to_string())
        );
    }

    #[test]
    fn success_flag_beats_error_field() {
        let response = PosResponse {
            document_printed: Some(1),
            error: Some("stale error".to_string()),
            ..Default::default()
        };
        assert_eq!(
            validate_print_response(Some(&response)),
            PrintValidation::Success { warning: None }
        );
    }

    #[test]
    fn transport_flags_are_failures() {
        let response = PosResponse {
            connection_failed: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            validate_print_response(Some(&response)),
            PrintValidation::Failure(_)
        ));

        let response = PosResponse {
            timeout: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            validate_print_response(Some(&response)),
            PrintValidation::Failure(_)
        ));
    }

    // Protocol classification and escalation

    #[tokio::test(start_paused = true)]
    async fn two_successful_copies_need_no_escalation() {
        let sms = Arc::new(RecordingSms {
            configured: true,
            ..Default::default()
        });
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(
            ScriptedPrinter::new(vec![printed(), printed()]),
            sms.clone(),
            mailer.clone(),
        );

        let outcome = svc.print_order_receipts(&sample_order()).await.unwrap();
        assert_eq!(outcome.severity, PrintSeverity::Ok);
        assert_eq!(outcome.printed, 2);
        assert!(sms.sent.lock().unwrap().is_empty());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn one_copy_out_of_two_is_warning_without_error() {
        let sms = Arc::new(RecordingSms {
            configured: true,
            ..Default::default()
        });
        let mailer = Arc::new(RecordingMailer::default());
        // Copy 1 prints; copy 2 exhausts its three attempts.
        let svc = service(
            ScriptedPrinter::new(vec![printed(), not_printed(), not_printed(), not_printed()]),
            sms.clone(),
            mailer.clone(),
        );

        let outcome = svc.print_order_receipts(&sample_order()).await.unwrap();
        assert_eq!(outcome.severity, PrintSeverity::Warning);
        assert_eq!(outcome.printed, 1);

        // Warning escalates over SMS; email is reserved for critical (SMS is
        // configured here).
        assert_eq!(sms.sent.lock().unwrap().len(), 1);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_copies_is_critical_error_with_sms_and_email() {
        let sms = Arc::new(RecordingSms {
            configured: true,
            ..Default::default()
        });
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(ScriptedPrinter::new(vec![]), sms.clone(), mailer.clone());

        let result = svc.print_order_receipts(&sample_order()).await;
        assert!(result.is_err());

        assert_eq!(sms.sent.lock().unwrap().len(), 1);
        let mails = mailer.sent.lock().unwrap();
        assert_eq!(mails.len(), 1);
        assert!(mails[0].subject.contains("CRITICAL"));
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_falls_back_to_email_when_sms_unconfigured() {
        let sms = Arc::new(RecordingSms {
            configured: false,
            ..Default::default()
        });
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(
            ScriptedPrinter::new(vec![printed(), not_printed(), not_printed(), not_printed()]),
            sms.clone(),
            mailer.clone(),
        );

        let outcome = svc.print_order_receipts(&sample_order()).await.unwrap();
        assert_eq!(outcome.severity, PrintSeverity::Warning);

        assert!(sms.sent.lock().unwrap().is_empty());
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_per_copy() {
        let sms = Arc::new(RecordingSms {
            configured: true,
            ..Default::default()
        });
        let mailer = Arc::new(RecordingMailer::default());
        // 6 scripted failures: 3 attempts per copy, both copies fail, and no
        // further calls are made.
        let svc = service(
            ScriptedPrinter::new(vec![
                not_printed(),
                not_printed(),
                not_printed(),
                not_printed(),
                not_printed(),
                not_printed(),
            ]),
            sms,
            mailer,
        );

        let result = svc.print_order_receipts(&sample_order()).await;
        assert!(result.is_err());
        if let Err(ServiceError::NotificationError(msg)) = result {
            assert!(msg.contains("0/2"));
        }
    }

    #[test]
    fn receipt_contains_items_and_total() {
        let order = sample_order();
        let receipt = render_receipt(&order);
        assert!(receipt.content.contains("Paris-Brest"));
        assert!(receipt.content.contains("TOTAL: 42.00 EUR"));
        assert!(receipt.content.contains("290824-001"));
    }
}
