pub mod admin;
pub mod checkout;
pub mod common;
pub mod cron;
pub mod notifications;
pub mod orders;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        checkout::CheckoutService,
        notifications::{
            email::EmailSender, print::PrintService, print::ReceiptPrinter,
            reminders::ReminderService, sms::SmsSender, NotificationOptions, NotificationService,
            RecentErrors,
        },
        orders::OrderService,
        payment_gateway::PaymentGateway,
        payments::PaymentService,
        pricing::PricingService,
        special_codes::SpecialCodeService,
    },
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Size of the recent-errors ring backing the admin view.
const RECENT_ERRORS_CAPACITY: usize = 100;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub special_codes: Arc<SpecialCodeService>,
    pub notifications: Arc<NotificationService>,
    pub reminders: Arc<ReminderService>,
}

impl AppServices {
    /// Wire the service graph. The external integrations come in as trait
    /// objects so tests can substitute recording mocks.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        printer: Arc<dyn ReceiptPrinter>,
    ) -> Self {
        let special_codes = Arc::new(SpecialCodeService::new(db.clone()));
        let pricing = Arc::new(PricingService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            special_codes.clone(),
            Some(event_sender.clone()),
        ));

        let recent_errors = RecentErrors::new(RECENT_ERRORS_CAPACITY);
        let print = Arc::new(PrintService::new(
            printer,
            sms.clone(),
            mailer.clone(),
            db.clone(),
            recent_errors.clone(),
            config.print_copies,
            config.print_attempts,
            Duration::from_secs(config.print_retry_delay_secs),
            config.shop_phone.clone(),
            config.shop_email.clone(),
            Some(event_sender.clone()),
        ));

        let reminders = Arc::new(ReminderService::new(
            db.clone(),
            sms.clone(),
            config.reminder_batch_size,
            config.reminder_lookahead_mins,
            Some(event_sender.clone()),
        ));

        let notifications = Arc::new(NotificationService::new(
            db.clone(),
            mailer,
            sms,
            print,
            reminders.clone(),
            recent_errors,
            config.shop_email.clone(),
            config.shop_phone.clone(),
            NotificationOptions::for_environment(config.is_development()),
        ));

        let checkout = Arc::new(CheckoutService::new(
            gateway.clone(),
            orders.clone(),
            pricing,
            special_codes.clone(),
            notifications.clone(),
            config.currency.clone(),
            config.preauth_hold_days,
        ));

        let payments = Arc::new(PaymentService::new(
            db,
            gateway,
            Some(event_sender),
        ));

        Self {
            orders,
            checkout,
            payments,
            special_codes,
            notifications,
            reminders,
        }
    }
}
