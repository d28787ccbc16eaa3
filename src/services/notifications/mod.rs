pub mod email;
pub mod print;
pub mod reminders;
pub mod sms;

use crate::{
    db::DbPool,
    entities::notification_error::{self, Entity as NotificationErrorEntity},
    errors::ServiceError,
    services::orders::OrderResponse,
};
use chrono::{DateTime, Utc};
use email::{order_confirmation_email, shop_copy_email, EmailSender};
use futures::future::{join_all, BoxFuture};
use print::PrintService;
use reminders::ReminderService;
use sea_orm::{EntityTrait, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use sms::{order_sms, SmsSender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Which channels a notify call fans out to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct NotificationOptions {
    pub customer_email: bool,
    pub shop_email: bool,
    pub shop_sms: bool,
    pub print_receipts: bool,
    pub schedule_reminder: bool,
}

impl NotificationOptions {
    pub fn all() -> Self {
        Self {
            customer_email: true,
            shop_email: true,
            shop_sms: true,
            print_receipts: true,
            schedule_reminder: true,
        }
    }

    /// Environment defaults: everything in production; print and SMS stay
    /// off in development so a laptop run does not page the shop.
    pub fn for_environment(development: bool) -> Self {
        Self {
            shop_sms: !development,
            print_receipts: !development,
            ..Self::all()
        }
    }
}

/// One recent notification failure, as shown in the admin view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecentErrorEntry {
    pub channel: String,
    pub severity: String,
    pub message: String,
    pub order_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Capped in-memory ring of recent notification failures. Process-lifetime
/// fast path for the admin view; the `notification_errors` table is the
/// durable record.
#[derive(Clone)]
pub struct RecentErrors {
    inner: Arc<Mutex<VecDeque<RecentErrorEntry>>>,
    capacity: usize,
}

impl RecentErrors {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, channel: &str, severity: &str, message: &str, order_id: Option<Uuid>) {
        let mut buffer = self.inner.lock().unwrap();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(RecentErrorEntry {
            channel: channel.to_string(),
            severity: severity.to_string(),
            message: message.to_string(),
            order_id,
            at: Utc::now(),
        });
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<RecentErrorEntry> {
        self.inner.lock().unwrap().iter().rev().cloned().collect()
    }
}

/// Post-materialization notification fan-out.
///
/// Channels run concurrently and settle independently: a failure in one
/// never blocks another and never rolls back the order. Only a total print
/// failure surfaces as an error, and callers swallow that too.
pub struct NotificationService {
    db: Arc<DbPool>,
    mailer: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    print: Arc<PrintService>,
    reminders: Arc<ReminderService>,
    recent_errors: RecentErrors,
    shop_email: String,
    shop_phone: Option<String>,
    defaults: NotificationOptions,
}

impl NotificationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        mailer: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        print: Arc<PrintService>,
        reminders: Arc<ReminderService>,
        recent_errors: RecentErrors,
        shop_email: String,
        shop_phone: Option<String>,
        defaults: NotificationOptions,
    ) -> Self {
        Self {
            db,
            mailer,
            sms,
            print,
            reminders,
            recent_errors,
            shop_email,
            shop_phone,
            defaults,
        }
    }

    pub fn reminders(&self) -> Arc<ReminderService> {
        self.reminders.clone()
    }

    pub fn print_service(&self) -> Arc<PrintService> {
        self.print.clone()
    }

    /// Direct channel access for the internal dispatch endpoints.
    pub async fn send_email(&self, message: &email::EmailMessage) -> Result<(), ServiceError> {
        self.mailer.send(message).await
    }

    pub async fn send_sms(&self, to: &str, body: &str) -> Result<(), ServiceError> {
        self.sms.send(to, body).await
    }

    pub fn recent_errors(&self) -> &RecentErrors {
        &self.recent_errors
    }

    /// Fan out with the environment defaults and swallow the result. This is
    /// what the order-creation paths call: a printer problem must never
    /// surface to the customer.
    pub async fn notify_after_creation(&self, order: &OrderResponse) {
        if let Err(e) = self.notify(order, &self.defaults).await {
            warn!(order_id = %order.id, error = %e, "Notification fan-out reported an error");
        }
    }

    /// Dispatch the selected channels concurrently and await their
    /// collective settlement.
    #[instrument(skip(self, order, options), fields(order_id = %order.id))]
    pub async fn notify(
        &self,
        order: &OrderResponse,
        options: &NotificationOptions,
    ) -> Result<(), ServiceError> {
        type ChannelResult = (&'static str, Result<(), ServiceError>);
        let mut channels: Vec<BoxFuture<'_, ChannelResult>> = Vec::new();

        if options.customer_email {
            let message = order_confirmation_email(order);
            let mailer = self.mailer.clone();
            channels.push(Box::pin(async move {
                ("customer_email", mailer.send(&message).await)
            }));
        }

        if options.shop_email {
            let message = shop_copy_email(order, &self.shop_email);
            let mailer = self.mailer.clone();
            channels.push(Box::pin(async move {
                ("shop_email", mailer.send(&message).await)
            }));
        }

        if options.shop_sms {
            match self.shop_phone.clone() {
                Some(phone) => {
                    let body = order_sms(order);
                    let sms = self.sms.clone();
                    channels.push(Box::pin(async move {
                        ("shop_sms", sms.send(&phone, &body).await)
                    }));
                }
                None => debug!("Shop SMS requested but no shop phone configured"),
            }
        }

        if options.print_receipts {
            let print = self.print.clone();
            channels.push(Box::pin(async move {
                ("print", print.print_order_receipts(order).await.map(|_| ()))
            }));
        }

        if options.schedule_reminder {
            let reminders = self.reminders.clone();
            channels.push(Box::pin(async move {
                ("reminder", reminders.schedule_for_order(order).await.map(|_| ()))
            }));
        }

        if channels.is_empty() {
            return Ok(());
        }

        let results = join_all(channels).await;

        let mut print_error: Option<ServiceError> = None;
        for (channel, result) in results {
            match result {
                Ok(()) => debug!(channel = channel, "Notification channel done"),
                Err(e) => {
                    warn!(channel = channel, error = %e, "Notification channel failed");
                    if channel != "print" {
                        // Print failures are recorded (durably) by the print
                        // escalation path itself.
                        self.recent_errors
                            .push(channel, "warning", &e.to_string(), Some(order.id));
                    }
                    if channel == "print" {
                        print_error = Some(e);
                    }
                }
            }
        }

        info!(order_id = %order.id, "Notification fan-out settled");

        match print_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Durable error log, newest first. Fallback for the admin view when the
    /// in-memory ring has been lost to a restart.
    pub async fn persisted_errors(
        &self,
        limit: u64,
    ) -> Result<Vec<RecentErrorEntry>, ServiceError> {
        let rows = NotificationErrorEntity::find()
            .order_by_desc(notification_error::Column::CreatedAt)
            .limit(limit.max(1))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| RecentErrorEntry {
                channel: row.channel,
                severity: row.severity,
                message: row.message,
                order_id: row.order_id,
                at: row.created_at,
            })
            .collect())
    }
}
