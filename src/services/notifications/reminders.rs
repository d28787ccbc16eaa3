use crate::{
    db::DbPool,
    entities::scheduled_reminder::{self, Entity as ReminderEntity, Model as ReminderModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{notifications::sms::{reminder_sms, SmsSender}, orders::OrderResponse},
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use futures::future::join_all;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Reminders fire this long before pickup.
const REMINDER_LEAD: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
}

/// Result of a scheduling attempt. Skipping is a normal outcome, not an
/// error: short-notice orders simply get no reminder.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ScheduleOutcome {
    Scheduled {
        skipped: bool,
        reminder_id: Uuid,
        remind_at: DateTime<Utc>,
    },
    Skipped {
        skipped: bool,
        reason: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SweepSummary {
    pub due: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Schedules pickup reminders at order time and dispatches due ones from the
/// cron sweep.
#[derive(Clone)]
pub struct ReminderService {
    db: Arc<DbPool>,
    sms: Arc<dyn SmsSender>,
    batch_size: u64,
    lookahead: Duration,
    event_sender: Option<Arc<EventSender>>,
}

impl ReminderService {
    pub fn new(
        db: Arc<DbPool>,
        sms: Arc<dyn SmsSender>,
        batch_size: u64,
        lookahead_mins: i64,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            sms,
            batch_size: batch_size.max(1),
            lookahead: Duration::minutes(lookahead_mins.max(0)),
            event_sender,
        }
    }

    /// Schedule the pickup reminder for a freshly materialized order.
    ///
    /// Skips without error when pickup is less than 24 hours out or when a
    /// pending reminder already exists for the order.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn schedule_for_order(
        &self,
        order: &OrderResponse,
    ) -> Result<ScheduleOutcome, ServiceError> {
        let now = Utc::now();
        let pickup_at = pickup_datetime(order);
        let remind_at = pickup_at - REMINDER_LEAD;

        if remind_at <= now {
            info!(
                order_id = %order.id,
                pickup = %pickup_at,
                "Pickup is less than 24 hours away; skipping reminder"
            );
            return Ok(ScheduleOutcome::Skipped {
                skipped: true,
                reason: "pickup is less than 24 hours away".to_string(),
            });
        }

        let existing = ReminderEntity::find()
            .filter(scheduled_reminder::Column::OrderId.eq(order.id))
            .filter(scheduled_reminder::Column::Status.eq(ReminderStatus::Pending.to_string()))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if existing > 0 {
            info!(order_id = %order.id, "Reminder already scheduled; skipping");
            return Ok(ScheduleOutcome::Skipped {
                skipped: true,
                reason: "a reminder is already scheduled for this order".to_string(),
            });
        }

        let reminder_id = Uuid::new_v4();
        let row = scheduled_reminder::ActiveModel {
            id: Set(reminder_id),
            order_id: Set(order.id),
            remind_at: Set(remind_at),
            customer_name: Set(order.customer_name.clone()),
            customer_phone: Set(order.customer_phone.clone()),
            pickup_date: Set(order.pickup_date),
            pickup_time: Set(order.pickup_time.clone()),
            status: Set(ReminderStatus::Pending.to_string()),
            created_at: Set(now),
            sent_at: Set(None),
        };
        row.insert(&*self.db).await.map_err(ServiceError::db_error)?;

        info!(order_id = %order.id, remind_at = %remind_at, "Pickup reminder scheduled");

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::ReminderScheduled {
                    order_id: order.id,
                    remind_at,
                })
                .await;
        }

        Ok(ScheduleOutcome::Scheduled {
            skipped: false,
            reminder_id,
            remind_at,
        })
    }

    /// Dispatch reminders due within the look-ahead window, a bounded batch
    /// per sweep. Each reminder settles independently: one failed send marks
    /// only its own row `failed`.
    #[instrument(skip(self))]
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<SweepSummary, ServiceError> {
        let window_end = now + self.lookahead;

        let due = ReminderEntity::find()
            .filter(scheduled_reminder::Column::Status.eq(ReminderStatus::Pending.to_string()))
            .filter(scheduled_reminder::Column::RemindAt.lte(window_end))
            .order_by_asc(scheduled_reminder::Column::RemindAt)
            .limit(self.batch_size)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut summary = SweepSummary {
            due: due.len() as u64,
            ..Default::default()
        };

        if due.is_empty() {
            return Ok(summary);
        }

        let sends = due.iter().map(|reminder| {
            let sms = self.sms.clone();
            let body = reminder_sms(reminder);
            let phone = reminder.customer_phone.clone();
            let id = reminder.id;
            async move { (id, sms.send(&phone, &body).await) }
        });
        let results = join_all(sends).await;

        for (reminder, (id, result)) in due.into_iter().zip(results) {
            debug_assert_eq!(reminder.id, id);
            let (status, order_id) = match &result {
                Ok(()) => (ReminderStatus::Sent, reminder.order_id),
                Err(e) => {
                    warn!(reminder_id = %id, error = %e, "Reminder SMS failed");
                    (ReminderStatus::Failed, reminder.order_id)
                }
            };

            if let Err(e) = self.mark(reminder, status, now).await {
                warn!(reminder_id = %id, error = %e, "Failed to mark reminder terminal");
                summary.failed += 1;
                continue;
            }

            match status {
                ReminderStatus::Sent => {
                    summary.sent += 1;
                    if let Some(sender) = &self.event_sender {
                        let _ = sender.send(Event::ReminderSent(order_id)).await;
                    }
                }
                _ => {
                    summary.failed += 1;
                    if let Some(sender) = &self.event_sender {
                        let _ = sender.send(Event::ReminderFailed(order_id)).await;
                    }
                }
            }
        }

        info!(
            due = summary.due,
            sent = summary.sent,
            failed = summary.failed,
            "Reminder sweep finished"
        );
        Ok(summary)
    }

    async fn mark(
        &self,
        reminder: ReminderModel,
        status: ReminderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut active: scheduled_reminder::ActiveModel = reminder.into();
        active.status = Set(status.to_string());
        if status == ReminderStatus::Sent {
            active.sent_at = Set(Some(now));
        }
        active.update(&*self.db).await.map_err(ServiceError::db_error)?;
        Ok(())
    }
}

/// Combine the stored pickup date and free-text time into an instant.
/// Accepts `HH:MM` and `HHhMM`; anything else falls back to mid-morning so a
/// sloppy time string still produces a sane reminder.
pub fn pickup_datetime(order: &OrderResponse) -> DateTime<Utc> {
    let time = parse_pickup_time(&order.pickup_time)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    order.pickup_date.and_time(time).and_utc()
}

fn parse_pickup_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%Hh%M"))
        .ok()
}
