use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{PaymentStatus, PreAuthStatus},
        payment_gateway::{to_minor_units, PaymentGateway},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PreAuthResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub preauth_status: String,
    pub payment_status: String,
    pub captured_amount: Option<Decimal>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ExpirySweepSummary {
    pub examined: u64,
    pub released: u64,
    pub failed: u64,
}

/// Admin-facing pre-authorization operations: capture a hold as a no-show
/// fee, release it when the customer settles in person, and the expiry sweep.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Charge some or all of an authorized hold. Defaults to the full hold
    /// amount.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn capture(
        &self,
        order_id: Uuid,
        capture_amount: Option<Decimal>,
    ) -> Result<PreAuthResponse, ServiceError> {
        let order = self.authorized_order(order_id).await?;
        let hold_amount = order.preauth_amount.ok_or_else(|| {
            ServiceError::InternalError("Authorized order has no hold amount".to_string())
        })?;

        let amount = capture_amount.unwrap_or(hold_amount);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Capture amount must be positive".to_string(),
            ));
        }
        if amount > hold_amount {
            return Err(ServiceError::ValidationError(format!(
                "Capture amount {} exceeds held amount {}",
                amount, hold_amount
            )));
        }

        let reference = order.payment_reference.clone().ok_or_else(|| {
            ServiceError::InternalError("Authorized order has no payment reference".to_string())
        })?;

        let charge = self
            .gateway
            .capture_hold(
                &reference,
                to_minor_units(amount)?,
                &order.currency,
                &format!("No-show fee for order {}", order.order_number),
            )
            .await?;

        info!(order_id = %order_id, charge_id = %charge.id, amount = %amount, "Hold captured");

        let updated = self
            .transition(order, PreAuthStatus::Captured, Some(PaymentStatus::Paid))
            .await?;

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::PreAuthCaptured { order_id, amount })
                .await;
        }

        Ok(PreAuthResponse {
            order_id: updated.id,
            order_number: updated.order_number,
            preauth_status: updated.preauth_status.unwrap_or_default(),
            payment_status: updated.payment_status,
            captured_amount: Some(amount),
        })
    }

    /// Cancel an authorized hold; the customer paid by other means in person.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release(&self, order_id: Uuid) -> Result<PreAuthResponse, ServiceError> {
        let order = self.authorized_order(order_id).await?;
        let reference = order.payment_reference.clone().ok_or_else(|| {
            ServiceError::InternalError("Authorized order has no payment reference".to_string())
        })?;

        self.gateway.release_hold(&reference).await?;
        info!(order_id = %order_id, "Hold released");

        let updated = self
            .transition(order, PreAuthStatus::Released, Some(PaymentStatus::Paid))
            .await?;

        if let Some(sender) = &self.event_sender {
            let _ = sender.send(Event::PreAuthReleased(order_id)).await;
        }

        Ok(PreAuthResponse {
            order_id: updated.id,
            order_number: updated.order_number,
            preauth_status: updated.preauth_status.unwrap_or_default(),
            payment_status: updated.payment_status,
            captured_amount: None,
        })
    }

    /// Release holds whose expiry has passed while still authorized. Each
    /// order is handled independently; one gateway failure does not stop the
    /// sweep. The expiry path proves nothing about payment, so
    /// `payment_status` is left untouched.
    #[instrument(skip(self))]
    pub async fn release_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ExpirySweepSummary, ServiceError> {
        let expired = OrderEntity::find()
            .filter(order::Column::RequiresPreauth.eq(true))
            .filter(order::Column::PreauthStatus.eq(PreAuthStatus::Authorized.to_string()))
            .filter(order::Column::PreauthExpiresAt.lt(now))
            .order_by_asc(order::Column::PreauthExpiresAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut summary = ExpirySweepSummary {
            examined: expired.len() as u64,
            ..Default::default()
        };

        for order in expired {
            let order_id = order.id;
            let result = match order.payment_reference.as_deref() {
                Some(reference) => self.gateway.release_hold(reference).await,
                None => Err(ServiceError::InternalError(
                    "Authorized order has no payment reference".to_string(),
                )),
            };

            match result {
                Ok(()) => match self.transition(order, PreAuthStatus::Released, None).await {
                    Ok(_) => {
                        summary.released += 1;
                        if let Some(sender) = &self.event_sender {
                            let _ = sender.send(Event::PreAuthExpired(order_id)).await;
                        }
                    }
                    Err(e) => {
                        error!(order_id = %order_id, error = %e, "Failed to record released hold");
                        summary.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Failed to release expired hold");
                    summary.failed += 1;
                }
            }
        }

        if summary.examined > 0 {
            info!(
                examined = summary.examined,
                released = summary.released,
                failed = summary.failed,
                "Expired-hold sweep finished"
            );
        }

        Ok(summary)
    }

    /// Fetch an order and require an `authorized` hold; anything else is a
    /// client error with no state mutation.
    async fn authorized_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if !order.requires_preauth {
            return Err(ServiceError::InvalidOperation(
                "Order has no pre-authorization".to_string(),
            ));
        }

        match order.preauth_status.as_deref() {
            Some(status) if status == PreAuthStatus::Authorized.to_string() => Ok(order),
            Some(status) => Err(ServiceError::InvalidOperation(format!(
                "Pre-authorization is {}, expected authorized",
                status
            ))),
            None => Err(ServiceError::InvalidOperation(
                "Order has no pre-authorization state".to_string(),
            )),
        }
    }

    async fn transition(
        &self,
        order: OrderModel,
        preauth_status: PreAuthStatus,
        payment_status: Option<PaymentStatus>,
    ) -> Result<OrderModel, ServiceError> {
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.preauth_status = Set(Some(preauth_status.to_string()));
        if let Some(payment_status) = payment_status {
            active.payment_status = Set(payment_status.to_string());
        }
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);

        active.update(&*self.db).await.map_err(ServiceError::db_error)
    }
}
