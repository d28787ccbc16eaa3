use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderItem},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{
        order_numbers::OrderNumberGenerator, pricing::items_total,
        special_codes::SpecialCodeService,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// How many times a unique-conflict insert regenerates the order number.
const NUMBER_CONFLICT_RETRIES: u32 = 3;
/// Pause between conflict retries.
const NUMBER_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Forward lifecycle plus cancellation from any non-terminal state.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Ready)
                | (Ready, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Ready, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PreAuthStatus {
    Pending,
    Authorized,
    Captured,
    Released,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Online,
    Onsite,
}

/// Fully resolved order data handed to the materializer. Items are already
/// priced and the total already computed by the intake path.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub pickup_date: NaiveDate,
    pub pickup_time: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub requires_preauth: bool,
    pub preauth_status: Option<PreAuthStatus>,
    pub preauth_amount: Option<Decimal>,
    pub preauth_expires_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub special_code_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub pickup_date: NaiveDate,
    pub pickup_time: String,
    pub payment_method: String,
    pub payment_status: String,
    pub status: String,
    pub requires_preauth: bool,
    pub preauth_status: Option<String>,
    pub preauth_amount: Option<Decimal>,
    pub preauth_expires_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of a materialization attempt. `created` is false when an existing
/// order was returned for a duplicate payment confirmation; callers skip
/// notification fan-out in that case.
#[derive(Debug)]
pub struct CreateOrderOutcome {
    pub order: OrderResponse,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

/// Service for materializing and querying orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    order_numbers: OrderNumberGenerator,
    special_codes: Arc<SpecialCodeService>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        special_codes: Arc<SpecialCodeService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let order_numbers = OrderNumberGenerator::new(db.clone());
        Self {
            db,
            order_numbers,
            special_codes,
            event_sender,
        }
    }

    /// Materialize an order exactly once.
    ///
    /// The order number comes from the daily counter; a unique-constraint
    /// conflict on it regenerates and retries a bounded number of times. A
    /// conflict on the payment reference means a concurrent duplicate
    /// confirmation already created the order, which is then returned
    /// instead of erroring.
    #[instrument(skip(self, new_order), fields(customer_id = %new_order.customer_id))]
    pub async fn create_order(
        &self,
        new_order: NewOrder,
    ) -> Result<CreateOrderOutcome, ServiceError> {
        if new_order.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        if new_order.total_amount != items_total(&new_order.items) {
            return Err(ServiceError::InvalidInput(
                "Order total does not match item subtotals".to_string(),
            ));
        }
        if new_order.requires_preauth && new_order.preauth_status.is_none() {
            return Err(ServiceError::InvalidInput(
                "Pre-authorized order is missing its hold status".to_string(),
            ));
        }

        let now = Utc::now();
        let mut last_err: Option<ServiceError> = None;

        for attempt in 1..=NUMBER_CONFLICT_RETRIES {
            let order_number = self.order_numbers.next(now).await?;

            match self.try_insert(&new_order, &order_number, now).await {
                Ok(model) => {
                    info!(order_id = %model.id, order_number = %model.order_number, "Order created");
                    self.emit_creation_events(&model, &new_order).await;
                    return Ok(CreateOrderOutcome {
                        order: model_to_response(model),
                        created: true,
                    });
                }
                Err(ServiceError::DatabaseError(e)) if is_unique_violation(&e) => {
                    let text = e.to_string();
                    if text.contains("payment_reference") {
                        // A concurrent duplicate callback won the race.
                        if let Some(reference) = new_order.payment_reference.as_deref() {
                            if let Some(existing) =
                                self.find_by_payment_reference(reference).await?
                            {
                                info!(
                                    order_id = %existing.id,
                                    "Duplicate confirmation detected; returning existing order"
                                );
                                return Ok(CreateOrderOutcome {
                                    order: model_to_response(existing),
                                    created: false,
                                });
                            }
                        }
                        return Err(ServiceError::Conflict(
                            "Order already exists for this payment reference".to_string(),
                        ));
                    }

                    warn!(
                        order_number = %order_number,
                        attempt = attempt,
                        "Order number collision; regenerating"
                    );
                    last_err = Some(ServiceError::DatabaseError(e));
                    if attempt < NUMBER_CONFLICT_RETRIES {
                        tokio::time::sleep(NUMBER_RETRY_DELAY).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        // Retries exhausted. One final idempotency check before giving up.
        if let Some(reference) = new_order.payment_reference.as_deref() {
            if let Some(existing) = self.find_by_payment_reference(reference).await? {
                warn!(
                    order_id = %existing.id,
                    "Numbering conflict resolved to concurrently-created order"
                );
                return Ok(CreateOrderOutcome {
                    order: model_to_response(existing),
                    created: false,
                });
            }
        }

        error!("Order creation failed after {} numbering attempts", NUMBER_CONFLICT_RETRIES);
        Err(last_err.unwrap_or_else(|| {
            ServiceError::InternalError("Order creation failed".to_string())
        }))
    }

    async fn try_insert(
        &self,
        new_order: &NewOrder,
        order_number: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = Uuid::new_v4();
        let items_json =
            serde_json::to_value(&new_order.items).map_err(ServiceError::from)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let active = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.to_string()),
            customer_id: Set(new_order.customer_id),
            customer_name: Set(new_order.customer_name.clone()),
            customer_email: Set(new_order.customer_email.clone()),
            customer_phone: Set(new_order.customer_phone.clone()),
            items: Set(items_json),
            total_amount: Set(new_order.total_amount),
            currency: Set(new_order.currency.clone()),
            pickup_date: Set(new_order.pickup_date),
            pickup_time: Set(new_order.pickup_time.clone()),
            payment_method: Set(new_order.payment_method.to_string()),
            payment_status: Set(new_order.payment_status.to_string()),
            status: Set(new_order.status.to_string()),
            requires_preauth: Set(new_order.requires_preauth),
            preauth_status: Set(new_order.preauth_status.map(|s| s.to_string())),
            preauth_amount: Set(new_order.preauth_amount),
            preauth_expires_at: Set(new_order.preauth_expires_at),
            payment_reference: Set(new_order.payment_reference.clone()),
            special_code_id: Set(new_order.special_code_id),
            notes: Set(new_order.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let model = active.insert(&txn).await.map_err(ServiceError::db_error)?;

        // The code burns only if the order commits: both live in one
        // transaction.
        if let Some(code_id) = new_order.special_code_id {
            self.special_codes
                .consume_in_txn(&txn, code_id, order_id, now)
                .await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(model)
    }

    async fn emit_creation_events(&self, model: &OrderModel, new_order: &NewOrder) {
        let Some(sender) = &self.event_sender else {
            return;
        };

        if let Err(e) = sender.send(Event::OrderCreated(model.id)).await {
            warn!(error = %e, order_id = %model.id, "Failed to send order created event");
        }

        if let Some(code_id) = new_order.special_code_id {
            let _ = sender
                .send(Event::SpecialCodeConsumed {
                    code_id,
                    order_id: model.id,
                })
                .await;
        }

        if new_order.preauth_status == Some(PreAuthStatus::Authorized) {
            if let (Some(amount), Some(expires_at)) =
                (new_order.preauth_amount, new_order.preauth_expires_at)
            {
                let _ = sender
                    .send(Event::PreAuthAuthorized {
                        order_id: model.id,
                        amount,
                        expires_at,
                    })
                    .await;
            }
        }
    }

    /// Find an order by its external payment confirmation token.
    pub async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Whether the customer has never completed a paid order.
    pub async fn is_first_time_customer(&self, customer_id: Uuid) -> Result<bool, ServiceError> {
        let paid = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid.to_string()))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(paid == 0)
    }

    /// Retrieves an order by ID.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(order.map(model_to_response))
    }

    pub async fn get_order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Lists orders with pagination, newest first, optionally scoped to one
    /// customer.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Updates an order's lifecycle status, validating the transition.
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let next = OrderStatus::from_str(&request.status).map_err(|_| {
            ServiceError::ValidationError(format!("Unknown order status: {}", request.status))
        })?;

        let now = Utc::now();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let current = OrderStatus::from_str(&order.status).map_err(|_| {
            ServiceError::InternalError(format!("Stored order status is invalid: {}", order.status))
        })?;

        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move order from {} to {}",
                current, next
            )));
        }

        let old_status = order.status.clone();
        let version = order.version;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(next.to_string());
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes));
        }

        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %next, "Order status updated");

        if let Some(sender) = &self.event_sender {
            let event = if next == OrderStatus::Cancelled {
                Event::OrderCancelled(order_id)
            } else {
                Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: next.to_string(),
                }
            };
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "Failed to send status change event");
            }
        }

        Ok(model_to_response(updated))
    }

    /// Cancels an order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        self.update_order_status(
            order_id,
            UpdateOrderStatusRequest {
                status: OrderStatus::Cancelled.to_string(),
                notes: reason,
            },
        )
        .await
    }
}

/// Converts an order model to response format.
pub fn model_to_response(model: OrderModel) -> OrderResponse {
    let items = model.line_items().unwrap_or_else(|e| {
        error!(order_id = %model.id, error = %e, "Stored line items failed to deserialize");
        Vec::new()
    });

    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        customer_name: model.customer_name,
        customer_email: model.customer_email,
        customer_phone: model.customer_phone,
        items,
        total_amount: model.total_amount,
        currency: model.currency,
        pickup_date: model.pickup_date,
        pickup_time: model.pickup_time,
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        status: model.status,
        requires_preauth: model.requires_preauth,
        preauth_status: model.preauth_status,
        preauth_amount: model.preauth_amount,
        preauth_expires_at: model.preauth_expires_at,
        payment_reference: model.payment_reference,
        notes: model.notes,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Ready));
    }

    #[test]
    fn status_strings_round_trip() {
        assert_eq!(OrderStatus::Confirmed.to_string(), "confirmed");
        assert_eq!(
            OrderStatus::from_str("confirmed").unwrap(),
            OrderStatus::Confirmed
        );
        assert_eq!(PreAuthStatus::Authorized.to_string(), "authorized");
        assert_eq!(PaymentMethod::Onsite.to_string(), "onsite");
    }

    #[test]
    fn response_conversion_keeps_items() {
        let now = Utc::now();
        let items = vec![OrderItem {
            product_id: Some(Uuid::new_v4()),
            name: "Tarte citron".to_string(),
            price: "4.50".parse().unwrap(),
            quantity: 2,
            size: None,
        }];

        let model = OrderModel {
            id: Uuid::new_v4(),
            order_number: "290824-001".to_string(),
            customer_id: Uuid::new_v4(),
            customer_name: "Marie Dupont".to_string(),
            customer_email: "marie@example.com".to_string(),
            customer_phone: "+33612345678".to_string(),
            items: serde_json::to_value(&items).unwrap(),
            total_amount: "9.00".parse().unwrap(),
            currency: "EUR".to_string(),
            pickup_date: now.date_naive(),
            pickup_time: "14:30".to_string(),
            payment_method: "onsite".to_string(),
            payment_status: "pending".to_string(),
            status: "pending".to_string(),
            requires_preauth: false,
            preauth_status: None,
            preauth_amount: None,
            preauth_expires_at: None,
            payment_reference: None,
            special_code_id: None,
            notes: None,
            created_at: now,
            updated_at: Some(now),
            version: 1,
        };

        let response = model_to_response(model);
        assert_eq!(response.items, items);
        assert_eq!(response.order_number, "290824-001");
    }
}
