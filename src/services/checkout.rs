use crate::{
    entities::order::OrderItem,
    errors::ServiceError,
    services::{
        notifications::NotificationService,
        orders::{
            NewOrder, OrderResponse, OrderService, OrderStatus, PaymentMethod, PaymentStatus,
            PreAuthStatus,
        },
        payment_gateway::{to_minor_units, PaymentGateway, SessionRequest},
        pricing::{items_total, OrderItemInput, PricingService},
        special_codes::SpecialCodeService,
    },
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "A valid phone number is required"))]
    pub phone: String,
}

impl CustomerInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Incoming order request, shared by the on-site intake endpoint and the
/// payment-session endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    #[validate]
    pub customer: CustomerInfo,
    pub pickup_date: NaiveDate,
    #[validate(length(min = 1, message = "Pickup time is required"))]
    pub pickup_time: String,
    /// `online` or `onsite`
    pub payment_method: String,
    #[serde(default)]
    pub special_code: Option<String>,
    pub items: Vec<OrderItemInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Outcome of the on-site intake decision.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum IntakeOutcome {
    /// Order materialized immediately.
    OrderCreated { order: OrderResponse },
    /// A pre-authorization hold is required before the order can exist.
    PreAuthRequired {
        requires_preauth: bool,
        preauth_amount: Decimal,
        currency: String,
        preauth_expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: String,
    pub url: String,
}

/// Orchestrates intake eligibility, payment routing, and idempotent order
/// confirmation.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    pricing: Arc<PricingService>,
    special_codes: Arc<SpecialCodeService>,
    notifications: Arc<NotificationService>,
    currency: String,
    preauth_hold_days: i64,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        pricing: Arc<PricingService>,
        special_codes: Arc<SpecialCodeService>,
        notifications: Arc<NotificationService>,
        currency: String,
        preauth_hold_days: i64,
    ) -> Self {
        Self {
            gateway,
            orders,
            pricing,
            special_codes,
            notifications,
            currency,
            preauth_hold_days,
        }
    }

    /// On-site intake: decide between immediate materialization and the
    /// pre-authorization detour.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn place_onsite_order(
        &self,
        customer_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<IntakeOutcome, ServiceError> {
        request.validate()?;

        if request.payment_method != PaymentMethod::Onsite.to_string() {
            return Err(ServiceError::InvalidInput(
                "Online payment goes through the payment-session endpoint".to_string(),
            ));
        }

        let (items, total) = self.pricing.price_items(&request.items).await?;
        let now = Utc::now();

        // Invalid or expired codes reject the request before anything else
        // happens.
        let special_code = match request.special_code.as_deref() {
            Some(code) if !code.trim().is_empty() => {
                Some(self.special_codes.validate(code, now).await?)
            }
            _ => None,
        };

        let first_time = self.orders.is_first_time_customer(customer_id).await?;

        if first_time && special_code.is_none() {
            let expires_at = now + Duration::days(self.preauth_hold_days);
            info!(
                customer_id = %customer_id,
                amount = %total,
                "First-time customer without code; pre-authorization required"
            );
            return Ok(IntakeOutcome::PreAuthRequired {
                requires_preauth: true,
                preauth_amount: total,
                currency: self.currency.clone(),
                preauth_expires_at: expires_at,
            });
        }

        let new_order = NewOrder {
            customer_id,
            customer_name: request.customer.full_name(),
            customer_email: request.customer.email.clone(),
            customer_phone: request.customer.phone.clone(),
            items,
            total_amount: total,
            currency: self.currency.clone(),
            pickup_date: request.pickup_date,
            pickup_time: request.pickup_time.clone(),
            payment_method: PaymentMethod::Onsite,
            payment_status: PaymentStatus::Pending,
            status: OrderStatus::Pending,
            requires_preauth: false,
            preauth_status: None,
            preauth_amount: None,
            preauth_expires_at: None,
            payment_reference: None,
            special_code_id: special_code.map(|c| c.id),
            notes: request.notes,
        };

        let outcome = self.orders.create_order(new_order).await?;
        self.notifications.notify_after_creation(&outcome.order).await;

        Ok(IntakeOutcome::OrderCreated {
            order: outcome.order,
        })
    }

    /// Create a charge-mode session. The order does not exist locally yet;
    /// the session metadata carries everything needed to rebuild it.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn create_payment_session(
        &self,
        customer_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<SessionResponse, ServiceError> {
        request.validate()?;

        let (items, total) = self.pricing.price_items(&request.items).await?;

        let session = self
            .gateway
            .create_charge_session(SessionRequest {
                amount_minor: to_minor_units(total)?,
                currency: self.currency.clone(),
                customer_email: request.customer.email.clone(),
                description: format!("Commande retrait du {}", request.pickup_date),
                metadata: order_metadata(customer_id, &request, &items, None)?,
            })
            .await?;

        let url = session.url.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError("Gateway session has no redirect URL".to_string())
        })?;

        Ok(SessionResponse {
            session_id: session.id,
            url,
        })
    }

    /// Confirm a charge-mode session and materialize the order idempotently.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, session_id: &str) -> Result<OrderResponse, ServiceError> {
        if let Some(existing) = self.orders.find_by_payment_reference(session_id).await? {
            info!(order_id = %existing.id, "Session already confirmed; returning existing order");
            return Ok(crate::services::orders::model_to_response(existing));
        }

        let session = self.gateway.retrieve_session(session_id).await?;
        if session.payment_status.as_deref() != Some("paid") {
            return Err(ServiceError::PaymentFailed(
                "Payment has not completed for this session".to_string(),
            ));
        }

        let rebuilt = order_from_metadata(&session.metadata)?;
        let total = items_total(&rebuilt.items);

        let new_order = NewOrder {
            customer_id: rebuilt.customer_id,
            customer_name: rebuilt.customer_name,
            customer_email: rebuilt.customer_email,
            customer_phone: rebuilt.customer_phone,
            items: rebuilt.items,
            total_amount: total,
            currency: self.currency.clone(),
            pickup_date: rebuilt.pickup_date,
            pickup_time: rebuilt.pickup_time,
            payment_method: PaymentMethod::Online,
            payment_status: PaymentStatus::Paid,
            status: OrderStatus::Confirmed,
            requires_preauth: false,
            preauth_status: None,
            preauth_amount: None,
            preauth_expires_at: None,
            payment_reference: Some(session.id.clone()),
            special_code_id: None,
            notes: rebuilt.notes,
        };

        let outcome = self.orders.create_order(new_order).await?;
        if outcome.created {
            self.notifications.notify_after_creation(&outcome.order).await;
        }

        Ok(outcome.order)
    }

    /// Create a setup-mode session for the first-order hold.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn create_preauth_session(
        &self,
        customer_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<SessionResponse, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        if let Some(code) = request.special_code.as_deref() {
            if !code.trim().is_empty() {
                // A valid code means no hold is needed; send the client back
                // to the direct intake endpoint.
                self.special_codes.validate(code, now).await?;
                return Err(ServiceError::InvalidOperation(
                    "A valid special code waives the pre-authorization; place the order directly"
                        .to_string(),
                ));
            }
        }

        if !self.orders.is_first_time_customer(customer_id).await? {
            return Err(ServiceError::InvalidOperation(
                "Pre-authorization only applies to first-time customers".to_string(),
            ));
        }

        let (items, total) = self.pricing.price_items(&request.items).await?;

        let session = self
            .gateway
            .create_setup_session(SessionRequest {
                amount_minor: to_minor_units(total)?,
                currency: self.currency.clone(),
                customer_email: request.customer.email.clone(),
                description: format!("Empreinte bancaire retrait du {}", request.pickup_date),
                metadata: order_metadata(customer_id, &request, &items, Some(total))?,
            })
            .await?;

        let url = session.url.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError("Gateway session has no redirect URL".to_string())
        })?;

        Ok(SessionResponse {
            session_id: session.id,
            url,
        })
    }

    /// Confirm a setup-mode session: verify the hold succeeded, then
    /// materialize with the setup-intent id as the idempotency token.
    #[instrument(skip(self))]
    pub async fn confirm_preauth(&self, session_id: &str) -> Result<OrderResponse, ServiceError> {
        let session = self.gateway.retrieve_session(session_id).await?;
        let setup_intent_id = session.setup_intent.clone().ok_or_else(|| {
            ServiceError::PaymentFailed("Session carries no setup intent".to_string())
        })?;

        if let Some(existing) = self
            .orders
            .find_by_payment_reference(&setup_intent_id)
            .await?
        {
            info!(order_id = %existing.id, "Hold already confirmed; returning existing order");
            return Ok(crate::services::orders::model_to_response(existing));
        }

        let setup_intent = self.gateway.retrieve_setup_intent(&setup_intent_id).await?;
        if setup_intent.status != "succeeded" {
            warn!(status = %setup_intent.status, "Setup intent not successful");
            return Err(ServiceError::PaymentFailed(format!(
                "Card hold was not completed: {}",
                setup_intent.status
            )));
        }

        let rebuilt = order_from_metadata(&session.metadata)?;
        let total = items_total(&rebuilt.items);
        let now = Utc::now();

        let new_order = NewOrder {
            customer_id: rebuilt.customer_id,
            customer_name: rebuilt.customer_name,
            customer_email: rebuilt.customer_email,
            customer_phone: rebuilt.customer_phone,
            items: rebuilt.items,
            total_amount: total,
            currency: self.currency.clone(),
            pickup_date: rebuilt.pickup_date,
            pickup_time: rebuilt.pickup_time,
            payment_method: PaymentMethod::Onsite,
            payment_status: PaymentStatus::Pending,
            status: OrderStatus::Pending,
            requires_preauth: true,
            preauth_status: Some(PreAuthStatus::Authorized),
            preauth_amount: Some(rebuilt.preauth_amount.unwrap_or(total)),
            preauth_expires_at: Some(now + Duration::days(self.preauth_hold_days)),
            payment_reference: Some(setup_intent_id),
            special_code_id: None,
            notes: rebuilt.notes,
        };

        let outcome = self.orders.create_order(new_order).await?;
        if outcome.created {
            self.notifications.notify_after_creation(&outcome.order).await;
        }

        Ok(outcome.order)
    }
}

/// Order data reconstructed from session metadata.
struct RebuiltOrder {
    customer_id: Uuid,
    customer_name: String,
    customer_email: String,
    customer_phone: String,
    items: Vec<OrderItem>,
    pickup_date: NaiveDate,
    pickup_time: String,
    notes: Option<String>,
    preauth_amount: Option<Decimal>,
}

fn order_metadata(
    customer_id: Uuid,
    request: &PlaceOrderRequest,
    items: &[OrderItem],
    preauth_amount: Option<Decimal>,
) -> Result<HashMap<String, String>, ServiceError> {
    let mut metadata = HashMap::new();
    metadata.insert("customer_id".to_string(), customer_id.to_string());
    metadata.insert(
        "customer_name".to_string(),
        request.customer.full_name(),
    );
    metadata.insert(
        "customer_email".to_string(),
        request.customer.email.clone(),
    );
    metadata.insert(
        "customer_phone".to_string(),
        request.customer.phone.clone(),
    );
    metadata.insert(
        "pickup_date".to_string(),
        request.pickup_date.format("%Y-%m-%d").to_string(),
    );
    metadata.insert("pickup_time".to_string(), request.pickup_time.clone());
    metadata.insert(
        "items".to_string(),
        serde_json::to_string(items).map_err(ServiceError::from)?,
    );
    if let Some(notes) = &request.notes {
        metadata.insert("notes".to_string(), notes.clone());
    }
    if let Some(amount) = preauth_amount {
        metadata.insert("preauth_amount".to_string(), amount.to_string());
    }
    Ok(metadata)
}

fn order_from_metadata(metadata: &HashMap<String, String>) -> Result<RebuiltOrder, ServiceError> {
    fn required<'a>(
        metadata: &'a HashMap<String, String>,
        key: &str,
    ) -> Result<&'a String, ServiceError> {
        metadata.get(key).ok_or_else(|| {
            ServiceError::InternalError(format!("Session metadata is missing '{}'", key))
        })
    }

    let customer_id = Uuid::parse_str(required(metadata, "customer_id")?)
        .map_err(|_| ServiceError::InternalError("Session metadata has a bad customer id".into()))?;
    let pickup_date = NaiveDate::parse_from_str(required(metadata, "pickup_date")?, "%Y-%m-%d")
        .map_err(|_| ServiceError::InternalError("Session metadata has a bad pickup date".into()))?;
    let items: Vec<OrderItem> = serde_json::from_str(required(metadata, "items")?)
        .map_err(|e| ServiceError::InternalError(format!("Session metadata items invalid: {}", e)))?;

    if items.is_empty() {
        return Err(ServiceError::InternalError(
            "Session metadata carries no items".to_string(),
        ));
    }

    let preauth_amount = metadata
        .get("preauth_amount")
        .map(|raw| {
            raw.parse::<Decimal>().map_err(|_| {
                ServiceError::InternalError("Session metadata has a bad hold amount".into())
            })
        })
        .transpose()?;

    Ok(RebuiltOrder {
        customer_id,
        customer_name: required(metadata, "customer_name")?.clone(),
        customer_email: required(metadata, "customer_email")?.clone(),
        customer_phone: required(metadata, "customer_phone")?.clone(),
        items,
        pickup_date,
        pickup_time: required(metadata, "pickup_time")?.clone(),
        notes: metadata.get("notes").cloned(),
        preauth_amount,
    })
}
