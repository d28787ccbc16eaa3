use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// A hosted payment session on the external gateway. In charge mode the
/// session collects a payment; in setup mode it collects card details for a
/// later hold capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub setup_intent: Option<String>,
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySetupIntent {
    pub id: String,
    pub status: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCharge {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
}

/// Parameters for creating a hosted session. `metadata` carries the
/// order-reconstruction payload: until confirmation, the session *is* the
/// pending order.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

/// External payment gateway seam. The HTTP implementation talks to a
/// Stripe-style API; tests plug in a scripted mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Hosted session that charges the full amount immediately.
    async fn create_charge_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    /// Hosted session that collects card details without charging.
    async fn create_setup_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError>;

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<GatewaySetupIntent, ServiceError>;

    /// Charge some or all of a held amount (no-show fee path).
    async fn capture_hold(
        &self,
        setup_intent_id: &str,
        amount_minor: i64,
        currency: &str,
        description: &str,
    ) -> Result<GatewayCharge, ServiceError>;

    /// Cancel a hold without charging.
    async fn release_hold(&self, setup_intent_id: &str) -> Result<(), ServiceError>;
}

/// Convert a decimal amount in major units to gateway minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let minor = (amount * Decimal::from(100)).round();
    minor
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("Amount out of range: {}", amount)))
}

/// Stripe-backed implementation of [`PaymentGateway`].
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
    success_url: String,
    cancel_url: String,
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        api_base: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            api_base,
            success_url,
            cancel_url,
        }
    }

    fn session_params(&self, mode: &str, request: &SessionRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), mode.to_string()),
            (
                "success_url".to_string(),
                format!("{}?session_id={{CHECKOUT_SESSION_ID}}", self.success_url),
            ),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            (
                "customer_email".to_string(),
                request.customer_email.clone(),
            ),
        ];

        if mode == "payment" {
            params.push((
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ));
            params.push((
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount_minor.to_string(),
            ));
            params.push((
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ));
            params.push(("line_items[0][quantity]".to_string(), "1".to_string()));
        }

        for (key, value) in &request.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        params
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, Some(""))
            .form(params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Gateway error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Gateway API error: {}", error_text);
            return Err(ServiceError::PaymentFailed(format!(
                "Gateway error: {}",
                error_text
            )));
        }

        response.json().await.map_err(|e| {
            ServiceError::SerializationError(format!("Failed to parse gateway response: {}", e))
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Gateway error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::NotFound(format!(
                "Gateway object not found: {}",
                error_text
            )));
        }

        response.json().await.map_err(|e| {
            ServiceError::SerializationError(format!("Failed to parse gateway response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request))]
    async fn create_charge_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let params = self.session_params("payment", &request);
        let session: GatewaySession = self.post_form("/checkout/sessions", &params).await?;
        info!(session_id = %session.id, "Charge session created");
        Ok(session)
    }

    #[instrument(skip(self, request))]
    async fn create_setup_session(
        &self,
        request: SessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let params = self.session_params("setup", &request);
        let session: GatewaySession = self.post_form("/checkout/sessions", &params).await?;
        info!(session_id = %session.id, "Setup session created");
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        self.get_json(&format!("/checkout/sessions/{}", session_id))
            .await
    }

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<GatewaySetupIntent, ServiceError> {
        self.get_json(&format!("/setup_intents/{}", setup_intent_id))
            .await
    }

    #[instrument(skip(self))]
    async fn capture_hold(
        &self,
        setup_intent_id: &str,
        amount_minor: i64,
        currency: &str,
        description: &str,
    ) -> Result<GatewayCharge, ServiceError> {
        let setup_intent = self.retrieve_setup_intent(setup_intent_id).await?;
        let payment_method = setup_intent.payment_method.ok_or_else(|| {
            ServiceError::PaymentFailed("Hold has no saved payment method".to_string())
        })?;

        let params = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("payment_method".to_string(), payment_method),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
            ("description".to_string(), description.to_string()),
            (
                "metadata[setup_intent]".to_string(),
                setup_intent_id.to_string(),
            ),
        ];

        let charge: GatewayCharge = self.post_form("/payment_intents", &params).await?;
        if charge.status != "succeeded" {
            return Err(ServiceError::PaymentFailed(format!(
                "Capture did not succeed: {}",
                charge.status
            )));
        }

        info!(charge_id = %charge.id, "Hold captured");
        Ok(charge)
    }

    #[instrument(skip(self))]
    async fn release_hold(&self, setup_intent_id: &str) -> Result<(), ServiceError> {
        let _: serde_json::Value = self
            .post_form(&format!("/setup_intents/{}/cancel", setup_intent_id), &[])
            .await?;
        info!(setup_intent_id = %setup_intent_id, "Hold released");
        Ok(())
    }
}
