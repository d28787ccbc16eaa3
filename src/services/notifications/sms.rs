use crate::{
    entities::scheduled_reminder::Model as ReminderModel, errors::ServiceError,
    services::orders::OrderResponse,
};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Hard limit of a single SMS segment.
pub const SMS_MAX_LEN: usize = 160;

/// Outbound SMS seam.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), ServiceError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// SMS over a provider HTTP API (account-sid + token basic auth, form body).
#[derive(Clone)]
pub struct HttpSmsSender {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl HttpSmsSender {
    pub fn new(api_base: String, account_sid: String, auth_token: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            account_sid,
            auth_token,
            from,
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    #[instrument(skip(self, body), fields(to = %to))]
    async fn send(&self, to: &str, body: &str) -> Result<(), ServiceError> {
        let url = format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid);
        let params = [
            ("From", self.from.as_str()),
            ("To", to),
            ("Body", body),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::NotificationError(format!("SMS API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "SMS API rejected message: {}", body);
            return Err(ServiceError::NotificationError(format!(
                "SMS API returned {}",
                status
            )));
        }

        debug!("SMS accepted by provider");
        Ok(())
    }
}

/// Stand-in when no SMS provider is configured; sends nothing.
pub struct NoopSmsSender;

#[async_trait]
impl SmsSender for NoopSmsSender {
    async fn send(&self, to: &str, _body: &str) -> Result<(), ServiceError> {
        debug!(to = %to, "SMS channel not configured; dropping message");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Fit an alert into one SMS segment. If the formatted message is too long,
/// fall back to the raw error, truncated.
pub fn truncate_for_sms(formatted: &str, raw_error: &str) -> String {
    if formatted.chars().count() <= SMS_MAX_LEN {
        return formatted.to_string();
    }
    raw_error.chars().take(SMS_MAX_LEN).collect()
}

/// New-order alert for the shop phone.
pub fn order_sms(order: &OrderResponse) -> String {
    format!(
        "Nouvelle commande {} - {} - retrait {} {} - {} {}",
        order.order_number,
        order.customer_name,
        order.pickup_date.format("%d/%m"),
        order.pickup_time,
        order.total_amount,
        order.currency,
    )
}

/// Pickup reminder for the customer.
pub fn reminder_sms(reminder: &ReminderModel) -> String {
    format!(
        "Bonjour {}, votre commande vous attend demain ({}) a {} a la patisserie. A bientot !",
        reminder.customer_name,
        reminder.pickup_date.format("%d/%m"),
        reminder.pickup_time,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(truncate_for_sms("short alert", "raw"), "short alert");
    }

    #[test]
    fn long_messages_fall_back_to_raw_error() {
        let formatted = "x".repeat(SMS_MAX_LEN + 1);
        let raw = "printer exploded";
        assert_eq!(truncate_for_sms(&formatted, raw), "printer exploded");
    }

    #[test]
    fn long_raw_errors_are_truncated_to_one_segment() {
        let formatted = "y".repeat(200);
        let raw = "z".repeat(400);
        let result = truncate_for_sms(&formatted, &raw);
        assert_eq!(result.chars().count(), SMS_MAX_LEN);
    }
}
