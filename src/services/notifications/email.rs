use crate::{errors::ServiceError, services::orders::OrderResponse};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound email seam. The HTTP implementation posts to an email API;
/// tests record messages instead.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// Email over an HTTP API with bearer authentication.
#[derive(Clone)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        let payload = json!({
            "from": self.from,
            "to": [message.to],
            "subject": message.subject,
            "text": message.body,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::NotificationError(format!("Email API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Email API rejected message: {}", body);
            return Err(ServiceError::NotificationError(format!(
                "Email API returned {}",
                status
            )));
        }

        debug!("Email accepted by provider");
        Ok(())
    }
}

/// Stand-in when no email provider is configured; sends nothing.
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), ServiceError> {
        debug!(to = %message.to, subject = %message.subject, "Email channel not configured; dropping message");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

fn items_block(order: &OrderResponse) -> String {
    order
        .items
        .iter()
        .map(|item| {
            let size = item
                .size
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            format!(
                "  - {}x {}{} : {} {}",
                item.quantity,
                item.name,
                size,
                item.subtotal(),
                order.currency
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Confirmation mail for the customer.
pub fn order_confirmation_email(order: &OrderResponse) -> EmailMessage {
    let payment_line = if order.payment_status == "paid" {
        "Votre commande est reglee en ligne.".to_string()
    } else {
        "Reglement sur place lors du retrait.".to_string()
    };

    let body = format!(
        "Bonjour {},\n\n\
         Nous avons bien recu votre commande {}.\n\n\
         Retrait le {} a {}.\n\n\
         Votre commande :\n{}\n\n\
         Total : {} {}\n{}\n\n\
         A tres bientot,\nLa patisserie",
        order.customer_name,
        order.order_number,
        order.pickup_date.format("%d/%m/%Y"),
        order.pickup_time,
        items_block(order),
        order.total_amount,
        order.currency,
        payment_line,
    );

    EmailMessage {
        to: order.customer_email.clone(),
        subject: format!("Confirmation de votre commande {}", order.order_number),
        body,
    }
}

/// Copy of the order for the shop inbox.
pub fn shop_copy_email(order: &OrderResponse, shop_email: &str) -> EmailMessage {
    let body = format!(
        "Nouvelle commande {}\n\n\
         Client : {} ({}, {})\n\
         Retrait : {} a {}\n\
         Paiement : {} ({})\n\n\
         Articles :\n{}\n\n\
         Total : {} {}",
        order.order_number,
        order.customer_name,
        order.customer_email,
        order.customer_phone,
        order.pickup_date.format("%d/%m/%Y"),
        order.pickup_time,
        order.payment_method,
        order.payment_status,
        items_block(order),
        order.total_amount,
        order.currency,
    );

    EmailMessage {
        to: shop_email.to_string(),
        subject: format!("Nouvelle commande {}", order.order_number),
        body,
    }
}

/// Staff alert when receipt printing degrades.
pub fn escalation_email(
    severity: &str,
    order_number: &str,
    errors: &[String],
    shop_email: &str,
) -> EmailMessage {
    let detail = if errors.is_empty() {
        "(no detail)".to_string()
    } else {
        errors.join("\n")
    };

    EmailMessage {
        to: shop_email.to_string(),
        subject: format!(
            "[{}] Impression du ticket en echec pour la commande {}",
            severity.to_uppercase(),
            order_number
        ),
        body: format!(
            "L'impression du ticket de la commande {} a echoue ({}).\n\n\
             Erreurs :\n{}\n\n\
             Pensez a imprimer le ticket manuellement.",
            order_number, severity, detail
        ),
    }
}
