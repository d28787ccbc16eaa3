use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderConfirmed(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Pre-authorization events
    PreAuthAuthorized {
        order_id: Uuid,
        amount: Decimal,
        expires_at: DateTime<Utc>,
    },
    PreAuthCaptured {
        order_id: Uuid,
        amount: Decimal,
    },
    PreAuthReleased(Uuid),
    PreAuthExpired(Uuid),

    // Notification events
    ReceiptPrintDegraded {
        order_id: Uuid,
        severity: String,
        printed: u32,
        requested: u32,
    },
    ReminderScheduled {
        order_id: Uuid,
        remind_at: DateTime<Utc>,
    },
    ReminderSent(Uuid),
    ReminderFailed(Uuid),

    // Special code events
    SpecialCodeConsumed {
        code_id: Uuid,
        order_id: Uuid,
    },
}

/// Background task that drains the event channel. Events are currently only
/// logged; the channel is the seam where a queue or webhook fan-out plugs in.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::ReceiptPrintDegraded {
                order_id,
                severity,
                printed,
                requested,
            } => {
                warn!(
                    %order_id,
                    severity = %severity,
                    printed = printed,
                    requested = requested,
                    "Receipt printing degraded"
                );
            }
            other => {
                debug!(event = ?other, "Event processed");
            }
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender.send(Event::OrderCreated(id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(got)) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_once_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::PreAuthReleased(Uuid::new_v4())).await.is_err());
    }
}
