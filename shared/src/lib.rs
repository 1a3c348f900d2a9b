use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub const PAYMENT_NOTIFICATION_TOPIC: &str = "payment-notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentConfirmation,
}

/// Published once per payment that reaches `successful` for the first time.
/// The mail worker consuming the topic owns rendering and delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmationRequested {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub payment_id: Uuid,
    pub booking_reference: String,
    pub requested_at: DateTime<Utc>,
}

impl PaymentConfirmationRequested {
    pub fn new(payment_id: Uuid, booking_reference: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: NotificationKind::PaymentConfirmation,
            payment_id,
            booking_reference: booking_reference.into(),
            requested_at: Utc::now(),
        }
    }

    pub fn message_key(&self) -> String {
        self.payment_id.to_string()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
