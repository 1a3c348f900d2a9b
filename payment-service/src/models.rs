use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use bigdecimal::BigDecimal;
use std::fmt;
use std::str::FromStr;
use crate::error::{LedgerError, PaymentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    /// `successful` is terminal; nothing moves back to `pending`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        !matches!(
            (self, next),
            (PaymentStatus::Successful, PaymentStatus::Failed)
                | (PaymentStatus::Successful, PaymentStatus::Pending)
                | (PaymentStatus::Failed, PaymentStatus::Pending)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "successful" => Ok(PaymentStatus::Successful),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub email: String,
    pub metadata: Option<serde_json::Value>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(
        booking_reference: String,
        amount: BigDecimal,
        currency: String,
        email: String,
        user_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_reference,
            amount,
            currency,
            status: PaymentStatus::Pending,
            transaction_id: None,
            checkout_url: None,
            email,
            metadata: None,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == PaymentStatus::Successful
    }

    pub fn transition_to(&mut self, next: PaymentStatus) -> Result<(), PaymentError> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::Consistency {
                reference: self.booking_reference.clone(),
                reason: format!("illegal transition {} -> {}", self.status, next),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct DbPayment {
    pub id: Uuid,
    pub booking_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub email: String,
    pub metadata: Option<serde_json::Value>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable columns only. `None` leaves the stored value in place.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentChanges {
    pub status: String,
    pub transaction_id: Option<String>,
    pub checkout_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for DbPayment {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            booking_reference: payment.booking_reference.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.clone(),
            status: payment.status.as_str().to_string(),
            transaction_id: payment.transaction_id.clone(),
            checkout_url: payment.checkout_url.clone(),
            email: payment.email.clone(),
            metadata: payment.metadata.clone(),
            user_id: payment.user_id,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

impl From<&Payment> for PaymentChanges {
    fn from(payment: &Payment) -> Self {
        Self {
            status: payment.status.as_str().to_string(),
            transaction_id: payment.transaction_id.clone(),
            checkout_url: payment.checkout_url.clone(),
            metadata: payment.metadata.clone(),
            updated_at: payment.updated_at,
        }
    }
}

impl TryFrom<DbPayment> for Payment {
    type Error = LedgerError;

    fn try_from(row: DbPayment) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|reason| LedgerError::Corrupt {
            reference: row.booking_reference.clone(),
            reason,
        })?;

        Ok(Self {
            id: row.id,
            booking_reference: row.booking_reference,
            amount: row.amount,
            currency: row.currency,
            status,
            transaction_id: row.transaction_id,
            checkout_url: row.checkout_url,
            email: row.email,
            metadata: row.metadata,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
