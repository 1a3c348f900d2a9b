use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use std::collections::HashMap;
use tokio::sync::RwLock;
use crate::error::LedgerError;
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

/// Persistence boundary for payments.
///
/// Status changes only go through [`PaymentLedger::compare_and_update`], which
/// writes the mutable columns in a single statement and only if the stored
/// status still matches what the caller read. Two reconciliations racing on
/// one reference therefore cannot both win.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<(), LedgerError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, LedgerError>;

    /// Returns `false` when the stored status is no longer `expected` (or the
    /// row is gone); nothing is written in that case.
    async fn compare_and_update(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<bool, LedgerError>;
}

pub struct PgPaymentLedger {
    pool: DbPool,
}

impl PgPaymentLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLedger for PgPaymentLedger {
    async fn insert(&self, payment: &Payment) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(payments::table)
            .values(&DbPayment::from(payment))
            .execute(&mut conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    LedgerError::DuplicateReference(payment.booking_reference.clone())
                }
                other => LedgerError::Query(other),
            })?;

        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, LedgerError> {
        let mut conn = self.pool.get().await?;

        let row = payments::table
            .filter(payments::booking_reference.eq(reference))
            .first::<DbPayment>(&mut conn)
            .await
            .optional()?;

        row.map(Payment::try_from).transpose()
    }

    async fn compare_and_update(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.get().await?;

        let updated_rows = diesel::update(
            payments::table
                .filter(payments::booking_reference.eq(&payment.booking_reference))
                .filter(payments::status.eq(expected.as_str())),
        )
        .set(&PaymentChanges::from(payment))
        .execute(&mut conn)
        .await?;

        Ok(updated_rows == 1)
    }
}

/// Process-local ledger keyed by booking reference. Same compare-and-swap
/// semantics as the Postgres ledger; used by tests and local runs.
#[derive(Default)]
pub struct InMemoryPaymentLedger {
    payments: RwLock<HashMap<String, Payment>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert(&self, payment: &Payment) -> Result<(), LedgerError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.booking_reference) {
            return Err(LedgerError::DuplicateReference(payment.booking_reference.clone()));
        }
        payments.insert(payment.booking_reference.clone(), payment.clone());
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>, LedgerError> {
        Ok(self.payments.read().await.get(reference).cloned())
    }

    async fn compare_and_update(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> Result<bool, LedgerError> {
        let mut payments = self.payments.write().await;
        let Some(stored) = payments.get_mut(&payment.booking_reference) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }

        let changes = PaymentChanges::from(payment);
        stored.status = payment.status;
        if changes.transaction_id.is_some() {
            stored.transaction_id = changes.transaction_id;
        }
        if changes.checkout_url.is_some() {
            stored.checkout_url = changes.checkout_url;
        }
        if changes.metadata.is_some() {
            stored.metadata = changes.metadata;
        }
        stored.updated_at = changes.updated_at;
        Ok(true)
    }
}
