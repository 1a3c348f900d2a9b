use bigdecimal::BigDecimal;
use chrono::Utc;
use num_traits::Zero;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use shared::PaymentConfirmationRequested;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::error::{GatewayError, LedgerError, PaymentError};
use crate::gateway::{Customization, InitializeRequest, PaymentGateway};
use crate::ledger::PaymentLedger;
use crate::models::{Payment, PaymentStatus};
use crate::notifier::Notifier;
use crate::reconcile::{reconcile, Reconciliation, SideEffect};

const MAX_RECONCILE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub default_currency: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct InitializePayment {
    pub amount: Option<Value>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub booking_reference: Option<String>,
    pub currency: Option<String>,
    pub callback_url: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct InitializedPayment {
    pub checkout_url: String,
    pub payment: Payment,
}

pub struct PaymentService {
    ledger: Arc<dyn PaymentLedger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    settings: ServiceSettings,
}

/// Accepts `"100.00"` or `100` and rejects anything that is not a positive
/// exact decimal.
pub fn parse_amount(value: &Value) -> Result<BigDecimal, PaymentError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(PaymentError::Validation("amount must be a decimal".to_string())),
    };
    let amount = BigDecimal::from_str(&text)
        .map_err(|_| PaymentError::Validation(format!("amount '{}' is not a valid decimal", text)))?;
    if amount <= BigDecimal::zero() {
        return Err(PaymentError::Validation("amount must be positive".to_string()));
    }
    Ok(amount)
}

pub fn generate_booking_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("BOOK-{}-{}", Utc::now().timestamp(), suffix)
}

/// Webhook bodies name the transaction `tx_ref` or `reference`, as a string
/// or a number.
pub fn webhook_reference(payload: &Value) -> Option<String> {
    ["tx_ref", "reference"]
        .iter()
        .filter_map(|field| match payload.get(field)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|r| !r.is_empty())
}

/// Client-chosen references travel in gateway URLs and callback paths, so
/// they are limited to `[A-Za-z0-9._-]`.
pub fn validate_booking_reference(reference: &str) -> Result<(), PaymentError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if reference.len() > 100 || !reference.chars().all(allowed) {
        return Err(PaymentError::Validation(format!(
            "booking_reference '{}' may only contain letters, digits, '.', '_' and '-'",
            reference
        )));
    }
    Ok(())
}

fn ledger_failure(reference: &str) -> impl FnOnce(LedgerError) -> PaymentError + '_ {
    move |e| {
        error!("Ledger failure on payment {}: {}", reference, e);
        PaymentError::Ledger(e)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        settings: ServiceSettings,
    ) -> Self {
        Self { ledger, gateway, notifier, settings }
    }

    pub async fn initialize(&self, request: InitializePayment) -> Result<InitializedPayment, PaymentError> {
        let (Some(amount), Some(email)) = (request.amount.as_ref(), non_blank(request.email)) else {
            return Err(PaymentError::Validation("amount and email are required".to_string()));
        };
        let amount = parse_amount(amount)?;
        let booking_reference = match non_blank(request.booking_reference) {
            Some(reference) => {
                validate_booking_reference(&reference)?;
                reference
            }
            None => generate_booking_reference(),
        };

        self.gateway.ensure_configured()?;

        let currency = non_blank(request.currency)
            .unwrap_or_else(|| self.settings.default_currency.clone())
            .to_uppercase();
        let callback_url = non_blank(request.callback_url).unwrap_or_else(|| {
            format!(
                "{}/api/payments/verify/{}",
                self.settings.public_base_url.trim_end_matches('/'),
                booking_reference
            )
        });

        // Recorded before the outbound call so a crash mid-call still leaves a trace.
        let mut payment = Payment::pending(
            booking_reference.clone(),
            amount.clone(),
            currency.clone(),
            email.clone(),
            request.user_id,
        );
        self.ledger.insert(&payment).await.map_err(|e| match e {
            LedgerError::DuplicateReference(reference) => {
                PaymentError::Validation(format!("booking_reference {} already exists", reference))
            }
            other => ledger_failure(&booking_reference)(other),
        })?;

        let gateway_request = InitializeRequest {
            amount: amount.to_string(),
            currency,
            email,
            first_name: request.first_name.unwrap_or_default(),
            last_name: request.last_name.unwrap_or_default(),
            tx_ref: booking_reference.clone(),
            callback_url,
            customization: Customization::default(),
        };

        match self.gateway.initialize(&gateway_request).await {
            Ok(transaction) => {
                payment.checkout_url = Some(transaction.checkout_url.clone());
                payment.metadata = Some(transaction.raw);
                payment.updated_at = Utc::now();
                let stored = self
                    .ledger
                    .compare_and_update(&payment, PaymentStatus::Pending)
                    .await
                    .map_err(ledger_failure(&booking_reference))?;
                if !stored {
                    warn!("Payment {} changed while initializing; checkout url not stored", booking_reference);
                }
                info!("Initialized payment {} for {} {}", booking_reference, payment.amount, payment.currency);
                Ok(InitializedPayment {
                    checkout_url: transaction.checkout_url,
                    payment,
                })
            }
            Err(e) => {
                match &e {
                    GatewayError::Rejected { raw, .. } => {
                        warn!("Gateway rejected initialization of {}: {}", booking_reference, raw);
                        payment.metadata = Some(raw.clone());
                    }
                    other => error!("Failed to initialize {} with gateway: {}", booking_reference, other),
                }
                payment.transition_to(PaymentStatus::Failed)?;
                let stored = self
                    .ledger
                    .compare_and_update(&payment, PaymentStatus::Pending)
                    .await
                    .map_err(ledger_failure(&booking_reference))?;
                if !stored {
                    warn!("Payment {} changed while initializing; not marked failed", booking_reference);
                }
                Err(e.into())
            }
        }
    }

    pub async fn verify(&self, reference: &str) -> Result<Reconciliation, PaymentError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PaymentError::Validation("tx_ref is required".to_string()));
        }

        let payment = self
            .ledger
            .find_by_reference(reference)
            .await
            .map_err(ledger_failure(reference))?
            .ok_or_else(|| PaymentError::NotFound(reference.to_string()))?;

        if payment.is_successful() {
            return Ok(Reconciliation::unchanged(payment));
        }

        self.gateway.ensure_configured()?;
        self.reconcile_with_gateway(payment).await
    }

    /// Webhook bodies are untrusted: only the reference is read from them and
    /// the outcome always comes from a fresh verify call.
    pub async fn handle_webhook(&self, payload: &Value) -> Result<Reconciliation, PaymentError> {
        let reference = webhook_reference(payload)
            .ok_or_else(|| PaymentError::Validation("tx_ref missing".to_string()))?;

        self.gateway.ensure_configured()?;

        let Some(payment) = self
            .ledger
            .find_by_reference(&reference)
            .await
            .map_err(ledger_failure(&reference))?
        else {
            warn!("Webhook received for unknown payment: {}", reference);
            return Err(PaymentError::NotFound(reference));
        };

        if payment.is_successful() {
            info!("Webhook: payment already marked successful: {}", reference);
            return Ok(Reconciliation::unchanged(payment));
        }

        self.reconcile_with_gateway(payment).await
    }

    async fn reconcile_with_gateway(&self, mut payment: Payment) -> Result<Reconciliation, PaymentError> {
        let reference = payment.booking_reference.clone();

        let result = self.gateway.verify(&reference).await.map_err(|e| {
            match &e {
                GatewayError::Rejected { raw, .. } => {
                    warn!("Gateway rejected verification of {}: {}", reference, raw)
                }
                other => error!("Failed to verify {} with gateway: {}", reference, other),
            }
            PaymentError::from(e)
        })?;
        info!("Gateway verify response for {}: {}", reference, result.raw);

        for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
            let reconciliation = reconcile(&payment, &result)?;
            if !reconciliation.needs_write() {
                return Ok(reconciliation);
            }

            let stored = self
                .ledger
                .compare_and_update(&reconciliation.payment, payment.status)
                .await
                .map_err(ledger_failure(&reference))?;
            if stored {
                info!(
                    "Payment {} reconciled: {} -> {} ({:?})",
                    reference, payment.status, reconciliation.payment.status, reconciliation.outcome
                );
                self.dispatch(&reconciliation.side_effects);
                return Ok(reconciliation);
            }

            warn!("Concurrent update on payment {}, reloading (attempt {})", reference, attempt);
            payment = self
                .ledger
                .find_by_reference(&reference)
                .await
                .map_err(ledger_failure(&reference))?
                .ok_or_else(|| PaymentError::NotFound(reference.clone()))?;
        }

        warn!("Gave up reconciling {} after {} attempts", reference, MAX_RECONCILE_ATTEMPTS);
        Err(PaymentError::Consistency {
            reference,
            reason: "payment kept changing during reconciliation".to_string(),
        })
    }

    fn dispatch(&self, side_effects: &[SideEffect]) {
        for effect in side_effects {
            match effect {
                SideEffect::SendConfirmation { payment_id, booking_reference } => {
                    self.notifier.notify(PaymentConfirmationRequested::new(
                        *payment_id,
                        booking_reference.as_str(),
                    ));
                }
            }
        }
    }
}
