//! Reconciliation of a local payment against the gateway's view of it.
//!
//! [`reconcile`] is pure: it takes the stored payment and a verification
//! result and returns the payment as it should be persisted, together with the
//! side effects to run once that write has landed. Persisting and dispatching
//! are the caller's job (see `service.rs`).

use bigdecimal::BigDecimal;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;
use crate::error::PaymentError;
use crate::gateway::VerifyResult;
use crate::models::{Payment, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ReferenceMismatch,
    AmountMismatch,
    NotSuccessful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadySuccessful,
    Successful,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    SendConfirmation {
        payment_id: Uuid,
        booking_reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub payment: Payment,
    pub outcome: Outcome,
    pub side_effects: Vec<SideEffect>,
}

impl Reconciliation {
    pub fn unchanged(payment: Payment) -> Self {
        Self {
            payment,
            outcome: Outcome::AlreadySuccessful,
            side_effects: Vec::new(),
        }
    }

    /// Whether `payment` differs from what the ledger holds and must be written.
    pub fn needs_write(&self) -> bool {
        self.outcome != Outcome::AlreadySuccessful
    }
}

type SuccessSignal = fn(&VerifyResult) -> bool;

/// The gateway reports success inconsistently between its verify endpoint and
/// its webhook payloads. Any one of these is enough.
const SUCCESS_SIGNALS: &[SuccessSignal] = &[
    top_level_status_is_success,
    data_status_is_success,
    message_mentions_success,
];

fn top_level_status_is_success(result: &VerifyResult) -> bool {
    result
        .status
        .as_deref()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("success"))
}

fn data_status_is_success(result: &VerifyResult) -> bool {
    result.data.status.as_deref().is_some_and(|s| {
        let s = s.trim();
        s.eq_ignore_ascii_case("success") || s.eq_ignore_ascii_case("completed")
    })
}

fn message_mentions_success(result: &VerifyResult) -> bool {
    result
        .message
        .as_deref()
        .is_some_and(|m| m.to_lowercase().contains("success"))
}

pub fn classify_success(result: &VerifyResult) -> bool {
    SUCCESS_SIGNALS.iter().any(|signal| signal(result))
}

fn normalize_reference(reference: &str) -> String {
    reference.trim().to_lowercase()
}

fn reference_matches(payment: &Payment, result: &VerifyResult) -> bool {
    result
        .gateway_reference()
        .is_some_and(|r| normalize_reference(r) == normalize_reference(&payment.booking_reference))
}

/// An absent amount confirms nothing and contradicts nothing.
fn amount_confirmed(payment: &Payment, result: &VerifyResult) -> bool {
    let Some(reported) = result.amount() else {
        return true;
    };

    match BigDecimal::from_str(reported.trim()) {
        Ok(amount) if amount == payment.amount => true,
        Ok(amount) => {
            warn!(
                "Amount mismatch for {}: local={} gateway={}",
                payment.booking_reference, payment.amount, amount
            );
            false
        }
        Err(e) => {
            warn!(
                "Could not parse gateway amount '{}' for {}: {}",
                reported, payment.booking_reference, e
            );
            false
        }
    }
}

/// Folds gateway-provided fields into the payment. Metadata always tracks the
/// last response; the transaction id is only replaced by a present value.
fn merge_gateway_fields(payment: &mut Payment, result: &VerifyResult, take_transaction_id: bool) {
    payment.metadata = Some(result.raw.clone());
    if take_transaction_id {
        if let Some(transaction_id) = result.transaction_id() {
            payment.transaction_id = Some(transaction_id.to_string());
        }
    }
}

pub fn reconcile(payment: &Payment, result: &VerifyResult) -> Result<Reconciliation, PaymentError> {
    if payment.is_successful() {
        return Ok(Reconciliation::unchanged(payment.clone()));
    }

    let mut next = payment.clone();

    if !reference_matches(payment, result) {
        warn!(
            "Reference mismatch: local={} gateway={:?}",
            payment.booking_reference,
            result.gateway_reference()
        );
        next.transition_to(PaymentStatus::Failed)?;
        merge_gateway_fields(&mut next, result, false);
        return Ok(Reconciliation {
            payment: next,
            outcome: Outcome::Failed(FailureReason::ReferenceMismatch),
            side_effects: Vec::new(),
        });
    }

    let amount_ok = amount_confirmed(payment, result);
    let success = classify_success(result);

    if success && amount_ok {
        next.transition_to(PaymentStatus::Successful)?;
        merge_gateway_fields(&mut next, result, true);
        let side_effects = vec![SideEffect::SendConfirmation {
            payment_id: next.id,
            booking_reference: next.booking_reference.clone(),
        }];
        return Ok(Reconciliation {
            payment: next,
            outcome: Outcome::Successful,
            side_effects,
        });
    }

    let reason = if success {
        FailureReason::AmountMismatch
    } else {
        FailureReason::NotSuccessful
    };
    next.transition_to(PaymentStatus::Failed)?;
    merge_gateway_fields(&mut next, result, true);

    Ok(Reconciliation {
        payment: next,
        outcome: Outcome::Failed(reason),
        side_effects: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn payment(reference: &str, amount: &str) -> Payment {
        Payment::pending(
            reference.to_string(),
            BigDecimal::from_str(amount).unwrap(),
            "NGN".to_string(),
            "guest@example.com".to_string(),
            None,
        )
    }

    fn verified(raw: Value) -> VerifyResult {
        VerifyResult::from_value(raw).unwrap()
    }

    fn success_for(reference: &str, amount: &str) -> VerifyResult {
        verified(json!({
            "status": "success",
            "message": "Payment details",
            "data": {
                "status": "success",
                "tx_ref": reference,
                "reference": "CHK-123",
                "amount": amount
            }
        }))
    }

    #[test]
    fn matching_success_marks_successful_and_notifies_once() {
        let payment = payment("BOOK-1", "100.00");
        let result = success_for("BOOK-1", "100.00");

        let reconciliation = reconcile(&payment, &result).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::Successful);
        assert_eq!(reconciliation.payment.status, PaymentStatus::Successful);
        assert_eq!(reconciliation.payment.transaction_id.as_deref(), Some("CHK-123"));
        assert_eq!(reconciliation.payment.metadata.as_ref(), Some(&result.raw));
        assert_eq!(
            reconciliation.side_effects,
            vec![SideEffect::SendConfirmation {
                payment_id: payment.id,
                booking_reference: "BOOK-1".to_string(),
            }]
        );
    }

    #[test]
    fn already_successful_is_left_alone() {
        let mut paid = payment("BOOK-1", "100.00");
        paid.status = PaymentStatus::Successful;
        paid.transaction_id = Some("CHK-ORIGINAL".to_string());
        paid.metadata = Some(json!({"first": true}));

        let failing = verified(json!({"status": "failed", "data": {"tx_ref": "OTHER"}}));
        let reconciliation = reconcile(&paid, &failing).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::AlreadySuccessful);
        assert!(!reconciliation.needs_write());
        assert!(reconciliation.side_effects.is_empty());
        assert_eq!(reconciliation.payment, paid);
    }

    #[test]
    fn reference_mismatch_fails_even_when_everything_else_says_success() {
        let payment = payment("BOOK-1", "100.00");
        let result = success_for("BOOK-2", "100.00");

        let reconciliation = reconcile(&payment, &result).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::Failed(FailureReason::ReferenceMismatch));
        assert_eq!(reconciliation.payment.status, PaymentStatus::Failed);
        assert!(reconciliation.payment.transaction_id.is_none());
        assert_eq!(reconciliation.payment.metadata.as_ref(), Some(&result.raw));
        assert!(reconciliation.side_effects.is_empty());
    }

    #[test]
    fn missing_gateway_reference_is_a_mismatch() {
        let payment = payment("BOOK-1", "100.00");
        let result = verified(json!({"status": "success", "data": {"amount": "100.00"}}));

        let reconciliation = reconcile(&payment, &result).unwrap();
        assert_eq!(reconciliation.outcome, Outcome::Failed(FailureReason::ReferenceMismatch));
    }

    #[test]
    fn reference_comparison_ignores_case_and_whitespace() {
        let payment = payment("BOOK-abc", "100.00");
        let result = success_for("  book-ABC ", "100.00");

        let reconciliation = reconcile(&payment, &result).unwrap();
        assert_eq!(reconciliation.outcome, Outcome::Successful);
    }

    #[test]
    fn amount_mismatch_fails_despite_success_status() {
        let payment = payment("BOOK-1", "100.00");
        let result = success_for("BOOK-1", "99.99");

        let reconciliation = reconcile(&payment, &result).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::Failed(FailureReason::AmountMismatch));
        assert_eq!(reconciliation.payment.status, PaymentStatus::Failed);
        assert_eq!(reconciliation.payment.transaction_id.as_deref(), Some("CHK-123"));
        assert!(reconciliation.side_effects.is_empty());
    }

    #[test]
    fn amount_comparison_is_numeric_not_textual() {
        let payment = payment("BOOK-1", "100");
        let result = success_for("BOOK-1", "100.00");

        assert_eq!(reconcile(&payment, &result).unwrap().outcome, Outcome::Successful);
    }

    #[test]
    fn unparseable_amount_is_not_confirmed() {
        let payment = payment("BOOK-1", "100.00");
        let result = success_for("BOOK-1", "one hundred");

        let reconciliation = reconcile(&payment, &result).unwrap();
        assert_eq!(reconciliation.outcome, Outcome::Failed(FailureReason::AmountMismatch));
    }

    #[test]
    fn absent_amount_does_not_block_success() {
        let payment = payment("BOOK-1", "100.00");
        let result = verified(json!({"status": "success", "data": {"tx_ref": "BOOK-1"}}));

        let reconciliation = reconcile(&payment, &result).unwrap();
        assert_eq!(reconciliation.outcome, Outcome::Successful);
        assert_eq!(reconciliation.payment.transaction_id.as_deref(), Some("BOOK-1"));
    }

    #[test]
    fn each_success_signal_is_sufficient_on_its_own() {
        let by_status = verified(json!({"status": "SUCCESS", "data": {"tx_ref": "B"}}));
        let by_data_status = verified(json!({"status": "ok", "data": {"status": "Completed", "tx_ref": "B"}}));
        let by_message = verified(json!({"message": "Payment was Successfully processed", "data": {"tx_ref": "B"}}));
        let none = verified(json!({"status": "failed", "message": "Payment not paid yet", "data": {"status": "pending", "tx_ref": "B"}}));

        assert!(classify_success(&by_status));
        assert!(classify_success(&by_data_status));
        assert!(classify_success(&by_message));
        assert!(!classify_success(&none));
    }

    #[test]
    fn non_success_still_records_a_transaction_id() {
        let mut payment = payment("BOOK-1", "100.00");
        payment.transaction_id = Some("CHK-EARLIER".to_string());
        let result = verified(json!({
            "status": "failed",
            "message": "Payment not paid yet",
            "data": {"status": "pending", "tx_ref": "BOOK-1"}
        }));

        let reconciliation = reconcile(&payment, &result).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::Failed(FailureReason::NotSuccessful));
        assert_eq!(reconciliation.payment.transaction_id.as_deref(), Some("BOOK-1"));
    }

    #[test]
    fn late_success_after_failure_is_accepted() {
        let mut failed = payment("BOOK-1", "100.00");
        failed.status = PaymentStatus::Failed;

        let reconciliation = reconcile(&failed, &success_for("BOOK-1", "100.00")).unwrap();

        assert_eq!(reconciliation.outcome, Outcome::Successful);
        assert_eq!(reconciliation.side_effects.len(), 1);
    }
}
