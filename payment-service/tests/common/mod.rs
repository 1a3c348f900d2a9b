#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use payment_service::api::{create_router, AppState};
use payment_service::error::{GatewayError, LedgerError};
use payment_service::gateway::{InitializeRequest, InitializedTransaction, PaymentGateway, VerifyResult};
use payment_service::ledger::{InMemoryPaymentLedger, PaymentLedger};
use payment_service::models::{Payment, PaymentStatus};
use payment_service::notifier::Notifier;
use payment_service::service::{PaymentService, ServiceSettings};
use serde_json::{json, Value};
use shared::PaymentConfirmationRequested;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const CHECKOUT_URL: &str = "https://checkout.chapa.co/checkout/payment/test-session";

/// Gateway double whose answers are scripted per test.
pub struct FakeGateway {
    configured: bool,
    delay: Duration,
    initialize_result: Mutex<Result<Value, GatewayError>>,
    verify_result: Mutex<Result<Value, GatewayError>>,
    last_initialize: Mutex<Option<InitializeRequest>>,
    initialize_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            configured: true,
            delay: Duration::ZERO,
            initialize_result: Mutex::new(Ok(json!({
                "status": "success",
                "message": "Hosted Link",
                "data": {"checkout_url": CHECKOUT_URL}
            }))),
            verify_result: Mutex::new(Err(GatewayError::Unreachable("verify not scripted".into()))),
            last_initialize: Mutex::new(None),
            initialize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn initialize_returns(&self, result: Result<Value, GatewayError>) {
        *self.initialize_result.lock().unwrap() = result;
    }

    pub fn verify_returns(&self, raw: Value) {
        *self.verify_result.lock().unwrap() = Ok(raw);
    }

    pub fn verify_fails(&self, err: GatewayError) {
        *self.verify_result.lock().unwrap() = Err(err);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn last_initialize(&self) -> Option<InitializeRequest> {
        self.last_initialize.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.configured {
            Ok(())
        } else {
            Err(GatewayError::NotConfigured)
        }
    }

    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedTransaction, GatewayError> {
        self.ensure_configured()?;
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_initialize.lock().unwrap() = Some(request.clone());

        let raw = self.initialize_result.lock().unwrap().clone()?;
        if raw["status"] != "success" {
            return Err(GatewayError::Rejected {
                message: raw["message"].as_str().unwrap_or("failed").to_string(),
                raw,
            });
        }
        let checkout_url = raw["data"]["checkout_url"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse("missing data.checkout_url".to_string()))?
            .to_string();
        Ok(InitializedTransaction { checkout_url, raw })
    }

    async fn verify(&self, _reference: &str) -> Result<VerifyResult, GatewayError> {
        self.ensure_configured()?;
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let raw = self.verify_result.lock().unwrap().clone()?;
        VerifyResult::from_value(raw)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<PaymentConfirmationRequested>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<PaymentConfirmationRequested> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: PaymentConfirmationRequested) {
        self.events.lock().unwrap().push(event);
    }
}

/// Ledger whose database is down.
pub struct UnavailableLedger;

#[async_trait]
impl PaymentLedger for UnavailableLedger {
    async fn insert(&self, _payment: &Payment) -> Result<(), LedgerError> {
        Err(LedgerError::Pool("connection refused".to_string()))
    }

    async fn find_by_reference(&self, _reference: &str) -> Result<Option<Payment>, LedgerError> {
        Err(LedgerError::Pool("connection refused".to_string()))
    }

    async fn compare_and_update(&self, _payment: &Payment, _expected: PaymentStatus) -> Result<bool, LedgerError> {
        Err(LedgerError::Pool("connection refused".to_string()))
    }
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        default_currency: "NGN".to_string(),
        public_base_url: "http://travel.test".to_string(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub service: Arc<PaymentService>,
    pub ledger: Arc<InMemoryPaymentLedger>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_gateway(FakeGateway::new())
    }

    pub fn with_gateway(gateway: FakeGateway) -> Self {
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let gateway = Arc::new(gateway);
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(PaymentService::new(
            ledger.clone(),
            gateway.clone(),
            notifier.clone(),
            settings(),
        ));
        let router = create_router(AppState { service: service.clone() });

        Self { router, service, ledger, gateway, notifier }
    }

    pub async fn seed(&self, reference: &str, amount: &str, status: PaymentStatus) -> Payment {
        let mut payment = Payment::pending(
            reference.to_string(),
            BigDecimal::from_str(amount).unwrap(),
            "NGN".to_string(),
            "guest@example.com".to_string(),
            None,
        );
        payment.status = status;
        self.ledger.insert(&payment).await.unwrap();
        payment
    }

    pub async fn payment(&self, reference: &str) -> Option<Payment> {
        self.ledger.find_by_reference(reference).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }
}

/// A verify response in the shape the gateway sends for a paid transaction.
pub fn paid(reference: &str, amount: &str) -> Value {
    json!({
        "message": "Payment details",
        "status": "success",
        "data": {
            "first_name": "Guest",
            "last_name": "User",
            "email": "guest@example.com",
            "currency": "NGN",
            "amount": amount,
            "charge": "3.50",
            "mode": "test",
            "method": "test",
            "type": "API",
            "status": "success",
            "reference": "APfxrq1Lhbfx",
            "tx_ref": reference,
            "created_at": "2024-06-01T10:00:00.000000Z",
            "updated_at": "2024-06-01T10:00:05.000000Z"
        }
    })
}

pub fn unpaid(reference: &str) -> Value {
    json!({
        "message": "Payment not paid yet",
        "status": "failed",
        "data": {"status": "pending", "tx_ref": reference}
    })
}
