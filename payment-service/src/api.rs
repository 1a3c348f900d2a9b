use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use crate::error::PaymentError;
use crate::models::Payment;
use crate::reconcile::{FailureReason, Outcome, Reconciliation};
use crate::service::{InitializePayment, PaymentService};

/// Identity of the caller as established by the upstream auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PaymentService>,
}

#[derive(Debug, Deserialize)]
pub struct InitializePaymentRequest {
    pub amount: Option<Value>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub booking_reference: Option<String>,
    pub currency: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub tx_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub payment: Payment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router(state: AppState) -> Router {
    let payments = Router::new()
        .route("/payments/initialize", post(initialize_payment))
        .route("/payments/verify", get(verify_payment_by_query))
        .route("/payments/verify/:tx_ref", get(verify_payment))
        .route("/payments/webhook", post(payment_webhook));

    Router::new()
        .merge(payments.clone())
        .nest("/api", payments)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn error_response(err: PaymentError) -> ApiError {
    let status = err.status_code();
    let detail = match &err {
        PaymentError::Validation(message) => message.clone(),
        PaymentError::NotFound(_) => "Payment not found".to_string(),
        PaymentError::Gateway(crate::error::GatewayError::Rejected { .. }) => {
            "Payment gateway rejected the request".to_string()
        }
        PaymentError::Gateway(_) => "Failed to reach payment gateway".to_string(),
        PaymentError::Configuration => "Payment gateway not configured".to_string(),
        PaymentError::Consistency { .. } => "Payment state conflict".to_string(),
        PaymentError::Ledger(_) => "Internal error".to_string(),
    };
    let error = match &err {
        PaymentError::Validation(_) | PaymentError::Ledger(_) => None,
        other => Some(other.to_string()),
    };

    (
        status,
        Json(ErrorResponse {
            detail,
            error,
            raw: err.raw_payload().cloned(),
        }),
    )
}

fn user_id(headers: &HeaderMap) -> Result<Option<Uuid>, PaymentError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(Some)
        .ok_or_else(|| PaymentError::Validation(format!("{} must be a UUID", USER_ID_HEADER)))
}

pub async fn initialize_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitializePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let user_id = user_id(&headers).map_err(error_response)?;

    let initialized = state
        .service
        .initialize(InitializePayment {
            amount: request.amount,
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            booking_reference: request.booking_reference,
            currency: request.currency,
            callback_url: request.callback_url,
            user_id,
        })
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse {
            detail: "Payment initialized successfully".to_string(),
            checkout_url: Some(initialized.checkout_url),
            payment: initialized.payment,
            raw: None,
        }),
    ))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(tx_ref): Path<String>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    verify(&state, &tx_ref).await
}

pub async fn verify_payment_by_query(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    verify(&state, query.tx_ref.as_deref().unwrap_or_default()).await
}

async fn verify(
    state: &AppState,
    tx_ref: &str,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let reconciliation = state.service.verify(tx_ref).await.map_err(error_response)?;
    Ok(verification_response(reconciliation))
}

fn verification_response(reconciliation: Reconciliation) -> (StatusCode, Json<PaymentResponse>) {
    let Reconciliation { payment, outcome, .. } = reconciliation;

    let (status, detail) = match outcome {
        Outcome::AlreadySuccessful => (StatusCode::OK, "Payment already successful"),
        Outcome::Successful => (StatusCode::OK, "Payment verified and marked successful"),
        Outcome::Failed(FailureReason::ReferenceMismatch) => (
            StatusCode::BAD_REQUEST,
            "Transaction reference mismatch. Marked failed.",
        ),
        Outcome::Failed(_) => (
            StatusCode::BAD_REQUEST,
            "Payment verification returned non-success state",
        ),
    };
    let raw = match outcome {
        Outcome::Failed(_) => payment.metadata.clone(),
        _ => None,
    };

    (
        status,
        Json(PaymentResponse {
            detail: detail.to_string(),
            checkout_url: None,
            payment,
            raw,
        }),
    )
}

/// Always answers 200 once the gateway was consulted, whatever the verdict.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let reconciliation = state
        .service
        .handle_webhook(&payload)
        .await
        .map_err(error_response)?;

    let detail = if reconciliation.payment.is_successful() {
        "Updated to successful"
    } else {
        "Updated to failed"
    };
    Ok(Json(WebhookResponse { detail: detail.to_string() }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
