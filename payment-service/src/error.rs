use axum::http::StatusCode;
use diesel_async::pooled_connection::PoolError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),
    #[error("payment gateway rejected the request: {message}")]
    Rejected {
        message: String,
        raw: serde_json::Value,
    },
    #[error("invalid response from payment gateway: {0}")]
    InvalidResponse(String),
    #[error("payment gateway secret key is not configured")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("booking reference {0} already exists")]
    DuplicateReference(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("corrupt payment row {reference}: {reason}")]
    Corrupt { reference: String, reason: String },
}

impl From<bb8::RunError<PoolError>> for LedgerError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        LedgerError::Pool(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("payment {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Gateway(GatewayError),
    #[error("payment gateway not configured")]
    Configuration,
    #[error("inconsistent payment state for {reference}: {reason}")]
    Consistency { reference: String, reason: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured => PaymentError::Configuration,
            other => PaymentError::Gateway(other),
        }
    }
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::Gateway(GatewayError::Rejected { .. }) => StatusCode::BAD_REQUEST,
            PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentError::Consistency { .. } => StatusCode::CONFLICT,
            PaymentError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Raw gateway payload worth echoing back to the caller, if any.
    pub fn raw_payload(&self) -> Option<&serde_json::Value> {
        match self {
            PaymentError::Gateway(GatewayError::Rejected { raw, .. }) => Some(raw),
            _ => None,
        }
    }
}
