use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};
use crate::error::GatewayError;

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize)]
pub struct Customization {
    pub title: String,
    pub description: String,
}

impl Default for Customization {
    fn default() -> Self {
        Self {
            title: "ALX Travel Payment".to_string(),
            description: "Payment for booking".to_string(),
        }
    }
}

/// Body of a transaction initialization call. Serialized as-is.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub amount: String,
    pub currency: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub tx_ref: String,
    pub callback_url: String,
    pub customization: Customization,
}

#[derive(Debug, Clone)]
pub struct InitializedTransaction {
    pub checkout_url: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyData {
    #[serde(default, deserialize_with = "lenient_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub tx_ref: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reference: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VerifyEnvelope {
    #[serde(default, deserialize_with = "lenient_text")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    message: Option<String>,
    #[serde(default)]
    data: Option<VerifyData>,
}

/// The gateway's view of one transaction, plus the untouched payload for audit.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub status: Option<String>,
    pub message: Option<String>,
    pub data: VerifyData,
    pub raw: Value,
}

impl VerifyResult {
    pub fn from_value(raw: Value) -> Result<Self, GatewayError> {
        if !raw.is_object() {
            return Err(GatewayError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                raw
            )));
        }
        let envelope = VerifyEnvelope::deserialize(&raw)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            status: envelope.status,
            message: envelope.message,
            data: envelope.data.unwrap_or_default(),
            raw,
        })
    }

    /// Reference the gateway filed the transaction under.
    pub fn gateway_reference(&self) -> Option<&str> {
        first_present([&self.data.tx_ref, &self.data.reference, &self.data.id])
    }

    /// Gateway-side identifier to store on the payment.
    pub fn transaction_id(&self) -> Option<&str> {
        first_present([&self.data.reference, &self.data.id, &self.data.tx_ref])
    }

    pub fn amount(&self) -> Option<&str> {
        self.data.amount.as_deref()
    }
}

fn first_present<const N: usize>(candidates: [&Option<String>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .filter_map(|c| c.as_deref())
        .find(|c| !c.trim().is_empty())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn initialize(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub base_url: String,
    pub secret_key: Option<String>,
    pub timeout: Duration,
}

pub struct ChapaClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
}

impl ChapaClient {
    pub fn new(config: ChapaConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let secret_key = config.secret_key.filter(|key| !key.trim().is_empty());

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    /// Joins `segments` onto the base URL, percent-encoding each one so a
    /// reference can never escape its path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let invalid = || GatewayError::Unreachable(format!("invalid gateway url {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn secret_key(&self) -> Result<&str, GatewayError> {
        self.secret_key.as_deref().ok_or(GatewayError::NotConfigured)
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        if status.is_server_error() {
            error!("Payment gateway answered {}: {}", status, body);
            return Err(GatewayError::Unreachable(format!("gateway returned {}", status)));
        }

        let raw: Value = serde_json::from_str(&body).map_err(|_| {
            error!("Invalid JSON from payment gateway ({}): {}", status, body);
            GatewayError::InvalidResponse(format!("unparseable body with status {}", status))
        })?;

        if status.is_client_error() {
            warn!("Payment gateway rejected request ({}): {}", status, raw);
            return Err(GatewayError::Rejected {
                message: message_of(&raw).unwrap_or_else(|| status.to_string()),
                raw,
            });
        }

        Ok(raw)
    }
}

fn message_of(raw: &Value) -> Option<String> {
    match raw.get("message")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn unreachable(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Unreachable(format!("request timed out: {}", err))
    } else {
        GatewayError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for ChapaClient {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        self.secret_key().map(|_| ())
    }

    async fn initialize(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction, GatewayError> {
        let secret_key = self.secret_key()?;
        let url = self.endpoint(&["transaction", "initialize"])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(secret_key)
            .json(request)
            .send()
            .await
            .map_err(unreachable)?;
        let raw = self.read_json(response).await?;

        let succeeded = raw
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("success"));
        if !succeeded {
            return Err(GatewayError::Rejected {
                message: message_of(&raw).unwrap_or_else(|| "initialization failed".to_string()),
                raw,
            });
        }

        let checkout_url = raw
            .pointer("/data/checkout_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("missing data.checkout_url".to_string()))?;

        Ok(InitializedTransaction { checkout_url, raw })
    }

    async fn verify(&self, reference: &str) -> Result<VerifyResult, GatewayError> {
        let secret_key = self.secret_key()?;
        let url = self.endpoint(&["transaction", "verify", reference])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(secret_key)
            .send()
            .await
            .map_err(unreachable)?;
        let raw = self.read_json(response).await?;

        VerifyResult::from_value(raw)
    }
}
