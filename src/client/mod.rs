//! Toss Payments gateway client
//!
//! Every call returns either a structured success payload or a
//! [`GatewayCallError`]; provider errors are never raised as panics or
//! converted into opaque failures, because the reconciliation engine needs
//! the full trichotomy (success / provider error / transport failure) to
//! classify the outcome.

pub mod models;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TossConfig;
use models::{
    BillingKeyPaymentRequest, BillingKeyRequest, PaymentCancelRequest, PaymentConfirmRequest,
    TossBilling, TossErrorBody, TossPayment,
};

pub const LIVE_BASE_URL: &str = "https://api.tosspayments.com/v1";
pub const TEST_BASE_URL: &str = "https://api.tosspayments.com/v1";

/// Outcome of a gateway call that did not produce a success payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCallError {
    /// The provider answered with a structured error body.
    Provider {
        code: String,
        message: String,
        http_status: u16,
    },
    /// No structured answer at all: DNS failure, timeout, connection reset,
    /// or an unparseable success body. The server-side effect is unknown.
    Transport { message: String },
}

impl GatewayCallError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        GatewayCallError::Transport {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GatewayCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayCallError::Provider {
                code,
                message,
                http_status,
            } => write!(f, "provider error {} ({}): {}", code, http_status, message),
            GatewayCallError::Transport { message } => write!(f, "transport failure: {}", message),
        }
    }
}

impl std::error::Error for GatewayCallError {}

/// Synchronous request/response boundary to Toss Payments.
///
/// The secret key comes in with each call via the tenant configuration
/// snapshot; the client itself holds no tenant state. Idempotency keys are
/// forwarded so provider-side retries collapse to one charge.
#[async_trait]
pub trait TossClient: Send + Sync {
    async fn confirm_payment(
        &self,
        config: &TossConfig,
        request: &PaymentConfirmRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError>;

    async fn cancel_payment(
        &self,
        config: &TossConfig,
        payment_key: &str,
        request: &PaymentCancelRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError>;

    async fn get_payment(
        &self,
        config: &TossConfig,
        payment_key: &str,
    ) -> Result<TossPayment, GatewayCallError>;

    async fn issue_billing_key(
        &self,
        config: &TossConfig,
        request: &BillingKeyRequest,
    ) -> Result<TossBilling, GatewayCallError>;

    async fn charge_billing_key(
        &self,
        config: &TossConfig,
        billing_key: &str,
        request: &BillingKeyPaymentRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError>;
}

/// HTTP implementation of [`TossClient`] backed by reqwest.
pub struct TossHttpClient {
    client: reqwest::Client,
    live_base_url: String,
    test_base_url: String,
}

impl TossHttpClient {
    pub fn new() -> Self {
        Self::with_base_urls(LIVE_BASE_URL, TEST_BASE_URL)
    }

    /// Override the endpoints, used to point at a stub server in tests.
    pub fn with_base_urls<S: Into<String>>(live: S, test: S) -> Self {
        // The read timeout is applied per request from the tenant config;
        // only the connect timeout has to be fixed at construction.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            live_base_url: live.into(),
            test_base_url: test.into(),
        }
    }

    fn base_url<'a>(&'a self, config: &TossConfig) -> &'a str {
        if config.test_mode {
            &self.test_base_url
        } else {
            &self.live_base_url
        }
    }

    fn auth_header(secret_key: &str) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:", secret_key));
        format!("Basic {}", encoded)
    }

    async fn execute<T: DeserializeOwned, B: Serialize>(
        &self,
        config: &TossConfig,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayCallError> {
        let secret_key = config
            .secret_key
            .as_deref()
            .ok_or_else(|| GatewayCallError::transport("secret key is not configured"))?;

        let url = format!("{}{}", self.base_url(config), path);
        debug!("Toss API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", Self::auth_header(secret_key))
            .header("Content-Type", "application/json")
            .timeout(config.read_timeout);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayCallError::transport(e.to_string()))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| GatewayCallError::transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body_text).map_err(|e| {
                GatewayCallError::transport(format!("failed to parse success response: {}", e))
            })
        } else {
            Err(Self::provider_error(status, &body_text))
        }
    }

    fn provider_error(status: StatusCode, body: &str) -> GatewayCallError {
        let error_body = match serde_json::from_str::<TossErrorBody>(body) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("failed to parse Toss error response: {}", body);
                TossErrorBody {
                    code: "UNKNOWN_ERROR".to_string(),
                    message: format!("Unknown error occurred: {}", body),
                }
            }
        };
        GatewayCallError::Provider {
            code: error_body.code,
            message: error_body.message,
            http_status: status.as_u16(),
        }
    }
}

impl Default for TossHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TossClient for TossHttpClient {
    async fn confirm_payment(
        &self,
        config: &TossConfig,
        request: &PaymentConfirmRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError> {
        self.execute(
            config,
            reqwest::Method::POST,
            "/payments/confirm",
            Some(request),
            Some(idempotency_key),
        )
        .await
    }

    async fn cancel_payment(
        &self,
        config: &TossConfig,
        payment_key: &str,
        request: &PaymentCancelRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError> {
        self.execute(
            config,
            reqwest::Method::POST,
            &format!("/payments/{}/cancel", payment_key),
            Some(request),
            Some(idempotency_key),
        )
        .await
    }

    async fn get_payment(
        &self,
        config: &TossConfig,
        payment_key: &str,
    ) -> Result<TossPayment, GatewayCallError> {
        self.execute::<TossPayment, ()>(
            config,
            reqwest::Method::GET,
            &format!("/payments/{}", payment_key),
            None,
            None,
        )
        .await
    }

    async fn issue_billing_key(
        &self,
        config: &TossConfig,
        request: &BillingKeyRequest,
    ) -> Result<TossBilling, GatewayCallError> {
        self.execute(
            config,
            reqwest::Method::POST,
            "/billing/authorizations/issue",
            Some(request),
            None,
        )
        .await
    }

    async fn charge_billing_key(
        &self,
        config: &TossConfig,
        billing_key: &str,
        request: &BillingKeyPaymentRequest,
        idempotency_key: &str,
    ) -> Result<TossPayment, GatewayCallError> {
        self.execute(
            config,
            reqwest::Method::POST,
            &format!("/billing/{}", billing_key),
            Some(request),
            Some(idempotency_key),
        )
        .await
    }
}
