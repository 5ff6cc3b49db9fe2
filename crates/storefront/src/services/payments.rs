//! Stripe payments client.
//!
//! Creates and cancels payment intents over the REST API and verifies webhook
//! signatures. Amounts are sent in minor units.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use emporium_core::{OrderId, Price};

use crate::config::StripeConfig;

/// Maximum age of a webhook signature timestamp.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the payments provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe answered with a non-success status.
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The amount cannot be expressed in minor units.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// A created payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

/// The parts of a webhook event the storefront reads.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: WebhookObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Client for the Stripe REST API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    webhook_secret: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Payment operations checkout depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        order_id: OrderId,
        amount: &Price,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn cancel_payment_intent(&self, intent_id: &str) -> Result<(), PaymentError>;
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_payment_intent(
        &self,
        order_id: OrderId,
        amount: &Price,
    ) -> Result<PaymentIntent, PaymentError> {
        Self::create_payment_intent(self, order_id, amount).await
    }

    async fn cancel_payment_intent(&self, intent_id: &str) -> Result<(), PaymentError> {
        Self::cancel_payment_intent(self, intent_id).await
    }
}

impl StripeClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Create a payment intent for an order.
    ///
    /// The order id is the idempotency key, so a retried call cannot create a
    /// second intent for the same order.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidAmount` if the total has no minor-unit
    /// representation, `PaymentError::Http` or `PaymentError::Api` on failure.
    #[instrument(skip(self, amount), fields(order_id = %order_id))]
    pub async fn create_payment_intent(
        &self,
        order_id: OrderId,
        amount: &Price,
    ) -> Result<PaymentIntent, PaymentError> {
        let minor_units = amount
            .to_minor_units()
            .filter(|units| *units > 0)
            .ok_or_else(|| PaymentError::InvalidAmount(amount.display()))?;

        let order_id = order_id.to_string();
        let form = [
            ("amount", minor_units.to_string()),
            ("currency", amount.currency.as_str().to_string()),
            ("metadata[order_id]", order_id.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", order_id)
            .form(&form)
            .send()
            .await?;

        let intent: PaymentIntent = Self::parse(response).await?;
        debug!(payment_intent = %intent.id, "Payment intent created");
        Ok(intent)
    }

    /// Cancel a payment intent.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` or `PaymentError::Api` on failure.
    #[instrument(skip(self))]
    pub async fn cancel_payment_intent(&self, intent_id: &str) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/payment_intents/{}/cancel",
                self.api_base,
                urlencoding::encode(intent_id)
            ))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        let _: PaymentIntent = Self::parse(response).await?;
        Ok(())
    }

    /// Verify a `Stripe-Signature` header and parse the event.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidSignature` if the header is malformed,
    /// stale, or does not match; `PaymentError::InvalidPayload` if the body is
    /// not an event.
    pub fn verify_webhook(&self, payload: &[u8], header: &str) -> Result<WebhookEvent, PaymentError> {
        self.verify_webhook_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// [`Self::verify_webhook`] at an explicit time (seconds since epoch).
    ///
    /// # Errors
    ///
    /// See [`Self::verify_webhook`].
    pub fn verify_webhook_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<WebhookEvent, PaymentError> {
        let (timestamp, signatures) = parse_signature_header(header)?;

        if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(PaymentError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let expected = sign_payload(&self.webhook_secret, timestamp, payload)?;
        if !signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            return Err(PaymentError::InvalidSignature(
                "signature mismatch".to_string(),
            ));
        }

        Ok(serde_json::from_slice(payload)?)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PaymentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

/// Split `t=…,v1=…[,v1=…]` into the timestamp and the `v1` signatures.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), PaymentError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    PaymentError::InvalidSignature("invalid timestamp".to_string())
                })?);
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }
    Ok((timestamp, signatures))
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
fn sign_payload(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, PaymentError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
