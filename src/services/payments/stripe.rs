use super::{
    signature::verify_hmac_sha256_hex, to_minor_units, CallbackKind, OutcomeStatus, PaymentError,
    PaymentGateway, PaymentOutcome, PaymentProvider, PaymentSession,
};
use crate::{config::AppConfig, entities::order::OrderModel};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub currency: String,
    pub storefront_url: String,
    pub tolerance_secs: u64,
}

pub struct StripeGateway {
    config: StripeConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
}

/// `t=<unix>,v1=<hex>[,v1=<hex>...]`
fn parse_signature_header(header: &str) -> Option<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    timestamp.map(|t| (t, signatures))
}

impl StripeGateway {
    pub fn new(config: StripeConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Option<Self> {
        let secret_key = config.stripe_secret_key.clone()?;
        Some(Self::new(
            StripeConfig {
                secret_key,
                webhook_secret: config.stripe_webhook_secret.clone(),
                base_url: config.stripe_base_url.trim_end_matches('/').to_string(),
                currency: config.currency.to_lowercase(),
                storefront_url: config.storefront_url.trim_end_matches('/').to_string(),
                tolerance_secs: config.stripe_webhook_tolerance_secs,
            },
            http,
        ))
    }

    /// Verifies against an explicit clock; `verify_callback` passes the current time.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<PaymentOutcome, PaymentError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::NotConfigured(PaymentProvider::Stripe))?;
        let header = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(PaymentError::MissingSignature)?;
        let (timestamp, candidates) =
            parse_signature_header(header).ok_or(PaymentError::InvalidSignature)?;
        if now.abs_diff(timestamp) > self.config.tolerance_secs {
            return Err(PaymentError::InvalidSignature);
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(body);
        if !candidates
            .iter()
            .any(|candidate| verify_hmac_sha256_hex(secret, &signed, candidate))
        {
            return Err(PaymentError::InvalidSignature);
        }

        let event: Value =
            serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let event_type = event["type"].as_str().unwrap_or_default();
        let session = &event["data"]["object"];
        let status = match event_type {
            "checkout.session.completed" => {
                // Delayed methods complete the session before the money arrives
                if session["payment_status"].as_str() != Some("paid") {
                    return Err(PaymentError::UnhandledEvent(format!(
                        "{} (payment_status {})",
                        event_type,
                        session["payment_status"].as_str().unwrap_or("unknown")
                    )));
                }
                OutcomeStatus::Completed
            }
            "checkout.session.async_payment_succeeded" => OutcomeStatus::Completed,
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                OutcomeStatus::Failed
            }
            other => return Err(PaymentError::UnhandledEvent(other.to_string())),
        };

        let provider_ref = session["id"].as_str().map(str::to_string);
        let order_number = session["client_reference_id"]
            .as_str()
            .or_else(|| session["metadata"]["order_number"].as_str())
            .map(str::to_string);
        if provider_ref.is_none() && order_number.is_none() {
            return Err(PaymentError::Malformed(
                "event carries no checkout session".into(),
            ));
        }
        debug!(event = event_type, ?provider_ref, "stripe event verified");
        Ok(PaymentOutcome {
            order_number,
            provider_ref,
            status,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn create_session(&self, order: &OrderModel) -> Result<PaymentSession, PaymentError> {
        let amount = to_minor_units(order.total_amount)?;
        let order_url = format!("{}/orders/{}", self.config.storefront_url, order.order_number);
        let form = [
            ("mode", "payment".to_string()),
            ("client_reference_id", order.order_number.clone()),
            ("success_url", format!("{}?payment=success", order_url)),
            ("cancel_url", format!("{}?payment=cancelled", order_url)),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                self.config.currency.clone(),
            ),
            ("line_items[0][price_data][unit_amount]", amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("Order {}", order.order_number),
            ),
            ("metadata[order_number]", order.order_number.clone()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.config.base_url))
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "stripe returned {}: {}",
                status, body
            )));
        }
        let session: CheckoutSession = response.json().await?;

        Ok(PaymentSession {
            provider: PaymentProvider::Stripe,
            provider_ref: session.id,
            redirect_url: session.url,
            client_token: None,
            order_number: order.order_number.clone(),
            amount_minor: amount,
            currency: self.config.currency.to_uppercase(),
        })
    }

    fn signature_header(&self, _kind: CallbackKind) -> Option<&'static str> {
        Some(SIGNATURE_HEADER)
    }

    /// Both routes carry a signed event; the storefront relays it verbatim.
    fn verify_callback(
        &self,
        _kind: CallbackKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError> {
        self.verify_at(body, signature, Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::signature::hmac_sha256_hex;
    use assert_matches::assert_matches;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn gateway() -> StripeGateway {
        StripeGateway::new(
            StripeConfig {
                secret_key: "sk_test".into(),
                webhook_secret: Some(SECRET.into()),
                base_url: "http://localhost".into(),
                currency: "inr".into(),
                storefront_url: "http://localhost:3000".into(),
                tolerance_secs: 300,
            },
            reqwest::Client::new(),
        )
    }

    fn sign(body: &str, t: i64) -> String {
        let sig = hmac_sha256_hex(SECRET, format!("{}.{}", t, body).as_bytes());
        format!("t={},v1={}", t, sig)
    }

    fn completed_event() -> String {
        json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "client_reference_id": "ORD-20240101-ABCDEFGH",
                "payment_status": "paid"
            } }
        })
        .to_string()
    }

    #[test]
    fn parses_header_with_multiple_signatures() {
        let (t, sigs) = parse_signature_header("t=12,v1=aa,v0=bb,v1=cc").unwrap();
        assert_eq!(t, 12);
        assert_eq!(sigs, vec!["aa", "cc"]);
        assert!(parse_signature_header("v1=aa").is_none());
    }

    #[test]
    fn accepts_signed_completed_session() {
        let body = completed_event();
        let now = 1_700_000_000;
        let outcome = gateway()
            .verify_at(body.as_bytes(), Some(&sign(&body, now)), now + 10)
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.provider_ref.as_deref(), Some("cs_test_1"));
        assert_eq!(
            outcome.order_number.as_deref(),
            Some("ORD-20240101-ABCDEFGH")
        );
    }

    #[test]
    fn rejects_stale_timestamp_and_tampered_body() {
        let body = completed_event();
        let now = 1_700_000_000;
        let gw = gateway();
        assert_matches!(
            gw.verify_at(body.as_bytes(), Some(&sign(&body, now)), now + 301),
            Err(PaymentError::InvalidSignature)
        );
        let tampered = body.replace("paid", "unpaid");
        assert_matches!(
            gw.verify_at(tampered.as_bytes(), Some(&sign(&body, now)), now),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let gw = gateway();
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert_matches!(
                gw.verify_at(b"{}", Some(header), 1_700_000_000),
                Err(PaymentError::InvalidSignature)
            );
        }
        assert_matches!(
            gw.verify_at(b"{}", Some("t=0,v1=00"), i64::MIN),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn unpaid_completion_is_not_a_payment() {
        let body = json!({
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "payment_status": "unpaid" } }
        })
        .to_string();
        let now = 1_700_000_000;
        assert_matches!(
            gateway().verify_at(body.as_bytes(), Some(&sign(&body, now)), now),
            Err(PaymentError::UnhandledEvent(_))
        );
    }

    #[test]
    fn expired_session_fails_order() {
        let body = json!({
            "type": "checkout.session.expired",
            "data": { "object": { "id": "cs_2", "client_reference_id": "ORD-1" } }
        })
        .to_string();
        let now = 1_700_000_000;
        let outcome = gateway()
            .verify_at(body.as_bytes(), Some(&sign(&body, now)), now)
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
    }
}
