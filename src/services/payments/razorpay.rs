use super::{
    signature::{hmac_sha256_hex, verify_hmac_sha256_hex},
    to_minor_units, CallbackKind, OutcomeStatus, PaymentError, PaymentGateway, PaymentOutcome,
    PaymentProvider, PaymentSession,
};
use crate::{config::AppConfig, entities::order::OrderModel};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub currency: String,
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
}

/// Body the storefront posts after Razorpay Checkout returns
#[derive(Debug, Deserialize)]
pub struct RazorpayVerifyPayload {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// `None` unless both the key id and key secret are set
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Option<Self> {
        let key_id = config.razorpay_key_id.clone()?;
        let key_secret = config.razorpay_key_secret.clone()?;
        Some(Self::new(
            RazorpayConfig {
                key_id,
                key_secret,
                webhook_secret: config.razorpay_webhook_secret.clone(),
                base_url: config.razorpay_base_url.trim_end_matches('/').to_string(),
                currency: config.currency.clone(),
            },
            http,
        ))
    }

    /// Signature Razorpay Checkout hands back for a captured payment
    pub fn payment_signature(&self, razorpay_order_id: &str, razorpay_payment_id: &str) -> String {
        hmac_sha256_hex(
            &self.config.key_secret,
            format!("{}|{}", razorpay_order_id, razorpay_payment_id).as_bytes(),
        )
    }

    fn verify_client(&self, body: &[u8]) -> Result<PaymentOutcome, PaymentError> {
        let payload: RazorpayVerifyPayload = serde_json::from_slice(body)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;
        if payload.razorpay_signature.trim().is_empty() {
            return Err(PaymentError::MissingSignature);
        }
        let message = format!(
            "{}|{}",
            payload.razorpay_order_id, payload.razorpay_payment_id
        );
        if !verify_hmac_sha256_hex(
            &self.config.key_secret,
            message.as_bytes(),
            &payload.razorpay_signature,
        ) {
            return Err(PaymentError::InvalidSignature);
        }
        Ok(PaymentOutcome {
            order_number: None,
            provider_ref: Some(payload.razorpay_order_id),
            status: OutcomeStatus::Completed,
        })
    }

    fn verify_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::NotConfigured(PaymentProvider::Razorpay))?;
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(PaymentError::MissingSignature)?;
        if !verify_hmac_sha256_hex(secret, body, signature) {
            return Err(PaymentError::InvalidSignature);
        }

        let event: Value =
            serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let event_name = event["event"].as_str().unwrap_or_default();
        let status = match event_name {
            "payment.captured" | "order.paid" => OutcomeStatus::Completed,
            "payment.failed" => OutcomeStatus::Failed,
            other => return Err(PaymentError::UnhandledEvent(other.to_string())),
        };

        let provider_ref = event["payload"]["payment"]["entity"]["order_id"]
            .as_str()
            .or_else(|| event["payload"]["order"]["entity"]["id"].as_str())
            .map(str::to_string);
        let order_number = event["payload"]["order"]["entity"]["receipt"]
            .as_str()
            .map(str::to_string);
        if provider_ref.is_none() && order_number.is_none() {
            return Err(PaymentError::Malformed(
                "event carries no order reference".into(),
            ));
        }
        debug!(event = event_name, ?provider_ref, "razorpay webhook verified");
        Ok(PaymentOutcome {
            order_number,
            provider_ref,
            status,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn create_session(&self, order: &OrderModel) -> Result<PaymentSession, PaymentError> {
        let amount = to_minor_units(order.total_amount)?;
        let response = self
            .http
            .post(format!("{}/v1/orders", self.config.base_url))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&json!({
                "amount": amount,
                "currency": self.config.currency,
                "receipt": order.order_number,
                "notes": { "order_number": order.order_number },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "razorpay returned {}: {}",
                status, body
            )));
        }
        let created: RazorpayOrder = response.json().await?;

        Ok(PaymentSession {
            provider: PaymentProvider::Razorpay,
            provider_ref: created.id,
            redirect_url: None,
            client_token: Some(self.config.key_id.clone()),
            order_number: order.order_number.clone(),
            amount_minor: created.amount,
            currency: created.currency,
        })
    }

    fn signature_header(&self, kind: CallbackKind) -> Option<&'static str> {
        match kind {
            CallbackKind::ClientVerify => None,
            CallbackKind::Webhook => Some(WEBHOOK_SIGNATURE_HEADER),
        }
    }

    fn verify_callback(
        &self,
        kind: CallbackKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError> {
        match kind {
            CallbackKind::ClientVerify => self.verify_client(body),
            CallbackKind::Webhook => self.verify_webhook(body, signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(
            RazorpayConfig {
                key_id: "rzp_test_key".into(),
                key_secret: "rzp_secret".into(),
                webhook_secret: Some("rzp_webhook_secret".into()),
                base_url: "http://localhost".into(),
                currency: "INR".into(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn client_verify_accepts_valid_signature() {
        let gw = gateway();
        let signature = gw.payment_signature("order_abc", "pay_123");
        let body = json!({
            "razorpay_order_id": "order_abc",
            "razorpay_payment_id": "pay_123",
            "razorpay_signature": signature,
        })
        .to_string();
        let outcome = gw
            .verify_callback(CallbackKind::ClientVerify, body.as_bytes(), None)
            .unwrap();
        assert_eq!(outcome.provider_ref.as_deref(), Some("order_abc"));
        assert_eq!(outcome.status, OutcomeStatus::Completed);
    }

    #[test]
    fn client_verify_rejects_swapped_payment_id() {
        let gw = gateway();
        let signature = gw.payment_signature("order_abc", "pay_123");
        let body = json!({
            "razorpay_order_id": "order_abc",
            "razorpay_payment_id": "pay_999",
            "razorpay_signature": signature,
        })
        .to_string();
        assert_matches!(
            gw.verify_callback(CallbackKind::ClientVerify, body.as_bytes(), None),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn webhook_maps_events() {
        let gw = gateway();
        let body = json!({
            "event": "payment.failed",
            "payload": { "payment": { "entity": { "id": "pay_1", "order_id": "order_abc" } } }
        })
        .to_string();
        let sig = hmac_sha256_hex("rzp_webhook_secret", body.as_bytes());
        let outcome = gw
            .verify_callback(CallbackKind::Webhook, body.as_bytes(), Some(&sig))
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.provider_ref.as_deref(), Some("order_abc"));

        assert_matches!(
            gw.verify_callback(CallbackKind::Webhook, body.as_bytes(), None),
            Err(PaymentError::MissingSignature)
        );
    }

    #[test]
    fn webhook_ignores_unrelated_events() {
        let gw = gateway();
        let body = json!({ "event": "refund.created", "payload": {} }).to_string();
        let sig = hmac_sha256_hex("rzp_webhook_secret", body.as_bytes());
        assert_matches!(
            gw.verify_callback(CallbackKind::Webhook, body.as_bytes(), Some(&sig)),
            Err(PaymentError::UnhandledEvent(_))
        );
    }
}
