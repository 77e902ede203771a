use super::{
    signature::{constant_time_eq, sha256_hex},
    to_minor_units, CallbackKind, OutcomeStatus, PaymentError, PaymentGateway, PaymentOutcome,
    PaymentProvider, PaymentSession,
};
use crate::{config::AppConfig, entities::order::OrderModel};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

pub const VERIFY_HEADER: &str = "X-VERIFY";
const PAY_PATH: &str = "/pg/v1/pay";
const SUCCESS_CODE: &str = "PAYMENT_SUCCESS";

#[derive(Debug, Clone)]
pub struct PhonePeConfig {
    pub merchant_id: String,
    pub salt_key: String,
    pub salt_index: String,
    pub base_url: String,
    pub storefront_url: String,
    pub currency: String,
}

pub struct PhonePeGateway {
    config: PhonePeConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    response: String,
}

impl PhonePeGateway {
    pub fn new(config: PhonePeConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Option<Self> {
        let merchant_id = config.phonepe_merchant_id.clone()?;
        let salt_key = config.phonepe_salt_key.clone()?;
        Some(Self::new(
            PhonePeConfig {
                merchant_id,
                salt_key,
                salt_index: config.phonepe_salt_index.clone(),
                base_url: config.phonepe_base_url.trim_end_matches('/').to_string(),
                storefront_url: config.storefront_url.trim_end_matches('/').to_string(),
                currency: config.currency.clone(),
            },
            http,
        ))
    }

    /// `sha256_hex(payload + salt_key) + "###" + salt_index`
    pub fn checksum(&self, payload: &str) -> String {
        format!(
            "{}###{}",
            sha256_hex(format!("{}{}", payload, self.config.salt_key).as_bytes()),
            self.config.salt_index
        )
    }

    fn verify_envelope(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(PaymentError::MissingSignature)?;
        let envelope: CallbackEnvelope = serde_json::from_slice(body)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;
        let expected = self.checksum(&envelope.response);
        if !constant_time_eq(expected.as_bytes(), signature.trim().as_bytes()) {
            return Err(PaymentError::InvalidSignature);
        }

        let decoded = STANDARD
            .decode(envelope.response.as_bytes())
            .map_err(|e| PaymentError::Malformed(format!("response is not base64: {}", e)))?;
        let response: Value = serde_json::from_slice(&decoded)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;

        let code = response["code"].as_str().unwrap_or_default();
        let status = if code == SUCCESS_CODE {
            OutcomeStatus::Completed
        } else {
            OutcomeStatus::Failed
        };
        let transaction_id = response["data"]["merchantTransactionId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Malformed("missing merchantTransactionId".into()))?;
        debug!(%code, %transaction_id, "phonepe callback verified");

        Ok(PaymentOutcome {
            order_number: Some(transaction_id.clone()),
            provider_ref: Some(transaction_id),
            status,
        })
    }
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Phonepe
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn create_session(&self, order: &OrderModel) -> Result<PaymentSession, PaymentError> {
        let amount = to_minor_units(order.total_amount)?;
        let merchant_user_id = order
            .user_id
            .map(|id| id.simple().to_string())
            .unwrap_or_else(|| "guest".to_string());
        let request = json!({
            "merchantId": self.config.merchant_id,
            "merchantTransactionId": order.order_number,
            "merchantUserId": merchant_user_id,
            "amount": amount,
            "redirectUrl": format!("{}/orders/{}", self.config.storefront_url, order.order_number),
            "redirectMode": "POST",
            "callbackUrl": format!("{}/api/v1/payments/phonepe/webhook", self.config.storefront_url),
            "paymentInstrument": { "type": "PAY_PAGE" },
        });
        let encoded = STANDARD.encode(request.to_string());
        let x_verify = self.checksum(&format!("{}{}", encoded, PAY_PATH));

        let response = self
            .http
            .post(format!("{}{}", self.config.base_url, PAY_PATH))
            .header(VERIFY_HEADER, x_verify)
            .json(&json!({ "request": encoded }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "phonepe returned {}: {}",
                status, body
            )));
        }
        let body: Value = response.json().await?;
        if !body["success"].as_bool().unwrap_or(false) {
            return Err(PaymentError::Provider(format!(
                "phonepe declined: {}",
                body["code"].as_str().unwrap_or("unknown")
            )));
        }

        Ok(PaymentSession {
            provider: PaymentProvider::Phonepe,
            provider_ref: order.order_number.clone(),
            redirect_url: body["data"]["instrumentResponse"]["redirectInfo"]["url"]
                .as_str()
                .map(str::to_string),
            client_token: None,
            order_number: order.order_number.clone(),
            amount_minor: amount,
            currency: self.config.currency.clone(),
        })
    }

    fn signature_header(&self, _kind: CallbackKind) -> Option<&'static str> {
        Some(VERIFY_HEADER)
    }

    fn verify_callback(
        &self,
        _kind: CallbackKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError> {
        self.verify_envelope(body, signature)
    }
}
