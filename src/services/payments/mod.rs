//! Payment gateway adapter.
//!
//! Each provider implements [`PaymentGateway`]: it opens a hosted payment session for an
//! order and turns a signed callback into a [`PaymentOutcome`]. [`PaymentService`] owns the
//! configured gateways and is the only place order payment state changes.

pub mod phonepe;
pub mod razorpay;
pub mod signature;
pub mod stripe;

use crate::{
    auth::Identity,
    config::AppConfig,
    entities::order::{self, OrderModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderService,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub use phonepe::PhonePeGateway;
pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentProvider {
    Razorpay,
    Phonepe,
    Stripe,
}

/// What the storefront needs to send the shopper to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub provider: PaymentProvider,
    /// Provider-side identifier (Razorpay order id, Stripe session id, PhonePe transaction id)
    pub provider_ref: String,
    pub redirect_url: Option<String>,
    /// Public key or token the client-side SDK needs, if any
    pub client_token: Option<String>,
    pub order_number: String,
    /// Amount in minor units (paise)
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

impl From<OutcomeStatus> for PaymentStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Completed => PaymentStatus::Completed,
            OutcomeStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// A verified provider callback. At least one of the identifiers is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub order_number: Option<String>,
    pub provider_ref: Option<String>,
    pub status: OutcomeStatus,
}

/// Which route delivered a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Posted by the storefront after the shopper returns from the provider
    ClientVerify,
    /// Posted server-to-server by the provider
    Webhook,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment signature is missing")]
    MissingSignature,
    #[error("payment signature does not match")]
    InvalidSignature,
    #[error("payment provider {0} is not configured")]
    NotConfigured(PaymentProvider),
    #[error("payment provider rejected the request: {0}")]
    Provider(String),
    #[error("payment provider unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed payment callback: {0}")]
    Malformed(String),
    #[error("unhandled payment event {0}")]
    UnhandledEvent(String),
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingSignature | PaymentError::InvalidSignature => {
                ServiceError::Unauthorized(err.to_string())
            }
            PaymentError::NotConfigured(_) => ServiceError::NotFound(err.to_string()),
            PaymentError::Provider(_) | PaymentError::Http(_) => {
                ServiceError::ExternalServiceError(err.to_string())
            }
            PaymentError::Malformed(_) | PaymentError::UnhandledEvent(_) => {
                ServiceError::BadRequest(err.to_string())
            }
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_session(&self, order: &OrderModel) -> Result<PaymentSession, PaymentError>;

    /// Header carrying the signature for this callback kind; `None` when the
    /// signature travels in the body.
    fn signature_header(&self, kind: CallbackKind) -> Option<&'static str>;

    /// Verifies the signature over the raw body and extracts the outcome. Nothing
    /// may be trusted from `body` before this returns `Ok`.
    fn verify_callback(
        &self,
        kind: CallbackKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentOutcome, PaymentError>;
}

/// Order total in paise
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.round().to_i64())
        .ok_or_else(|| PaymentError::Malformed(format!("amount {} out of range", amount)))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub order_number: String,
}

/// Response to a verify or webhook call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    pub order_number: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    /// False when the callback repeated a state already recorded
    pub applied: bool,
    /// True for provider events this service does not act on
    pub ignored: bool,
}

impl CallbackAck {
    fn ignored() -> Self {
        Self {
            order_number: None,
            payment_status: None,
            applied: false,
            ignored: true,
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    orders: Arc<OrderService>,
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        orders: Arc<OrderService>,
        gateways: Vec<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.provider(), gateway))
            .collect();
        Self {
            db,
            event_sender,
            orders,
            gateways,
        }
    }

    /// Registers a gateway for every provider whose credentials are present.
    pub fn from_config(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        orders: Arc<OrderService>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_client_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();
        if let Some(gateway) = RazorpayGateway::from_config(config, client.clone()) {
            gateways.push(Arc::new(gateway));
        }
        if let Some(gateway) = StripeGateway::from_config(config, client.clone()) {
            gateways.push(Arc::new(gateway));
        }
        if let Some(gateway) = PhonePeGateway::from_config(config, client) {
            gateways.push(Arc::new(gateway));
        }
        info!(
            providers = ?gateways.iter().map(|g| g.provider()).collect::<Vec<_>>(),
            "payment gateways configured"
        );
        Ok(Self::new(db, event_sender, orders, gateways))
    }

    /// Unknown names and providers without credentials are both `NotFound`.
    pub fn gateway(&self, provider: &str) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        let parsed: PaymentProvider = provider
            .parse()
            .map_err(|_| ServiceError::NotFound(format!("Unknown payment provider {}", provider)))?;
        self.gateways
            .get(&parsed)
            .cloned()
            .ok_or_else(|| PaymentError::NotConfigured(parsed).into())
    }

    pub fn configured_providers(&self) -> Vec<PaymentProvider> {
        self.gateways.keys().copied().collect()
    }

    /// Opens a provider session for an unpaid order and records the provider reference.
    #[instrument(skip(self, identity))]
    pub async fn create_session(
        &self,
        provider: &str,
        identity: &Identity,
        order_number: &str,
    ) -> Result<PaymentSession, ServiceError> {
        let gateway = self.gateway(provider)?;
        let view = self.orders.get_for(identity, order_number).await?;
        let order = self.orders.find_by_id(view.id).await?;
        if order.payment_status == PaymentStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is already paid",
                order.order_number
            )));
        }

        let session = gateway.create_session(&order).await.map_err(|e| {
            warn!(order_number = %order.order_number, error = %e, "payment session creation failed");
            ServiceError::from(e)
        })?;

        let provider_name = session.provider.to_string();
        order::Entity::update_many()
            .col_expr(
                order::Column::PaymentProvider,
                Expr::value(Some(provider_name.clone())),
            )
            .col_expr(
                order::Column::PaymentProviderRef,
                Expr::value(Some(session.provider_ref.clone())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .exec(&*self.db)
            .await?;

        self.event_sender
            .send_or_log(Event::PaymentSessionCreated {
                order_id: order.id,
                provider: provider_name,
                provider_ref: session.provider_ref.clone(),
            })
            .await;
        Ok(session)
    }

    /// Verifies a callback and applies it. Signature failures never touch state.
    #[instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn handle_callback(
        &self,
        provider: &str,
        kind: CallbackKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackAck, ServiceError> {
        let gateway = self.gateway(provider)?;
        let outcome = match gateway.verify_callback(kind, body, signature) {
            Ok(outcome) => outcome,
            Err(PaymentError::UnhandledEvent(event)) => {
                info!(%event, "ignoring payment event");
                return Ok(CallbackAck::ignored());
            }
            Err(e) => {
                warn!(error = %e, "payment callback rejected");
                return Err(e.into());
            }
        };

        let order = self.locate_order(gateway.provider(), &outcome).await?;
        let applied = self
            .apply_outcome(&order, gateway.provider(), outcome.status)
            .await?;
        let current = self.orders.find_by_id(order.id).await?;
        Ok(CallbackAck {
            order_number: Some(current.order_number),
            payment_status: Some(current.payment_status),
            applied,
            ignored: false,
        })
    }

    async fn locate_order(
        &self,
        provider: PaymentProvider,
        outcome: &PaymentOutcome,
    ) -> Result<OrderModel, ServiceError> {
        if let Some(provider_ref) = &outcome.provider_ref {
            match self
                .orders
                .find_by_provider_ref(&provider.to_string(), provider_ref)
                .await
            {
                Ok(order) => return Ok(order),
                Err(ServiceError::NotFound(_)) if outcome.order_number.is_some() => {}
                Err(e) => return Err(e),
            }
        }
        match &outcome.order_number {
            Some(number) => self.orders.find_by_number(number).await,
            None => Err(ServiceError::NotFound(
                "payment callback does not reference a known order".into(),
            )),
        }
    }

    /// Moves the order's payment state. `completed` is terminal and `failed` only
    /// overrides `pending`, so replays change nothing. Returns whether a row changed.
    pub async fn apply_outcome(
        &self,
        order: &OrderModel,
        provider: PaymentProvider,
        status: OutcomeStatus,
    ) -> Result<bool, ServiceError> {
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::from(status)))
            .col_expr(
                order::Column::PaymentProvider,
                Expr::value(Some(provider.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id));
        update = match status {
            OutcomeStatus::Completed => {
                update.filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed))
            }
            OutcomeStatus::Failed => {
                update.filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            }
        };
        let changed = update.exec(&*self.db).await?.rows_affected > 0;
        if !changed {
            info!(order_number = %order.order_number, ?status, "payment callback already applied");
            return Ok(false);
        }

        let provider_name = provider.to_string();
        match status {
            OutcomeStatus::Completed => {
                metrics::counter!("larder_payments_completed_total", 1);
                self.event_sender
                    .send_or_log(Event::PaymentCompleted {
                        order_id: order.id,
                        provider: provider_name,
                    })
                    .await;
                self.commit_stock(order.id).await;
            }
            OutcomeStatus::Failed => {
                metrics::counter!("larder_payments_failed_total", 1);
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        order_id: order.id,
                        provider: provider_name,
                    })
                    .await;
            }
        }
        info!(order_number = %order.order_number, ?status, %provider, "payment state updated");
        Ok(true)
    }

    /// A paid order whose stock cannot be committed stays `pending` for an admin.
    async fn commit_stock(&self, order_id: Uuid) {
        match self.orders.confirm_order(order_id).await {
            Ok(_) => {}
            Err(ServiceError::InsufficientStock(reason)) => {
                warn!(%order_id, %reason, "paid order left pending: insufficient stock");
                self.event_sender
                    .send_or_log(Event::StockCommitFailed { order_id, reason })
                    .await;
            }
            Err(e) => {
                warn!(%order_id, error = %e, "could not confirm paid order");
            }
        }
    }
}
