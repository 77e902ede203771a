use crate::{
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        cart_service::{clear_cart, MAX_LINE_QUANTITY},
        pricing_service::{CatalogSnapshot, PricingConfig, MAX_UNIT_PRICE},
        product_catalog_service::ProductCatalogService,
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const ORDER_SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Why a submitted checkout was refused before anything was written
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckoutValidationError {
    #[error("cart must have at least one item")]
    EmptyCart,
    #[error("total amount is required")]
    MissingTotal,
    #[error("total amount cannot be negative")]
    NegativeTotal,
    #[error("payment method is required")]
    MissingPaymentMethod,
    #[error("shipping address is required")]
    MissingShippingAddress,
    #[error("item {index}: {reason}")]
    InvalidItem { index: usize, reason: String },
    #[error("order amount is too large")]
    AmountOverflow,
}

impl From<CheckoutValidationError> for ServiceError {
    fn from(err: CheckoutValidationError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Line as submitted by the client: a snapshot of what the shopper saw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    /// Display name at time of purchase
    #[serde(default)]
    pub name: Option<String>,
    /// Variant label, e.g. "500g"
    pub weight: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    pub total_amount: Option<Decimal>,
    pub payment_method: Option<String>,
    pub shipping_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResult {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
}

/// Fields that survived validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCheckout {
    pub items: Vec<CheckoutItem>,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub shipping_address: String,
}

/// Checks the request shape. Each missing or bad field has its own error.
pub fn validate_checkout(req: &CheckoutRequest) -> Result<ValidCheckout, CheckoutValidationError> {
    if req.items.is_empty() {
        return Err(CheckoutValidationError::EmptyCart);
    }
    let total_amount = req.total_amount.ok_or(CheckoutValidationError::MissingTotal)?;
    if total_amount < Decimal::ZERO {
        return Err(CheckoutValidationError::NegativeTotal);
    }
    let payment_method = req
        .payment_method
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(CheckoutValidationError::MissingPaymentMethod)?;
    let shipping_address = req
        .shipping_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or(CheckoutValidationError::MissingShippingAddress)?;

    for (index, item) in req.items.iter().enumerate() {
        let reason = if item.quantity < 1 {
            Some("quantity must be at least 1")
        } else if item.quantity > MAX_LINE_QUANTITY {
            Some("quantity is above the per-line limit")
        } else if item.price < Decimal::ZERO {
            Some("price cannot be negative")
        } else if item.price > MAX_UNIT_PRICE {
            Some("price is above the accepted maximum")
        } else if item.weight.trim().is_empty() {
            Some("variant is required")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(CheckoutValidationError::InvalidItem {
                index,
                reason: reason.to_string(),
            });
        }
    }

    Ok(ValidCheckout {
        items: req.items.clone(),
        total_amount,
        payment_method: payment_method.to_string(),
        shipping_address: shipping_address.to_string(),
    })
}

/// Sum of `price * quantity` over the lines, refusing anything that overflows
pub fn items_subtotal(items: &[CheckoutItem]) -> Result<Decimal, CheckoutValidationError> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        item.price
            .checked_mul(Decimal::from(item.quantity))
            .and_then(|line| acc.checked_add(line))
            .ok_or(CheckoutValidationError::AmountOverflow)
    })
}

/// `ORD-<yyyymmdd>-<8 uppercase alphanumerics>`
pub fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ORDER_SUFFIX_CHARSET[rng.gen_range(0..ORDER_SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Turns a submitted cart into a pending order
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<ProductCatalogService>,
    pricing: PricingConfig,
    reprice: bool,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<ProductCatalogService>,
        pricing: PricingConfig,
        reprice: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            pricing,
            reprice,
        }
    }

    /// Persist an order (and its item snapshot) with payment and fulfilment both
    /// `pending`. `user_id` is `None` for guest checkout. Nothing is written when
    /// validation or re-pricing fails.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_order(
        &self,
        user_id: Option<Uuid>,
        request: CheckoutRequest,
    ) -> Result<CheckoutResult, ServiceError> {
        let valid = validate_checkout(&request)?;

        let items = if self.reprice {
            let ids: Vec<Uuid> = valid.items.iter().map(|i| i.product_id).collect();
            let catalog = self.catalog.snapshot_for(&ids).await?;
            reprice_items(&valid.items, &catalog)?
        } else {
            valid.items.clone()
        };

        let subtotal = items_subtotal(&items)?;
        let shipping_fee = self.pricing.shipping_fee(subtotal);
        let computed_total = subtotal
            .checked_add(shipping_fee)
            .ok_or(CheckoutValidationError::AmountOverflow)?;

        let total_amount = if self.reprice {
            if valid.total_amount.round_dp(2) != computed_total.round_dp(2) {
                return Err(ServiceError::Conflict(format!(
                    "order total changed: submitted {}, current {}",
                    valid.total_amount, computed_total
                )));
            }
            computed_total
        } else {
            if valid.total_amount.round_dp(2) != computed_total.round_dp(2) {
                warn!(
                    submitted = %valid.total_amount,
                    computed = %computed_total,
                    "accepting client total that differs from derived total"
                );
            }
            valid.total_amount
        };

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number();
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            subtotal: Set(subtotal),
            shipping_fee: Set(shipping_fee),
            total_amount: Set(total_amount),
            shipping_address: Set(valid.shipping_address.clone()),
            payment_method: Set(valid.payment_method.clone()),
            payment_provider: Set(None),
            payment_provider_ref: Set(None),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Pending),
            stock_committed: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for item in &items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone().unwrap_or_default()),
                weight: Set(item.weight.trim().to_string()),
                price: Set(item.price),
                quantity: Set(item.quantity),
            }
            .insert(&txn)
            .await?;
        }

        if let Some(user_id) = user_id {
            clear_cart(&txn, user_id).await?;
        }
        txn.commit().await?;

        if let Some(user_id) = user_id {
            self.event_sender
                .send_or_log(Event::CartCleared(user_id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
                total: total_amount,
            })
            .await;
        info!(%order_id, %order_number, %total_amount, guest = user_id.is_none(), "order created");

        Ok(CheckoutResult {
            order_id: order.id,
            order_number,
            subtotal,
            shipping_fee,
            total_amount,
            order_status: order.order_status,
            payment_status: order.payment_status,
        })
    }
}

/// Replaces client names/prices with live catalog values. A vanished product or
/// variant is `NotFound`; a price that moved is `Conflict`.
pub fn reprice_items(
    items: &[CheckoutItem],
    catalog: &CatalogSnapshot,
) -> Result<Vec<CheckoutItem>, ServiceError> {
    items
        .iter()
        .map(|item| {
            let label = item.weight.trim();
            let entry = catalog.get(item.product_id, label).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Variant {} of product {} is no longer available",
                    label, item.product_id
                ))
            })?;
            if entry.price.round_dp(2) != item.price.round_dp(2) {
                return Err(ServiceError::Conflict(format!(
                    "price of {} ({}) changed from {} to {}",
                    entry.name, label, item.price, entry.price
                )));
            }
            Ok(CheckoutItem {
                product_id: item.product_id,
                name: Some(entry.name.clone()),
                weight: label.to_string(),
                price: entry.price,
                quantity: item.quantity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::commerce::pricing_service::CatalogEntry;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: i32) -> CheckoutItem {
        CheckoutItem {
            product_id: Uuid::new_v4(),
            name: Some("Toor Dal".into()),
            weight: "500g".into(),
            price,
            quantity,
        }
    }

    fn valid_request() -> CheckoutRequest {
        CheckoutRequest {
            items: vec![item(dec!(120), 2)],
            total_amount: Some(dec!(290)),
            payment_method: Some("razorpay".into()),
            shipping_address: Some("12 MG Road, Pune".into()),
        }
    }

    #[test]
    fn accepts_complete_request() {
        let valid = validate_checkout(&valid_request()).unwrap();
        assert_eq!(valid.total_amount, dec!(290));
        assert_eq!(valid.payment_method, "razorpay");
    }

    #[test]
    fn each_missing_field_has_its_own_error() {
        let mut req = valid_request();
        req.items.clear();
        assert_eq!(
            validate_checkout(&req),
            Err(CheckoutValidationError::EmptyCart)
        );
        assert_eq!(
            CheckoutValidationError::EmptyCart.to_string(),
            "cart must have at least one item"
        );

        let mut req = valid_request();
        req.total_amount = None;
        assert_eq!(
            validate_checkout(&req),
            Err(CheckoutValidationError::MissingTotal)
        );

        let mut req = valid_request();
        req.total_amount = Some(dec!(-1));
        assert_eq!(
            validate_checkout(&req),
            Err(CheckoutValidationError::NegativeTotal)
        );

        let mut req = valid_request();
        req.payment_method = Some("   ".into());
        assert_eq!(
            validate_checkout(&req),
            Err(CheckoutValidationError::MissingPaymentMethod)
        );

        let mut req = valid_request();
        req.shipping_address = None;
        assert_eq!(
            validate_checkout(&req),
            Err(CheckoutValidationError::MissingShippingAddress)
        );
    }

    #[test]
    fn oversized_lines_are_rejected() {
        let mut req = valid_request();
        req.items = vec![item(dec!(120), MAX_LINE_QUANTITY + 1)];
        assert_matches!(
            validate_checkout(&req),
            Err(CheckoutValidationError::InvalidItem { index: 0, .. })
        );

        let mut req = valid_request();
        req.items = vec![item(dec!(1), 1), item(Decimal::MAX, 2)];
        assert_matches!(
            validate_checkout(&req),
            Err(CheckoutValidationError::InvalidItem { index: 1, .. })
        );
    }

    #[test]
    fn subtotal_overflow_is_an_error() {
        assert_eq!(
            items_subtotal(&[item(dec!(120), 2), item(dec!(50), 1)]),
            Ok(dec!(290))
        );
        assert_eq!(
            items_subtotal(&[item(Decimal::MAX, 2)]),
            Err(CheckoutValidationError::AmountOverflow)
        );
        assert_eq!(
            items_subtotal(&[item(Decimal::MAX, 1), item(Decimal::MAX, 1)]),
            Err(CheckoutValidationError::AmountOverflow)
        );
    }

    #[test]
    fn zero_total_is_allowed() {
        let mut req = valid_request();
        req.total_amount = Some(Decimal::ZERO);
        assert!(validate_checkout(&req).is_ok());
    }

    #[test]
    fn bad_item_quantity_is_rejected() {
        let mut req = valid_request();
        req.items.push(item(dec!(10), 0));
        assert_matches!(
            validate_checkout(&req),
            Err(CheckoutValidationError::InvalidItem { index: 1, .. })
        );
    }

    #[test]
    fn order_number_format() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn reprice_detects_moved_and_missing_prices() {
        let line = item(dec!(120), 2);
        let mut catalog = CatalogSnapshot::new();
        catalog.insert(
            line.product_id,
            "500g",
            CatalogEntry {
                name: "Toor Dal".into(),
                price: dec!(120.00),
                quantity: 50,
            },
        );
        let repriced = reprice_items(std::slice::from_ref(&line), &catalog).unwrap();
        assert_eq!(repriced[0].price, dec!(120.00));

        let stale = CheckoutItem {
            price: dec!(110),
            ..line.clone()
        };
        assert_matches!(
            reprice_items(&[stale], &catalog),
            Err(ServiceError::Conflict(_))
        );

        let gone = CheckoutItem {
            weight: "1kg".into(),
            ..line
        };
        assert_matches!(
            reprice_items(&[gone], &catalog),
            Err(ServiceError::NotFound(_))
        );
    }
}
