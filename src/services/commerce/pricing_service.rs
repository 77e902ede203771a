//! Pure price and stock derivations. Nothing here touches the database; callers pass
//! in the catalog and cart snapshots they already hold.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::commerce::{product, product_variant},
};

/// Largest unit price accepted from the catalog or a checkout snapshot
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 0);

/// Thresholds and fees used by the derivations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingConfig {
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub low_stock_threshold: i32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: dec!(500),
            flat_shipping_fee: dec!(50),
            low_stock_threshold: 20,
        }
    }
}

impl From<&AppConfig> for PricingConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            free_shipping_threshold: cfg.free_shipping_threshold,
            flat_shipping_fee: cfg.flat_shipping_fee,
            low_stock_threshold: cfg.low_stock_threshold,
        }
    }
}

impl PricingConfig {
    /// Zero at or above the free-shipping threshold, the flat fee below it.
    pub fn shipping_fee(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.flat_shipping_fee
        }
    }

    pub fn order_total(&self, subtotal: Decimal) -> Decimal {
        subtotal.saturating_add(self.shipping_fee(subtotal))
    }

    pub fn stock_status(&self, total_quantity: i32) -> StockStatus {
        if total_quantity <= 0 {
            StockStatus::OutOfStock
        } else if total_quantity < self.low_stock_threshold {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    /// Stock status of a product from all of its variants
    pub fn product_stock_status(&self, variants: &[product_variant::Model]) -> StockStatus {
        self.stock_status(total_stock(variants))
    }

    pub fn price_cart(&self, lines: &[CartLine], catalog: &CatalogSnapshot) -> PricedCart {
        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|line| match catalog.get(line.product_id, &line.variant_label) {
                Some(entry) => PricedLine {
                    product_id: line.product_id,
                    name: entry.name.clone(),
                    variant_label: line.variant_label.clone(),
                    unit_price: entry.price,
                    quantity: line.quantity,
                    line_total: entry.price.saturating_mul(Decimal::from(line.quantity)),
                    available: true,
                },
                None => PricedLine {
                    product_id: line.product_id,
                    name: String::new(),
                    variant_label: line.variant_label.clone(),
                    unit_price: Decimal::ZERO,
                    quantity: line.quantity,
                    line_total: line_total(line, catalog),
                    available: false,
                },
            })
            .collect();

        let subtotal = priced
            .iter()
            .fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.line_total));
        let shipping_fee = self.shipping_fee(subtotal);
        let item_count = priced.iter().map(|l| l.quantity.max(0) as i64).sum();

        PricedCart {
            lines: priced,
            subtotal,
            shipping_fee,
            total: subtotal.saturating_add(shipping_fee),
            item_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

/// One cart entry, guest or server scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_label: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

/// Price lookup keyed by (product, variant label)
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: HashMap<(Uuid, String), CatalogEntry>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: Uuid, label: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert((product_id, label.into()), entry);
    }

    pub fn get(&self, product_id: Uuid, label: &str) -> Option<&CatalogEntry> {
        self.entries.get(&(product_id, label.to_string()))
    }

    pub fn from_catalog<'a>(
        rows: impl IntoIterator<Item = (&'a product::Model, &'a [product_variant::Model])>,
    ) -> Self {
        let mut snapshot = Self::new();
        for (product, variants) in rows {
            for variant in variants {
                snapshot.insert(
                    product.id,
                    variant.label.clone(),
                    CatalogEntry {
                        name: product.name.clone(),
                        price: variant.price,
                        quantity: variant.quantity,
                    },
                );
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `price(variant) * quantity`; a line whose variant is gone contributes zero.
pub fn line_total(line: &CartLine, catalog: &CatalogSnapshot) -> Decimal {
    match catalog.get(line.product_id, &line.variant_label) {
        Some(entry) => entry.price.saturating_mul(Decimal::from(line.quantity)),
        None => {
            warn!(
                product_id = %line.product_id,
                variant = %line.variant_label,
                "cart line references a missing variant; pricing it at zero"
            );
            Decimal::ZERO
        }
    }
}

pub fn cart_subtotal(lines: &[CartLine], catalog: &CatalogSnapshot) -> Decimal {
    lines
        .iter()
        .fold(Decimal::ZERO, |acc, line| acc.saturating_add(line_total(line, catalog)))
}

pub fn total_stock(variants: &[product_variant::Model]) -> i32 {
    variants
        .iter()
        .fold(0i32, |acc, v| acc.saturating_add(v.quantity.max(0)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub variant_label: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    /// False when the variant no longer exists in the catalog
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
    pub item_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use test_case::test_case;

    fn catalog_with(product_id: Uuid, label: &str, price: Decimal) -> CatalogSnapshot {
        let mut catalog = CatalogSnapshot::new();
        catalog.insert(
            product_id,
            label,
            CatalogEntry {
                name: "Toor Dal".into(),
                price,
                quantity: 40,
            },
        );
        catalog
    }

    #[test_case(dec!(450), dec!(50), dec!(500); "below threshold pays the flat fee")]
    #[test_case(dec!(499.99), dec!(50), dec!(549.99); "just below threshold")]
    #[test_case(dec!(500), dec!(0), dec!(500); "threshold itself ships free")]
    #[test_case(dec!(820), dec!(0), dec!(820); "above threshold")]
    #[test_case(dec!(0), dec!(50), dec!(50); "empty cart still quotes the fee")]
    fn shipping_boundaries(subtotal: Decimal, fee: Decimal, total: Decimal) {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.shipping_fee(subtotal), fee);
        assert_eq!(pricing.order_total(subtotal), total);
    }

    #[rstest]
    #[case(0, StockStatus::OutOfStock)]
    #[case(1, StockStatus::LowStock)]
    #[case(19, StockStatus::LowStock)]
    #[case(20, StockStatus::InStock)]
    #[case(250, StockStatus::InStock)]
    fn stock_boundaries(#[case] quantity: i32, #[case] expected: StockStatus) {
        assert_eq!(PricingConfig::default().stock_status(quantity), expected);
    }

    #[test]
    fn stock_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StockStatus::OutOfStock).unwrap(),
            "\"out-of-stock\""
        );
        assert_eq!(StockStatus::LowStock.to_string(), "low-stock");
    }

    #[test]
    fn line_total_multiplies_price() {
        let p1 = Uuid::new_v4();
        let catalog = catalog_with(p1, "500g", dec!(120));
        let line = CartLine {
            product_id: p1,
            variant_label: "500g".into(),
            quantity: 2,
        };
        assert_eq!(line_total(&line, &catalog), dec!(240));
    }

    #[test]
    fn missing_variant_prices_at_zero() {
        let p1 = Uuid::new_v4();
        let catalog = catalog_with(p1, "500g", dec!(120));
        let lines = vec![
            CartLine {
                product_id: p1,
                variant_label: "500g".into(),
                quantity: 1,
            },
            CartLine {
                product_id: p1,
                variant_label: "5kg".into(),
                quantity: 3,
            },
        ];
        assert_eq!(cart_subtotal(&lines, &catalog), dec!(120));

        let priced = PricingConfig::default().price_cart(&lines, &catalog);
        assert_eq!(priced.subtotal, dec!(120));
        assert_eq!(priced.shipping_fee, dec!(50));
        assert_eq!(priced.total, dec!(170));
        assert_eq!(priced.item_count, 4);
        assert!(priced.lines[0].available);
        assert!(!priced.lines[1].available);
    }

    #[test]
    fn priced_cart_crosses_free_shipping() {
        let p1 = Uuid::new_v4();
        let catalog = catalog_with(p1, "1kg", dec!(250));
        let lines = vec![CartLine {
            product_id: p1,
            variant_label: "1kg".into(),
            quantity: 2,
        }];
        let priced = PricingConfig::default().price_cart(&lines, &catalog);
        assert_eq!(priced.subtotal, dec!(500));
        assert_eq!(priced.shipping_fee, Decimal::ZERO);
        assert_eq!(priced.total, dec!(500));
    }
}
