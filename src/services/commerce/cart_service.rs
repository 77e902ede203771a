use crate::{
    config::CartMergePolicy,
    entities::commerce::{cart_item, CartItem},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        pricing_service::{CartLine, PricedCart, PricingConfig},
        product_catalog_service::ProductCatalogService,
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Upper bound on a single cart line
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Server-scope cart. One row per (user, product, variant label); every write is a
/// single upsert on that key.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<ProductCatalogService>,
    pricing: PricingConfig,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<ProductCatalogService>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            pricing,
        }
    }

    /// Current lines, oldest first
    #[instrument(skip(self))]
    pub async fn lines(&self, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        let rows = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| CartLine {
                product_id: row.product_id,
                variant_label: row.variant_label,
                quantity: row.quantity,
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn priced_cart(&self, user_id: Uuid) -> Result<PricedCart, ServiceError> {
        let lines = self.lines(user_id).await?;
        self.price_lines(&lines).await
    }

    /// Prices arbitrary lines (a guest cart, say) against the live catalog
    pub async fn price_lines(&self, lines: &[CartLine]) -> Result<PricedCart, ServiceError> {
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let catalog = self.catalog.snapshot_for(&ids).await?;
        Ok(self.pricing.price_cart(lines, &catalog))
    }

    /// Adds `quantity` to whatever the user already has for this variant. The
    /// stored total saturates at `MAX_LINE_QUANTITY`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_label: &str,
        quantity: i32,
    ) -> Result<i32, ServiceError> {
        self.upsert(user_id, product_id, variant_label, quantity, CartMergePolicy::Additive)
            .await
    }

    /// Sets the quantity outright; anything below 1 removes the line.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_label: &str,
        quantity: i32,
    ) -> Result<i32, ServiceError> {
        if quantity < 1 {
            self.remove_item(user_id, product_id, variant_label).await?;
            return Ok(0);
        }
        self.upsert(user_id, product_id, variant_label, quantity, CartMergePolicy::Overwrite)
            .await
    }

    /// Fold one guest line into the server cart under the configured policy.
    pub async fn merge_line(
        &self,
        user_id: Uuid,
        line: &CartLine,
        policy: CartMergePolicy,
    ) -> Result<i32, ServiceError> {
        self.upsert(
            user_id,
            line.product_id,
            &line.variant_label,
            line.quantity,
            policy,
        )
        .await
    }

    async fn upsert(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_label: &str,
        quantity: i32,
        policy: CartMergePolicy,
    ) -> Result<i32, ServiceError> {
        if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }
        // Rejects unknown products and variants with NotFound
        self.catalog.get_variant(product_id, variant_label).await?;

        upsert_cart_line(&*self.db, user_id, product_id, variant_label, quantity, policy).await?;

        let row = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::VariantLabel.eq(variant_label))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::InternalError("cart line vanished after upsert".into()))?;

        self.event_sender
            .send_or_log(Event::CartItemUpserted {
                user_id,
                product_id,
                variant_label: variant_label.to_string(),
                quantity: row.quantity,
            })
            .await;
        Ok(row.quantity)
    }

    /// No-op when the line does not exist
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_label: &str,
    ) -> Result<(), ServiceError> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::VariantLabel.eq(variant_label))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    user_id,
                    product_id,
                    variant_label: variant_label.to_string(),
                })
                .await;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let removed = clear_cart(&*self.db, user_id).await?;
        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;
        info!(%user_id, removed, "cleared server cart");
        Ok(removed)
    }
}

/// `INSERT ... ON CONFLICT (user_id, product_id, variant_label) DO UPDATE`.
/// Additive adds to the stored quantity in the same statement, capped at
/// `MAX_LINE_QUANTITY`; overwrite replaces it.
pub async fn upsert_cart_line<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    product_id: Uuid,
    variant_label: &str,
    quantity: i32,
    policy: CartMergePolicy,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let model = cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id),
        variant_label: Set(variant_label.to_string()),
        quantity: Set(quantity),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let mut on_conflict = OnConflict::columns([
        cart_item::Column::UserId,
        cart_item::Column::ProductId,
        cart_item::Column::VariantLabel,
    ]);
    match policy {
        CartMergePolicy::Additive => {
            let summed = Expr::col((cart_item::Entity, cart_item::Column::Quantity)).add(quantity);
            let capped = Expr::case(
                Expr::expr(summed.clone()).gt(MAX_LINE_QUANTITY),
                MAX_LINE_QUANTITY,
            )
            .finally(summed);
            on_conflict
                .value(cart_item::Column::Quantity, capped)
                .value(cart_item::Column::UpdatedAt, now)
        }
        CartMergePolicy::Overwrite => on_conflict.update_columns([
            cart_item::Column::Quantity,
            cart_item::Column::UpdatedAt,
        ]),
    };

    CartItem::insert(model)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;
    Ok(())
}

pub async fn clear_cart<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<u64, ServiceError> {
    let result = CartItem::delete_many()
        .filter(cart_item::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
