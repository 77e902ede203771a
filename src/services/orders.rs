use crate::{
    auth::Identity,
    entities::{
        commerce::{product_variant, ProductVariant},
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub name: String,
    pub weight: String,
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<OrderItemModel> for OrderItemView {
    fn from(item: OrderItemModel) -> Self {
        Self {
            product_id: item.product_id,
            line_total: item.price * Decimal::from(item.quantity),
            name: item.name,
            weight: item.weight,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub payment_method: String,
    pub payment_provider: Option<String>,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub items: Vec<OrderItemView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn build(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            subtotal: order.subtotal,
            shipping_fee: order.shipping_fee,
            total_amount: order.total_amount,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            payment_provider: order.payment_provider,
            payment_status: order.payment_status,
            order_status: order.order_status,
            items: items.into_iter().map(OrderItemView::from).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderPage {
    pub items: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Order reads, admin status changes and the stock commit that follows payment
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_by_number(&self, order_number: &str) -> Result<OrderModel, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    pub async fn find_by_id(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Looks an order up by the reference a payment provider knows it by
    pub async fn find_by_provider_ref(
        &self,
        provider: &str,
        provider_ref: &str,
    ) -> Result<OrderModel, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymentProvider.eq(provider))
            .filter(order::Column::PaymentProviderRef.eq(provider_ref))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for {} reference {}", provider, provider_ref))
            })
    }

    async fn items_for(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    pub async fn view(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let items = self.items_for(order.id).await?;
        Ok(OrderView::build(order, items))
    }

    /// Guest orders are visible to anyone holding the order number; owned orders
    /// only to their owner and admins.
    #[instrument(skip(self, identity))]
    pub async fn get_for(
        &self,
        identity: &Identity,
        order_number: &str,
    ) -> Result<OrderView, ServiceError> {
        let order = self.find_by_number(order_number).await?;
        let visible = match order.user_id {
            None => true,
            Some(owner) => identity.is_admin() || identity.user_id() == Some(owner),
        };
        if !visible {
            // Same answer as a missing order so numbers cannot be enumerated
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_number
            )));
        }
        self.view(order).await
    }

    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        query: OrderListQuery,
    ) -> Result<OrderPage, ServiceError> {
        self.list(Some(user_id), query).await
    }

    /// Back-office listing, optionally filtered by status
    #[instrument(skip(self))]
    pub async fn admin_list(&self, query: OrderListQuery) -> Result<OrderPage, ServiceError> {
        self.list(None, query).await
    }

    async fn list(
        &self,
        user_id: Option<Uuid>,
        query: OrderListQuery,
    ) -> Result<OrderPage, ServiceError> {
        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let page = query.page.unwrap_or(1).max(1);

        let mut select = OrderEntity::find();
        if let Some(user_id) = user_id {
            select = select.filter(order::Column::UserId.eq(user_id));
        }
        if let Some(status) = query.status {
            select = select.filter(order::Column::OrderStatus.eq(status));
        }

        let paginator = select
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let mut items = Vec::with_capacity(orders.len());
        for order in orders {
            items.push(self.view(order).await?);
        }

        Ok(OrderPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Admin status change. Cancelled and delivered orders are final.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        let order = self.find_by_id(order_id).await?;
        let old_status = order.order_status;

        if old_status == new_status {
            return self.view(order).await;
        }
        if matches!(old_status, OrderStatus::Cancelled | OrderStatus::Delivered) {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {} and cannot change",
                order.order_number, old_status
            )));
        }
        if new_status == OrderStatus::Confirmed && order.payment_status != PaymentStatus::Completed
        {
            return Err(ServiceError::InvalidStatus(
                "only paid orders can be confirmed".to_string(),
            ));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::OrderStatus, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::OrderStatus.eq(old_status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "order status changed concurrently, reload and retry".to_string(),
            ));
        }

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        info!(%order_id, %old_status, %new_status, "order status updated");

        let order = self.find_by_id(order_id).await?;
        self.view(order).await
    }

    /// Commits stock for a paid order and moves it to `confirmed`.
    ///
    /// Every variant is decremented with `quantity = quantity - n WHERE quantity >= n`
    /// inside one transaction; if any line cannot be covered the whole commit rolls
    /// back with `InsufficientStock`. Calling this twice is harmless.
    #[instrument(skip(self))]
    pub async fn confirm_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.find_by_id(order_id).await?;
        if order.stock_committed {
            return Ok(order);
        }
        if order.payment_status != PaymentStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is not paid",
                order.order_number
            )));
        }
        if order.order_status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {}, expected pending",
                order.order_number, order.order_status
            )));
        }

        let items = self.items_for(order_id).await?;
        let now = Utc::now();
        let txn = self.db.begin().await?;

        // Claim the order first so a concurrent confirm cannot double-decrement
        let claimed = OrderEntity::update_many()
            .col_expr(order::Column::StockCommitted, Expr::value(true))
            .col_expr(order::Column::OrderStatus, Expr::value(OrderStatus::Confirmed))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::StockCommitted.eq(false))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            let current = self.find_by_id(order_id).await?;
            if current.stock_committed {
                return Ok(current);
            }
            return Err(ServiceError::InvalidStatus(format!(
                "order {} is {}, expected pending",
                current.order_number, current.order_status
            )));
        }

        for item in &items {
            let updated = ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Quantity,
                    Expr::col(product_variant::Column::Quantity).sub(item.quantity),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::ProductId.eq(item.product_id))
                .filter(product_variant::Column::Label.eq(item.weight.as_str()))
                .filter(product_variant::Column::Quantity.gte(item.quantity))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                txn.rollback().await?;
                warn!(
                    %order_id,
                    product_id = %item.product_id,
                    variant = %item.weight,
                    requested = item.quantity,
                    "not enough stock to commit order"
                );
                return Err(ServiceError::InsufficientStock(format!(
                    "{} ({}) cannot cover quantity {}",
                    item.name, item.weight, item.quantity
                )));
            }
        }
        txn.commit().await?;

        for item in &items {
            if let Ok(Some(variant)) = ProductVariant::find()
                .filter(product_variant::Column::ProductId.eq(item.product_id))
                .filter(product_variant::Column::Label.eq(item.weight.as_str()))
                .one(&*self.db)
                .await
            {
                self.event_sender
                    .send_or_log(Event::VariantStockChanged {
                        product_id: variant.product_id,
                        label: variant.label,
                        quantity: variant.quantity,
                    })
                    .await;
            }
        }
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: OrderStatus::Pending.to_string(),
                new_status: OrderStatus::Confirmed.to_string(),
            })
            .await;
        info!(%order_id, "order confirmed and stock committed");

        self.find_by_id(order_id).await
    }
}
