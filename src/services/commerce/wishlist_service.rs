use crate::{
    entities::commerce::{product, wishlist_item, Product, WishlistItem},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Server-scope wishlist with set semantics
#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Result of adding one product to a wishlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WishlistAdd {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WishlistSyncResult {
    pub added: usize,
    pub already_present: usize,
    pub product_ids: Vec<Uuid>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        Ok(WishlistItem::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .order_by_asc(wishlist_item::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|row| row.product_id)
            .collect())
    }

    /// Idempotent; adding a product twice leaves one entry.
    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<WishlistAdd, ServiceError> {
        self.ensure_product(product_id).await?;
        let outcome = insert_wishlist_entry(&*self.db, user_id, product_id).await?;
        if outcome == WishlistAdd::Added {
            self.event_sender
                .send_or_log(Event::WishlistChanged(user_id))
                .await;
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = WishlistItem::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::WishlistChanged(user_id))
                .await;
        }
        Ok(())
    }

    /// Union of the stored wishlist and `product_ids`. Unknown products are skipped.
    #[instrument(skip(self, product_ids))]
    pub async fn sync(
        &self,
        user_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<WishlistSyncResult, ServiceError> {
        let mut result = WishlistSyncResult::default();
        for product_id in product_ids {
            if self.ensure_product(*product_id).await.is_err() {
                continue;
            }
            match insert_wishlist_entry(&*self.db, user_id, *product_id).await? {
                WishlistAdd::Added => result.added += 1,
                WishlistAdd::AlreadyPresent => result.already_present += 1,
            }
        }
        if result.added > 0 {
            self.event_sender
                .send_or_log(Event::WishlistChanged(user_id))
                .await;
        }
        result.product_ids = self.list(user_id).await?;
        Ok(result)
    }

    pub async fn ensure_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        Product::find()
            .filter(product::Column::Id.eq(product_id))
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}

/// `INSERT ... ON CONFLICT (user_id, product_id) DO NOTHING`
pub async fn insert_wishlist_entry<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> Result<WishlistAdd, ServiceError> {
    let model = wishlist_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id),
        created_at: Set(Utc::now()),
    };
    let inserted = WishlistItem::insert(model)
        .on_conflict(
            OnConflict::columns([wishlist_item::Column::UserId, wishlist_item::Column::ProductId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(if inserted > 0 {
        WishlistAdd::Added
    } else {
        WishlistAdd::AlreadyPresent
    })
}
