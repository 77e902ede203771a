use crate::{
    entities::commerce::{product, review, Product, Review, ReviewModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReviewInput {
    /// 1 to 5
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ReviewModel> for ReviewView {
    fn from(review: ReviewModel) -> Self {
        Self {
            id: review.id,
            product_id: review.product_id,
            user_id: review.user_id,
            rating: review.rating,
            comment: review.comment,
            created_at: review.created_at,
        }
    }
}

/// Mean of `ratings` to two places; zero when there are none.
pub fn average_rating(ratings: &[i32]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    (Decimal::from(sum) / Decimal::from(ratings.len())).round_dp(2)
}

#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn list_for_product(&self, product_id: Uuid) -> Result<Vec<ReviewView>, ServiceError> {
        Ok(Review::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(ReviewView::from)
            .collect())
    }

    /// One review per user and product; the product's rating summary is
    /// recomputed in the same transaction.
    #[instrument(skip(self, input), fields(rating = input.rating))]
    pub async fn post(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: ReviewInput,
    ) -> Result<ReviewView, ServiceError> {
        if !(1..=5).contains(&input.rating) {
            return Err(ServiceError::ValidationError(
                "rating must be between 1 and 5".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let duplicate = Review::find()
            .filter(review::Column::ProductId.eq(product_id))
            .filter(review::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(
                "you have already reviewed this product".into(),
            ));
        }

        let created = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            user_id: Set(user_id),
            rating: Set(input.rating),
            comment: Set(input.comment.filter(|c| !c.trim().is_empty())),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        refresh_rating(&txn, product).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReviewPosted {
                product_id,
                rating: created.rating,
            })
            .await;
        info!(%product_id, %user_id, "review posted");
        Ok(created.into())
    }
}

async fn refresh_rating<C: ConnectionTrait>(
    db: &C,
    product: product::Model,
) -> Result<(), ServiceError> {
    let ratings: Vec<i32> = Review::find()
        .filter(review::Column::ProductId.eq(product.id))
        .all(db)
        .await?
        .into_iter()
        .map(|r| r.rating)
        .collect();
    let mut active: product::ActiveModel = product.into();
    active.average_rating = Set(average_rating(&ratings));
    active.review_count = Set(ratings.len() as i32);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}
