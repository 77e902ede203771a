use crate::{
    config::CartMergePolicy,
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        cart_service::CartService,
        guest_session::GuestSessionManager,
        wishlist_service::{insert_wishlist_entry, WishlistAdd, WishlistService},
    },
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Outcome of folding one device's guest state into a user's server scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationReport {
    pub cart_merged: usize,
    pub cart_failed: usize,
    pub wishlist_added: usize,
    pub wishlist_already_present: usize,
    pub wishlist_failed: usize,
    /// True when the guest cart and wishlist were both emptied
    pub guest_cleared: bool,
}

/// Merges guest cart and wishlist into the server scope at sign-in.
///
/// Entries merge one at a time and independently: a bad entry is logged and
/// skipped, never aborting the pass. Guest state is only dropped once at least
/// one entry has landed, so a pass that fails outright can be retried.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    guests: GuestSessionManager,
    cart: Arc<CartService>,
    wishlist: Arc<WishlistService>,
    policy: CartMergePolicy,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        guests: GuestSessionManager,
        cart: Arc<CartService>,
        wishlist: Arc<WishlistService>,
        policy: CartMergePolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            guests,
            cart,
            wishlist,
            policy,
        }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<ReconciliationReport, ServiceError> {
        let session = self.guests.session(device_id)?;
        let guest_cart = session.cart().await?;
        let guest_wishlist = session.wishlist().await?;

        // Nothing is touched if the server side is unreachable; guest state stays put.
        self.db.ping().await.map_err(|e| {
            warn!(error = %e, "server store unreachable; keeping guest state");
            ServiceError::ServiceUnavailable("cart storage is unavailable, try again".into())
        })?;

        let mut report = ReconciliationReport::default();

        for line in &guest_cart {
            match self.cart.merge_line(user_id, line, self.policy).await {
                Ok(quantity) => {
                    report.cart_merged += 1;
                    tracing::debug!(product_id = %line.product_id, variant = %line.variant_label, quantity, "merged guest cart line");
                }
                Err(e) => {
                    report.cart_failed += 1;
                    warn!(
                        product_id = %line.product_id,
                        variant = %line.variant_label,
                        error = %e,
                        "skipping guest cart line"
                    );
                }
            }
        }

        for product_id in &guest_wishlist {
            let merged = match self.wishlist.ensure_product(*product_id).await {
                Ok(()) => insert_wishlist_entry(&*self.db, user_id, *product_id).await,
                Err(e) => Err(e),
            };
            match merged {
                Ok(WishlistAdd::Added) => report.wishlist_added += 1,
                Ok(WishlistAdd::AlreadyPresent) => report.wishlist_already_present += 1,
                Err(e) => {
                    report.wishlist_failed += 1;
                    warn!(%product_id, error = %e, "skipping guest wishlist entry");
                }
            }
        }

        let cart_done = report.cart_merged > 0 || guest_cart.is_empty();
        let wishlist_done = report.wishlist_added + report.wishlist_already_present > 0
            || guest_wishlist.is_empty();

        if cart_done && !guest_cart.is_empty() {
            session.clear_cart().await?;
        }
        if wishlist_done && !guest_wishlist.is_empty() {
            session.clear_wishlist().await?;
        }
        report.guest_cleared = cart_done && wishlist_done;

        if report.wishlist_added > 0 {
            self.event_sender
                .send_or_log(Event::WishlistChanged(user_id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::GuestStateReconciled {
                user_id,
                device_id: device_id.to_string(),
                cart_merged: report.cart_merged,
                cart_failed: report.cart_failed,
                wishlist_added: report.wishlist_added,
            })
            .await;

        info!(
            %user_id,
            cart_merged = report.cart_merged,
            cart_failed = report.cart_failed,
            wishlist_added = report.wishlist_added,
            guest_cleared = report.guest_cleared,
            "guest state reconciled"
        );
        Ok(report)
    }
}
