use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted by the storefront services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),
    VariantStockChanged {
        product_id: Uuid,
        label: String,
        quantity: i32,
    },

    // Server-scope cart and wishlist
    CartItemUpserted {
        user_id: Uuid,
        product_id: Uuid,
        variant_label: String,
        quantity: i32,
    },
    CartItemRemoved {
        user_id: Uuid,
        product_id: Uuid,
        variant_label: String,
    },
    CartCleared(Uuid),
    WishlistChanged(Uuid),

    /// Guest state merged into a user's server scope.
    GuestStateReconciled {
        user_id: Uuid,
        device_id: String,
        cart_merged: usize,
        cart_failed: usize,
        wishlist_added: usize,
    },

    // Orders
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    StockCommitFailed {
        order_id: Uuid,
        reason: String,
    },

    // Payments
    PaymentSessionCreated {
        order_id: Uuid,
        provider: String,
        provider_ref: String,
    },
    PaymentCompleted {
        order_id: Uuid,
        provider: String,
    },
    PaymentFailed {
        order_id: Uuid,
        provider: String,
    },

    // Accounts
    UserRegistered(Uuid),
    ReviewPosted {
        product_id: Uuid,
        rating: i32,
    },

    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentCompleted { order_id, provider } => {
                metrics::counter!("larder_payments_completed_total", 1);
                info!(%order_id, %provider, "payment completed");
            }
            Event::PaymentFailed { order_id, provider } => {
                metrics::counter!("larder_payments_failed_total", 1);
                warn!(%order_id, %provider, "payment failed");
            }
            Event::StockCommitFailed { order_id, reason } => {
                warn!(%order_id, %reason, "paid order could not reserve stock; needs manual review");
            }
            Event::VariantStockChanged {
                product_id,
                label,
                quantity,
            } if *quantity == 0 => {
                warn!(%product_id, %label, "variant is out of stock");
            }
            Event::GuestStateReconciled {
                user_id,
                cart_failed,
                ..
            } if *cart_failed > 0 => {
                warn!(%user_id, cart_failed, "guest reconciliation finished with failures");
            }
            _ => info!("Received event: {:?}", event),
        }
    }

    warn!("Event processing loop has ended");
}
