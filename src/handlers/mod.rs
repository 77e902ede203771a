pub mod account;
pub mod admin;
pub mod auth;
pub mod cart;
pub mod common;
pub mod guest;
pub mod orders;
pub mod payments;
pub mod products;
pub mod wishlist;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        commerce::{
            CartService, CheckoutService, GuestLimits, GuestSessionManager, GuestStore,
            InMemoryGuestStore, PricingConfig, ProductCatalogService, ReconciliationService, WishlistService,
        },
        orders::OrderService,
        payments::PaymentService,
        reviews::ReviewService,
        users::UserService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<ProductCatalogService>,
    pub cart: Arc<CartService>,
    pub wishlist: Arc<WishlistService>,
    pub guests: GuestSessionManager,
    pub reconciliation: Arc<ReconciliationService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub users: Arc<UserService>,
    pub reviews: Arc<ReviewService>,
}

impl AppServices {
    /// Wires every service with an in-memory guest store.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        Self::with_guest_store(
            db_pool,
            event_sender,
            auth_service,
            config,
            Arc::new(InMemoryGuestStore::with_limits(GuestLimits::from(config))),
        )
    }

    pub fn with_guest_store(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
        config: &AppConfig,
        guest_store: Arc<dyn GuestStore>,
    ) -> Result<Self, ServiceError> {
        let pricing = PricingConfig::from(config);

        let catalog = Arc::new(ProductCatalogService::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing.clone(),
        ));
        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            catalog.clone(),
            pricing.clone(),
        ));
        let wishlist = Arc::new(WishlistService::new(db_pool.clone(), event_sender.clone()));
        let guests = GuestSessionManager::new(guest_store, config.guest_max_items);
        let reconciliation = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            event_sender.clone(),
            guests.clone(),
            cart.clone(),
            wishlist.clone(),
            config.cart_merge_policy,
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            catalog.clone(),
            pricing,
            config.checkout_reprice,
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::from_config(
            db_pool.clone(),
            event_sender.clone(),
            orders.clone(),
            config,
        )?);
        let users = Arc::new(UserService::new(
            db_pool.clone(),
            event_sender.clone(),
            auth_service,
        ));
        let reviews = Arc::new(ReviewService::new(db_pool, event_sender));

        Ok(Self {
            catalog,
            cart,
            wishlist,
            guests,
            reconciliation,
            checkout,
            orders,
            payments,
            users,
            reviews,
        })
    }
}
