//! Storefront commerce: catalog, pricing, carts, wishlists, guest state and checkout
pub mod cart_service;
pub mod checkout_service;
pub mod guest_session;
pub mod pricing_service;
pub mod product_catalog_service;
pub mod reconciliation_service;
pub mod wishlist_service;

pub use cart_service::CartService;
pub use checkout_service::{CheckoutRequest, CheckoutResult, CheckoutService};
pub use guest_session::{
    GuestLimits, GuestSession, GuestSessionManager, GuestStore, InMemoryGuestStore,
};
pub use pricing_service::{CartLine, PricedCart, PricingConfig, StockStatus};
pub use product_catalog_service::ProductCatalogService;
pub use reconciliation_service::{ReconciliationReport, ReconciliationService};
pub use wishlist_service::WishlistService;
