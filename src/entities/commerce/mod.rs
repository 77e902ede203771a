/// Catalog, server-scope cart/wishlist and review entities
pub mod cart_item;
pub mod product;
pub mod product_variant;
pub mod review;
pub mod wishlist_item;

// Re-export entities
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use review::{Entity as Review, Model as ReviewModel};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
