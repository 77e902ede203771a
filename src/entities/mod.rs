//! sea-orm entities for the storefront schema.

pub mod commerce;
pub mod order;
pub mod order_item;
pub mod user;
pub mod user_address;

pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use user::{Entity as User, Model as UserModel, UserRole};
pub use user_address::{Entity as UserAddress, Model as UserAddressModel};
