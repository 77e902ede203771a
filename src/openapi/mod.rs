use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Larder API",
        version = "1.0.0",
        description = r#"
# Larder storefront API

Catalog, carts, wishlists, checkout and payments for a packaged-foods store, plus the back office.

## Authentication

Sign in through `POST /api/v1/auth/login`. The token comes back in the body and as an HttpOnly
`token` cookie; either works:

```
Authorization: Bearer <token>
```

Shoppers who have not signed in keep their cart under `/api/v1/guest/{device_id}`. Passing that
`device_id` at login (or to `POST /api/v1/cart/sync`) merges it into the account.

## Errors

```json
{
  "error": "Conflict",
  "message": "price of Toor Dal (500g) changed from 120 to 125",
  "request_id": "3f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration and sign-in"),
        (name = "products", description = "Catalog browsing and reviews"),
        (name = "cart", description = "Signed-in cart"),
        (name = "wishlist", description = "Signed-in wishlist"),
        (name = "guest", description = "Device-scoped cart and wishlist"),
        (name = "orders", description = "Checkout and order history"),
        (name = "payments", description = "Razorpay, PhonePe and Stripe"),
        (name = "account", description = "Saved addresses"),
        (name = "admin", description = "Back office")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::me,

        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::list_reviews,
        crate::handlers::products::post_review,

        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::set_item,
        crate::handlers::cart::remove_item,
        crate::handlers::cart::clear_cart,
        crate::handlers::cart::sync_cart,

        crate::handlers::wishlist::get_wishlist,
        crate::handlers::wishlist::add_to_wishlist,
        crate::handlers::wishlist::remove_from_wishlist,
        crate::handlers::wishlist::sync_wishlist,

        crate::handlers::guest::get_cart,
        crate::handlers::guest::put_cart,
        crate::handlers::guest::delete_cart,
        crate::handlers::guest::get_wishlist,
        crate::handlers::guest::put_wishlist,
        crate::handlers::guest::delete_wishlist,

        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,

        crate::handlers::payments::create_session,
        crate::handlers::payments::verify,
        crate::handlers::payments::webhook,

        crate::handlers::account::list_addresses,
        crate::handlers::account::add_address,
        crate::handlers::account::set_default_address,
        crate::handlers::account::delete_address,

        crate::handlers::admin::create_product,
        crate::handlers::admin::update_product,
        crate::handlers::admin::delete_product,
        crate::handlers::admin::upsert_variant,
        crate::handlers::admin::delete_variant,
        crate::handlers::admin::list_orders,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::list_users,
        crate::handlers::admin::set_user_role,
        crate::handlers::admin::clear_guest_sessions,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::user::UserRole,
            crate::services::commerce::StockStatus,
            crate::services::payments::PaymentProvider,
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_storefront_routes() {
        let doc = ApiDocV1::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/api/v1/orders"));
        assert!(paths.contains_key("/api/v1/guest/{device_id}/cart"));
        assert!(paths.contains_key("/api/v1/payments/{provider}/webhook"));
        assert!(paths.contains_key("/api/v1/admin/users/{id}/role"));
    }

    #[test]
    fn document_serializes() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("bearer_auth"));
    }
}
