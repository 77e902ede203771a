use crate::{
    entities::commerce::{product, product_variant, Product, ProductModel, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::pricing_service::{
        CatalogSnapshot, PricingConfig, StockStatus, MAX_UNIT_PRICE,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

/// Product catalog: storefront reads and back-office writes
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingConfig,
}

impl ProductCatalogService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
        }
    }

    /// Paged storefront listing
    #[instrument(skip(self))]
    pub async fn list_products(&self, query: ProductQuery) -> Result<ProductPage, ServiceError> {
        let mut condition = Condition::all();
        if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
            condition = condition.add(product::Column::Category.eq(category));
        }
        if let Some(featured) = query.featured {
            condition = condition.add(product::Column::IsFeatured.eq(featured));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            condition = condition.add(
                Condition::any()
                    .add(product::Column::Name.contains(search))
                    .add(product::Column::Tags.contains(search))
                    .add(product::Column::Brand.contains(search)),
            );
        }

        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let page = query.page.unwrap_or(1).max(1);

        let paginator = Product::find()
            .filter(condition)
            .order_by_desc(product::Column::CreatedAt)
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;
        let items = self.attach_variants(products).await?;

        Ok(ProductPage {
            items,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Result<ProductView, ServiceError> {
        let product = Product::find()
            .filter(product::Column::Slug.eq(slug))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", slug)))?;
        self.view(product).await
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    pub async fn get_product_view(&self, product_id: Uuid) -> Result<ProductView, ServiceError> {
        let product = self.get_product(product_id).await?;
        self.view(product).await
    }

    #[instrument(skip(self))]
    pub async fn get_variant(
        &self,
        product_id: Uuid,
        label: &str,
    ) -> Result<product_variant::Model, ServiceError> {
        ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .filter(product_variant::Column::Label.eq(label))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Variant {} of product {} not found",
                    label, product_id
                ))
            })
    }

    /// Price/stock lookup for the given products; unknown ids are simply absent.
    #[instrument(skip(self, product_ids))]
    pub async fn snapshot_for(&self, product_ids: &[Uuid]) -> Result<CatalogSnapshot, ServiceError> {
        let ids: Vec<Uuid> = product_ids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(CatalogSnapshot::new());
        }

        let products = Product::find()
            .filter(product::Column::Id.is_in(ids.clone()))
            .all(&*self.db)
            .await?;
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.is_in(ids))
            .all(&*self.db)
            .await?;

        let mut by_product: HashMap<Uuid, Vec<product_variant::Model>> = HashMap::new();
        for variant in variants {
            by_product.entry(variant.product_id).or_default().push(variant);
        }

        Ok(CatalogSnapshot::from_catalog(products.iter().map(|p| {
            (
                p,
                by_product
                    .get(&p.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
            )
        })))
    }

    /// Create a product together with its initial variants
    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(&self, input: CreateProductInput) -> Result<ProductView, ServiceError> {
        input.validate()?;
        validate_variants(&input.variants)?;
        self.ensure_unique("sku", product::Column::Sku, &input.sku, None)
            .await?;
        let slug = input.slug.clone().unwrap_or_else(|| slugify(&input.name));
        self.ensure_unique("slug", product::Column::Slug, &slug, None)
            .await?;

        let product_id = Uuid::new_v4();
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let product = product::ActiveModel {
            id: Set(product_id),
            name: Set(input.name.trim().to_string()),
            slug: Set(slug),
            sku: Set(input.sku.clone()),
            description: Set(input.description.clone()),
            category: Set(input.category.clone()),
            brand: Set(input.brand.clone()),
            tags: Set(join_tags(&input.tags)),
            image_url: Set(input.image_url.clone()),
            is_featured: Set(input.is_featured),
            is_branded: Set(input.brand.is_some()),
            average_rating: Set(Decimal::ZERO),
            review_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for variant in &input.variants {
            product_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                label: Set(variant.label.trim().to_string()),
                price: Set(variant.price),
                quantity: Set(variant.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductCreated(product_id))
            .await;
        info!("Created product: {}", product_id);

        self.view(product).await
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        if let Some(ref sku) = input.sku {
            self.ensure_unique("sku", product::Column::Sku, sku, Some(product_id))
                .await?;
        }
        if let Some(ref slug) = input.slug {
            self.ensure_unique("slug", product::Column::Slug, slug, Some(product_id))
                .await?;
        }

        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();

        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(slug) = input.slug {
            active.slug = Set(slug);
        }
        if let Some(sku) = input.sku {
            active.sku = Set(sku);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(category) = input.category {
            active.category = Set(category);
        }
        if let Some(brand) = input.brand {
            let branded = !brand.trim().is_empty();
            active.brand = Set(branded.then_some(brand));
            active.is_branded = Set(branded);
        }
        if let Some(tags) = input.tags {
            active.tags = Set(join_tags(&tags));
        }
        if let Some(image_url) = input.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(is_featured) = input.is_featured {
            active.is_featured = Set(is_featured);
        }
        active.updated_at = Set(Utc::now());

        let product = active.update(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::ProductUpdated(product_id))
            .await;

        self.view(product).await
    }

    /// Deleting a product cascades to its variants, server carts and wishlists.
    /// Order snapshots are unaffected.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let result = Product::delete_by_id(product_id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }
        self.event_sender
            .send_or_log(Event::ProductDeleted(product_id))
            .await;
        info!("Deleted product {}", product_id);
        Ok(())
    }

    /// Create or replace the price and stock of a weight variant
    #[instrument(skip(self, input))]
    pub async fn upsert_variant(
        &self,
        product_id: Uuid,
        input: VariantInput,
    ) -> Result<product_variant::Model, ServiceError> {
        validate_variants(std::slice::from_ref(&input))?;
        self.get_product(product_id).await?;

        let label = input.label.trim().to_string();
        let now = Utc::now();
        let model = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            label: Set(label.clone()),
            price: Set(input.price),
            quantity: Set(input.quantity),
            created_at: Set(now),
            updated_at: Set(now),
        };

        ProductVariant::insert(model)
            .on_conflict(
                OnConflict::columns([
                    product_variant::Column::ProductId,
                    product_variant::Column::Label,
                ])
                .update_columns([
                    product_variant::Column::Price,
                    product_variant::Column::Quantity,
                    product_variant::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        let variant = self.get_variant(product_id, &label).await?;
        self.event_sender
            .send_or_log(Event::VariantStockChanged {
                product_id,
                label,
                quantity: variant.quantity,
            })
            .await;
        Ok(variant)
    }

    #[instrument(skip(self))]
    pub async fn delete_variant(&self, product_id: Uuid, label: &str) -> Result<(), ServiceError> {
        let result = ProductVariant::delete_many()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .filter(product_variant::Column::Label.eq(label))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Variant {} of product {} not found",
                label, product_id
            )));
        }
        info!("Deleted variant {} of {}", label, product_id);
        Ok(())
    }

    async fn view(&self, product: ProductModel) -> Result<ProductView, ServiceError> {
        let mut views = self.attach_variants(vec![product]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::InternalError("product view lost".to_string()))
    }

    async fn attach_variants(
        &self,
        products: Vec<ProductModel>,
    ) -> Result<Vec<ProductView>, ServiceError> {
        let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
        let variants = if ids.is_empty() {
            Vec::new()
        } else {
            ProductVariant::find()
                .filter(product_variant::Column::ProductId.is_in(ids))
                .order_by_asc(product_variant::Column::Price)
                .all(&*self.db)
                .await?
        };

        let mut by_product: HashMap<Uuid, Vec<product_variant::Model>> = HashMap::new();
        for variant in variants {
            by_product.entry(variant.product_id).or_default().push(variant);
        }

        Ok(products
            .into_iter()
            .map(|product| {
                let variants = by_product.remove(&product.id).unwrap_or_default();
                ProductView::build(product, variants, &self.pricing)
            })
            .collect())
    }

    async fn ensure_unique(
        &self,
        field: &str,
        column: product::Column,
        value: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut query = Product::find().filter(column.eq(value));
        if let Some(id) = exclude_id {
            query = query.filter(product::Column::Id.ne(id));
        }
        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "{} {} already exists",
                field, value
            )));
        }
        Ok(())
    }
}

fn validate_variants(variants: &[VariantInput]) -> Result<(), ServiceError> {
    let mut labels = HashSet::new();
    for v in variants {
        if v.label.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "variant label is required".into(),
            ));
        }
        if v.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "variant {} has a negative price",
                v.label
            )));
        }
        if v.price > MAX_UNIT_PRICE {
            return Err(ServiceError::ValidationError(format!(
                "variant {} price exceeds {}",
                v.label, MAX_UNIT_PRICE
            )));
        }
        if v.quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "variant {} has negative stock",
                v.label
            )));
        }
        if !labels.insert(v.label.trim().to_lowercase()) {
            return Err(ServiceError::ValidationError(format!(
                "duplicate variant label {}",
                v.label
            )));
        }
    }
    Ok(())
}

fn join_tags(tags: &[String]) -> Option<String> {
    let joined = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (!joined.is_empty()).then_some(joined)
}

/// URL slug from a display name: "Toor Dal (Unpolished)" -> "toor-dal-unpolished"
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub featured: Option<bool>,
    /// Matches name, brand or tags
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VariantInput {
    pub label: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    /// Derived from the name when omitted
    pub slug: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub brand: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub variants: Vec<VariantInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Empty string clears the brand
    pub brand: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub is_featured: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VariantView {
    pub label: String,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: String,
    pub brand: Option<String>,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub is_featured: bool,
    pub is_branded: bool,
    pub average_rating: Decimal,
    pub review_count: i32,
    pub variants: Vec<VariantView>,
    pub total_stock: i32,
    pub stock_status: StockStatus,
}

impl ProductView {
    pub fn build(
        product: ProductModel,
        variants: Vec<product_variant::Model>,
        pricing: &PricingConfig,
    ) -> Self {
        let total_stock = super::pricing_service::total_stock(&variants);
        let stock_status = pricing.stock_status(total_stock);
        let tags = product.tag_list();
        Self {
            id: product.id,
            name: product.name,
            slug: product.slug,
            sku: product.sku,
            description: product.description,
            category: product.category,
            brand: product.brand,
            tags,
            image_url: product.image_url,
            is_featured: product.is_featured,
            is_branded: product.is_branded,
            average_rating: product.average_rating,
            review_count: product.review_count,
            variants: variants
                .into_iter()
                .map(|v| VariantView {
                    label: v.label,
                    price: v.price,
                    quantity: v.quantity,
                })
                .collect(),
            total_stock,
            stock_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductPage {
    pub items: Vec<ProductView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Toor Dal (Unpolished)"), "toor-dal-unpolished");
        assert_eq!(slugify("  Ghee -- 1L  "), "ghee-1l");
        assert_eq!(slugify("Basmati"), "basmati");
    }

    #[test]
    fn join_tags_skips_blanks() {
        assert_eq!(
            join_tags(&["organic".into(), " ".into(), "lentils ".into()]).as_deref(),
            Some("organic,lentils")
        );
        assert_eq!(join_tags(&[]), None);
    }

    #[test]
    fn variant_validation() {
        let ok = VariantInput {
            label: "500g".into(),
            price: dec!(120),
            quantity: 10,
        };
        assert!(validate_variants(std::slice::from_ref(&ok)).is_ok());

        let negative = VariantInput {
            price: dec!(-1),
            ..ok.clone()
        };
        assert!(validate_variants(&[negative]).is_err());

        let overpriced = VariantInput {
            price: MAX_UNIT_PRICE + dec!(1),
            ..ok.clone()
        };
        assert!(validate_variants(&[overpriced]).is_err());

        let dup = VariantInput {
            label: "500G".into(),
            ..ok.clone()
        };
        assert!(validate_variants(&[ok, dup]).is_err());
    }

    #[test]
    fn product_view_derives_stock_status() {
        let now = Utc::now();
        let product = ProductModel {
            id: Uuid::new_v4(),
            name: "Jaggery".into(),
            slug: "jaggery".into(),
            sku: "JAG-1".into(),
            description: None,
            category: "sweeteners".into(),
            brand: None,
            tags: Some("organic, unrefined".into()),
            image_url: None,
            is_featured: false,
            is_branded: false,
            average_rating: Decimal::ZERO,
            review_count: 0,
            created_at: now,
            updated_at: now,
        };
        let variant = |label: &str, quantity| product_variant::Model {
            id: Uuid::new_v4(),
            product_id: product.id,
            label: label.into(),
            price: dec!(90),
            quantity,
            created_at: now,
            updated_at: now,
        };
        let view = ProductView::build(
            product.clone(),
            vec![variant("500g", 12), variant("1kg", 7)],
            &PricingConfig::default(),
        );
        assert_eq!(view.total_stock, 19);
        assert_eq!(view.stock_status, StockStatus::LowStock);
        assert_eq!(view.tags, vec!["organic", "unrefined"]);
    }
}
