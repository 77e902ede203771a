use crate::{
    auth::{
        password::{hash_password, verify_password, PasswordPolicy},
        AuthError, AuthService, IssuedToken,
    },
    entities::{
        user::{self, UserRole},
        user_address, User, UserAddress, UserAddressModel, UserModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginInput {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    /// Guest device whose cart and wishlist should fold into the account
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Public shape of an account; never includes the password hash
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for UserView {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_verified: user.is_verified,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserView,
    pub token: IssuedToken,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPage {
    pub items: Vec<UserView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_country() -> String {
    "IN".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressView {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub is_default: bool,
    /// Ready to paste into a checkout's `shipping_address`
    pub formatted: String,
}

impl From<UserAddressModel> for AddressView {
    fn from(address: UserAddressModel) -> Self {
        let formatted = address.to_single_line();
        Self {
            id: address.id,
            full_name: address.full_name,
            phone: address.phone,
            line1: address.line1,
            line2: address.line2,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            country: address.country,
            is_default: address.is_default,
            formatted,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accounts, credentials and saved addresses
#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    auth: Arc<AuthService>,
    policy: PasswordPolicy,
}

impl UserService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        auth: Arc<AuthService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            auth,
            policy: PasswordPolicy::default(),
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<AuthResponse, ServiceError> {
        input.validate()?;
        self.policy
            .validate(&input.password)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        let user = self
            .create_user(&input.name, &input.email, &input.password, UserRole::User)
            .await?;
        let token = self.auth.generate_token(&user)?;
        Ok(AuthResponse {
            user: user.into(),
            token,
        })
    }

    /// Inserts an account with a hashed password. Duplicate emails are `Conflict`.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<UserModel, ServiceError> {
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.trim().to_string()),
            email: Set(email.clone()),
            password_hash: Set(Some(password_hash)),
            oauth_subject: Set(None),
            role: Set(role),
            is_verified: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let user = model.insert(&*self.db).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::Conflict(format!("An account for {} already exists", email))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        self.event_sender
            .send_or_log(Event::UserRegistered(user.id))
            .await;
        info!(user_id = %user.id, %role, "account created");
        Ok(user)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput) -> Result<AuthResponse, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let user = User::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        if let Err(e) = verify_password(&input.password, hash) {
            warn!(user_id = %user.id, "failed login attempt");
            return Err(e.into());
        }
        let token = self.auth.generate_token(&user)?;
        Ok(AuthResponse {
            user: user.into(),
            token,
        })
    }

    pub async fn get(&self, user_id: Uuid) -> Result<UserModel, ServiceError> {
        User::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, ServiceError> {
        Ok(User::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, query: UserListQuery) -> Result<UserPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let paginator = User::find()
            .order_by_asc(user::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(UserView::from)
            .collect();
        Ok(UserPage {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Takes effect the next time the user is issued a token.
    #[instrument(skip(self))]
    pub async fn set_role(&self, user_id: Uuid, role: UserRole) -> Result<UserView, ServiceError> {
        let user = self.get(user_id).await?;
        if user.role == role {
            return Ok(user.into());
        }
        let old_role = user.role;
        let mut active: user::ActiveModel = user.into();
        active.role = Set(role);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        info!(%user_id, %old_role, new_role = %role, "user role changed");
        Ok(updated.into())
    }

    // Addresses

    pub async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<AddressView>, ServiceError> {
        Ok(UserAddress::find()
            .filter(user_address::Column::UserId.eq(user_id))
            .order_by_desc(user_address::Column::IsDefault)
            .order_by_asc(user_address::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(AddressView::from)
            .collect())
    }

    /// The first saved address becomes the default regardless of the flag.
    #[instrument(skip(self, input))]
    pub async fn add_address(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<AddressView, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;
        let existing = UserAddress::find()
            .filter(user_address::Column::UserId.eq(user_id))
            .count(&txn)
            .await?;
        let is_default = input.is_default || existing == 0;
        if is_default {
            UserAddress::update_many()
                .col_expr(user_address::Column::IsDefault, Expr::value(false))
                .filter(user_address::Column::UserId.eq(user_id))
                .exec(&txn)
                .await?;
        }
        let address = user_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            full_name: Set(input.full_name.trim().to_string()),
            phone: Set(input.phone.filter(|p| !p.trim().is_empty())),
            line1: Set(input.line1.trim().to_string()),
            line2: Set(input.line2.filter(|l| !l.trim().is_empty())),
            city: Set(input.city.trim().to_string()),
            state: Set(input.state.trim().to_string()),
            postal_code: Set(input.postal_code.trim().to_string()),
            country: Set(input.country.trim().to_uppercase()),
            is_default: Set(is_default),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(address.into())
    }

    /// Clears every other default in the same transaction.
    #[instrument(skip(self))]
    pub async fn set_default_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressView, ServiceError> {
        let txn = self.db.begin().await?;
        let address = UserAddress::find_by_id(address_id)
            .filter(user_address::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        UserAddress::update_many()
            .col_expr(user_address::Column::IsDefault, Expr::value(false))
            .filter(user_address::Column::UserId.eq(user_id))
            .filter(user_address::Column::Id.ne(address_id))
            .exec(&txn)
            .await?;
        let mut active: user_address::ActiveModel = address.into();
        active.is_default = Set(true);
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated.into())
    }

    /// Deleting the default promotes the oldest remaining address.
    #[instrument(skip(self))]
    pub async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let address = UserAddress::find_by_id(address_id)
            .filter(user_address::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;
        let was_default = address.is_default;
        UserAddress::delete_by_id(address.id).exec(&txn).await?;

        if was_default {
            if let Some(next) = UserAddress::find()
                .filter(user_address::Column::UserId.eq(user_id))
                .order_by_asc(user_address::Column::CreatedAt)
                .one(&txn)
                .await?
            {
                let mut active: user_address::ActiveModel = next.into();
                active.is_default = Set(true);
                active.update(&txn).await?;
            }
        }
        txn.commit().await?;
        Ok(())
    }
}
