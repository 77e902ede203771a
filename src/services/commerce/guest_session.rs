use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{cart_service::MAX_LINE_QUANTITY, pricing_service::CartLine};
use crate::{config::AppConfig, errors::ServiceError};

const MAX_DEVICE_ID_LEN: usize = 128;

/// How often the idle sweeper walks the in-memory store
pub const GUEST_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Everything an anonymous device holds before its owner signs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GuestState {
    pub cart: Vec<CartLine>,
    pub wishlist: Vec<Uuid>,
}

/// Bounds on the guest store so anonymous traffic cannot grow it without limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestLimits {
    pub max_devices: usize,
    /// Applies to the cart and the wishlist separately
    pub max_items: usize,
    pub idle_ttl: Duration,
}

impl Default for GuestLimits {
    fn default() -> Self {
        Self {
            max_devices: 10_000,
            max_items: 100,
            idle_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl From<&AppConfig> for GuestLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_devices: config.guest_max_devices,
            max_items: config.guest_max_items,
            idle_ttl: Duration::from_secs(config.guest_idle_ttl_secs),
        }
    }
}

/// Storage for guest state, keyed by device id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuestStore: Send + Sync {
    async fn get(&self, device_id: &str) -> Result<GuestState, ServiceError>;
    async fn put(&self, device_id: &str, state: GuestState) -> Result<(), ServiceError>;
    async fn delete(&self, device_id: &str) -> Result<(), ServiceError>;
    /// Drops every device's state
    async fn clear(&self) -> Result<(), ServiceError>;
    /// Drops devices idle past the store's TTL, returning how many went
    async fn evict_idle(&self) -> Result<usize, ServiceError>;
}

#[derive(Debug)]
struct StoredGuest {
    state: GuestState,
    touched: Instant,
}

/// Process-local guest store. Entries expire after `idle_ttl` without activity
/// and the stalest device is evicted once `max_devices` is reached.
#[derive(Debug)]
pub struct InMemoryGuestStore {
    devices: DashMap<String, StoredGuest>,
    limits: GuestLimits,
}

impl Default for InMemoryGuestStore {
    fn default() -> Self {
        Self::with_limits(GuestLimits::default())
    }
}

impl InMemoryGuestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: GuestLimits) -> Self {
        Self {
            devices: DashMap::new(),
            limits,
        }
    }

    fn is_idle(&self, stored: &StoredGuest, now: Instant) -> bool {
        now.saturating_duration_since(stored.touched) >= self.limits.idle_ttl
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.devices.retain(|_, stored| {
            let keep = !self.is_idle(stored, now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    fn evict_stalest(&self) {
        let stalest = self
            .devices
            .iter()
            .min_by_key(|entry| entry.value().touched)
            .map(|entry| entry.key().clone());
        if let Some(device_id) = stalest {
            self.devices.remove(&device_id);
            debug!(device_id = %device_id, "guest store full, evicted stalest device");
        }
    }
}

#[async_trait]
impl GuestStore for InMemoryGuestStore {
    async fn get(&self, device_id: &str) -> Result<GuestState, ServiceError> {
        let now = Instant::now();
        if self
            .devices
            .remove_if(device_id, |_, stored| self.is_idle(stored, now))
            .is_some()
        {
            debug!(device_id, "guest state expired");
            return Ok(GuestState::default());
        }
        Ok(self
            .devices
            .get_mut(device_id)
            .map(|mut entry| {
                entry.touched = now;
                entry.state.clone()
            })
            .unwrap_or_default())
    }

    async fn put(&self, device_id: &str, state: GuestState) -> Result<(), ServiceError> {
        if state.cart.is_empty() && state.wishlist.is_empty() {
            self.devices.remove(device_id);
            return Ok(());
        }

        let now = Instant::now();
        if let Some(mut entry) = self.devices.get_mut(device_id) {
            entry.state = state;
            entry.touched = now;
            return Ok(());
        }

        if self.devices.len() >= self.limits.max_devices {
            self.evict_idle_at(now);
            while self.devices.len() >= self.limits.max_devices && !self.devices.is_empty() {
                self.evict_stalest();
            }
        }
        self.devices.insert(
            device_id.to_string(),
            StoredGuest {
                state,
                touched: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<(), ServiceError> {
        self.devices.remove(device_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), ServiceError> {
        self.devices.clear();
        Ok(())
    }

    async fn evict_idle(&self) -> Result<usize, ServiceError> {
        Ok(self.evict_idle_at(Instant::now()))
    }
}

/// Periodically drops idle guest devices. Runs until the task is aborted.
pub async fn run_idle_sweeper(store: Arc<dyn GuestStore>, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        match store.evict_idle().await {
            Ok(0) => debug!("guest sweep found nothing idle"),
            Ok(evicted) => info!(evicted, "evicted idle guest devices"),
            Err(e) => warn!("guest sweep failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestChangeKind {
    CartAdded,
    CartRemoved,
    CartCleared,
    WishlistAdded,
    WishlistRemoved,
    WishlistCleared,
}

/// Broadcast after every guest mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestStateChanged {
    pub device_id: String,
    pub kind: GuestChangeKind,
}

/// Hands out per-device sessions that share one store and one change channel.
#[derive(Clone)]
pub struct GuestSessionManager {
    store: Arc<dyn GuestStore>,
    changes: broadcast::Sender<GuestStateChanged>,
    max_items: usize,
}

impl GuestSessionManager {
    pub fn new(store: Arc<dyn GuestStore>, max_items: usize) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            store,
            changes,
            max_items,
        }
    }

    pub fn store(&self) -> Arc<dyn GuestStore> {
        self.store.clone()
    }

    pub fn session(&self, device_id: &str) -> Result<GuestSession, ServiceError> {
        validate_device_id(device_id)?;
        Ok(GuestSession {
            store: self.store.clone(),
            device_id: device_id.to_string(),
            changes: self.changes.clone(),
            max_items: self.max_items,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuestStateChanged> {
        self.changes.subscribe()
    }
}

pub fn validate_device_id(device_id: &str) -> Result<(), ServiceError> {
    let valid = !device_id.is_empty()
        && device_id.len() <= MAX_DEVICE_ID_LEN
        && device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "device id must be 1-{} characters of [A-Za-z0-9_-]",
            MAX_DEVICE_ID_LEN
        )))
    }
}

/// One device's guest cart and wishlist.
///
/// Cart adds replace any existing quantity for the same (product, variant); the
/// wishlist is a set. Each holds at most `max_items` entries.
pub struct GuestSession {
    store: Arc<dyn GuestStore>,
    device_id: String,
    changes: broadcast::Sender<GuestStateChanged>,
    max_items: usize,
}

impl GuestSession {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn notify(&self, kind: GuestChangeKind) {
        // No subscribers is fine
        let _ = self.changes.send(GuestStateChanged {
            device_id: self.device_id.clone(),
            kind,
        });
    }

    async fn load(&self) -> Result<GuestState, ServiceError> {
        self.store.get(&self.device_id).await
    }

    async fn save(&self, state: GuestState) -> Result<(), ServiceError> {
        self.store.put(&self.device_id, state).await
    }

    fn check_capacity(&self, what: &str, len: usize) -> Result<(), ServiceError> {
        if len > self.max_items {
            return Err(ServiceError::ValidationError(format!(
                "guest {} holds at most {} entries",
                what, self.max_items
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(device_id = %self.device_id))]
    pub async fn add_to_cart(
        &self,
        product_id: Uuid,
        variant_label: &str,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        validate_line(variant_label, quantity)?;

        let mut state = self.load().await?;
        match state
            .cart
            .iter_mut()
            .find(|l| l.product_id == product_id && l.variant_label == variant_label)
        {
            Some(existing) => existing.quantity = quantity,
            None => {
                self.check_capacity("cart", state.cart.len() + 1)?;
                state.cart.push(CartLine {
                    product_id,
                    variant_label: variant_label.to_string(),
                    quantity,
                });
            }
        }
        self.save(state).await?;
        self.notify(GuestChangeKind::CartAdded);
        Ok(())
    }

    /// Removing an absent entry is a no-op.
    #[instrument(skip(self), fields(device_id = %self.device_id))]
    pub async fn remove_from_cart(
        &self,
        product_id: Uuid,
        variant_label: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.load().await?;
        let before = state.cart.len();
        state
            .cart
            .retain(|l| !(l.product_id == product_id && l.variant_label == variant_label));
        if state.cart.len() != before {
            self.save(state).await?;
        } else {
            debug!("guest cart entry already absent");
        }
        self.notify(GuestChangeKind::CartRemoved);
        Ok(())
    }

    /// Owned snapshot; iterating it twice yields the same entries.
    pub async fn cart(&self) -> Result<Vec<CartLine>, ServiceError> {
        Ok(self.load().await?.cart)
    }

    pub async fn clear_cart(&self) -> Result<(), ServiceError> {
        let mut state = self.load().await?;
        state.cart.clear();
        self.save(state).await?;
        self.notify(GuestChangeKind::CartCleared);
        Ok(())
    }

    /// Replaces the whole guest cart with a client-held snapshot. Duplicate
    /// (product, variant) pairs collapse to the last one given.
    pub async fn replace_cart(&self, lines: Vec<CartLine>) -> Result<(), ServiceError> {
        for line in &lines {
            validate_line(&line.variant_label, line.quantity)?;
        }

        let mut deduped: Vec<CartLine> = Vec::with_capacity(lines.len());
        let mut index: HashMap<(Uuid, String), usize> = HashMap::with_capacity(lines.len());
        for line in lines {
            let key = (line.product_id, line.variant_label.clone());
            match index.get(&key) {
                Some(&at) => deduped[at].quantity = line.quantity,
                None => {
                    index.insert(key, deduped.len());
                    deduped.push(line);
                }
            }
        }
        self.check_capacity("cart", deduped.len())?;

        let mut state = self.load().await?;
        state.cart = deduped;
        self.save(state).await?;
        self.notify(GuestChangeKind::CartAdded);
        Ok(())
    }

    /// Idempotent
    pub async fn add_to_wishlist(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.load().await?;
        if !state.wishlist.contains(&product_id) {
            self.check_capacity("wishlist", state.wishlist.len() + 1)?;
            state.wishlist.push(product_id);
            self.save(state).await?;
        }
        self.notify(GuestChangeKind::WishlistAdded);
        Ok(())
    }

    pub async fn remove_from_wishlist(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.load().await?;
        let before = state.wishlist.len();
        state.wishlist.retain(|id| *id != product_id);
        if state.wishlist.len() != before {
            self.save(state).await?;
        }
        self.notify(GuestChangeKind::WishlistRemoved);
        Ok(())
    }

    pub async fn wishlist(&self) -> Result<Vec<Uuid>, ServiceError> {
        Ok(self.load().await?.wishlist)
    }

    pub async fn clear_wishlist(&self) -> Result<(), ServiceError> {
        let mut state = self.load().await?;
        state.wishlist.clear();
        self.save(state).await?;
        self.notify(GuestChangeKind::WishlistCleared);
        Ok(())
    }

    pub async fn replace_wishlist(&self, product_ids: Vec<Uuid>) -> Result<(), ServiceError> {
        let mut seen = HashSet::with_capacity(product_ids.len());
        let unique: Vec<Uuid> = product_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        self.check_capacity("wishlist", unique.len())?;
        let mut state = self.load().await?;
        state.wishlist = unique;
        self.save(state).await?;
        self.notify(GuestChangeKind::WishlistAdded);
        Ok(())
    }
}

fn validate_line(variant_label: &str, quantity: i32) -> Result<(), ServiceError> {
    if variant_label.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "variant label is required".to_string(),
        ));
    }
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be between 1 and {}",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn manager() -> GuestSessionManager {
        GuestSessionManager::new(Arc::new(InMemoryGuestStore::new()), 100)
    }

    fn state_with(product_id: Uuid) -> GuestState {
        GuestState {
            cart: vec![],
            wishlist: vec![product_id],
        }
    }

    #[tokio::test]
    async fn add_replaces_quantity_for_same_variant() {
        let session = manager().session("device-1").unwrap();
        let p1 = Uuid::new_v4();

        session.add_to_cart(p1, "500g", 2).await.unwrap();
        session.add_to_cart(p1, "500g", 5).await.unwrap();
        session.add_to_cart(p1, "1kg", 1).await.unwrap();

        let cart = session.cart().await.unwrap();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].quantity, 5);
        assert_eq!(cart[1].variant_label, "1kg");
    }

    #[tokio::test]
    async fn remove_of_absent_entry_is_noop() {
        let session = manager().session("device-1").unwrap();
        let p1 = Uuid::new_v4();
        session.add_to_cart(p1, "500g", 1).await.unwrap();

        session.remove_from_cart(p1, "2kg").await.unwrap();
        session.remove_from_cart(Uuid::new_v4(), "500g").await.unwrap();
        assert_eq!(session.cart().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let session = manager().session("device-1").unwrap();
        assert_matches!(
            session.add_to_cart(Uuid::new_v4(), "500g", 0).await,
            Err(ServiceError::ValidationError(_))
        );
        assert!(session.cart().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wishlist_add_is_idempotent() {
        let session = manager().session("device-1").unwrap();
        let p1 = Uuid::new_v4();
        session.add_to_wishlist(p1).await.unwrap();
        session.add_to_wishlist(p1).await.unwrap();
        assert_eq!(session.wishlist().await.unwrap(), vec![p1]);

        session.remove_from_wishlist(Uuid::new_v4()).await.unwrap();
        assert_eq!(session.wishlist().await.unwrap(), vec![p1]);
    }

    #[tokio::test]
    async fn devices_are_isolated_and_clear_is_scoped() {
        let manager = manager();
        let a = manager.session("device-a").unwrap();
        let b = manager.session("device-b").unwrap();
        a.add_to_cart(Uuid::new_v4(), "500g", 1).await.unwrap();
        b.add_to_cart(Uuid::new_v4(), "500g", 1).await.unwrap();

        a.clear_cart().await.unwrap();
        assert!(a.cart().await.unwrap().is_empty());
        assert_eq!(b.cart().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mutations_broadcast_change_notifications() {
        let manager = manager();
        let mut rx = manager.subscribe();
        let session = manager.session("device-n").unwrap();

        session.add_to_cart(Uuid::new_v4(), "500g", 1).await.unwrap();
        session.clear_wishlist().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.device_id, "device-n");
        assert_eq!(first.kind, GuestChangeKind::CartAdded);
        assert_eq!(rx.recv().await.unwrap().kind, GuestChangeKind::WishlistCleared);
    }

    #[test]
    fn device_id_format() {
        assert!(validate_device_id("b9f0-41aa_x").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("../etc").is_err());
        assert!(validate_device_id(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn replace_cart_collapses_duplicates() {
        let session = manager().session("device-r").unwrap();
        let p1 = Uuid::new_v4();
        session
            .replace_cart(vec![
                CartLine {
                    product_id: p1,
                    variant_label: "500g".into(),
                    quantity: 1,
                },
                CartLine {
                    product_id: p1,
                    variant_label: "500g".into(),
                    quantity: 4,
                },
            ])
            .await
            .unwrap();
        let cart = session.cart().await.unwrap();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 4);
    }

    #[tokio::test]
    async fn session_surfaces_store_failures() {
        let mut store = MockGuestStore::new();
        store
            .expect_get()
            .returning(|_| Err(ServiceError::ServiceUnavailable("store offline".into())));
        let manager = GuestSessionManager::new(Arc::new(store), 100);
        let session = manager.session("device-m").unwrap();
        assert_matches!(
            session.cart().await,
            Err(ServiceError::ServiceUnavailable(_))
        );
    }

    #[tokio::test]
    async fn full_store_evicts_the_stalest_device() {
        let store = InMemoryGuestStore::with_limits(GuestLimits {
            max_devices: 2,
            ..GuestLimits::default()
        });
        let (p1, p2, p3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.put("device-a", state_with(p1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.put("device-b", state_with(p2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.put("device-c", state_with(p3)).await.unwrap();

        assert_eq!(store.devices.len(), 2);
        assert!(store.get("device-a").await.unwrap().wishlist.is_empty());
        assert_eq!(store.get("device-b").await.unwrap().wishlist, vec![p2]);
        assert_eq!(store.get("device-c").await.unwrap().wishlist, vec![p3]);
    }

    #[tokio::test]
    async fn idle_devices_expire() {
        let store = InMemoryGuestStore::with_limits(GuestLimits {
            idle_ttl: Duration::ZERO,
            ..GuestLimits::default()
        });
        store.put("device-a", state_with(Uuid::new_v4())).await.unwrap();
        store.put("device-b", state_with(Uuid::new_v4())).await.unwrap();

        assert_eq!(store.get("device-a").await.unwrap(), GuestState::default());
        assert_eq!(store.evict_idle().await.unwrap(), 1);
        assert!(store.devices.is_empty());
    }

    #[tokio::test]
    async fn active_devices_survive_the_sweep() {
        let store = InMemoryGuestStore::new();
        store.put("device-a", state_with(Uuid::new_v4())).await.unwrap();
        assert_eq!(store.evict_idle().await.unwrap(), 0);
        assert_eq!(store.devices.len(), 1);
    }

    #[tokio::test]
    async fn entry_count_is_capped_per_device() {
        let manager = GuestSessionManager::new(Arc::new(InMemoryGuestStore::new()), 2);
        let session = manager.session("device-cap").unwrap();
        let p1 = Uuid::new_v4();

        session.add_to_cart(p1, "500g", 1).await.unwrap();
        session.add_to_cart(p1, "1kg", 1).await.unwrap();
        assert_matches!(
            session.add_to_cart(p1, "2kg", 1).await,
            Err(ServiceError::ValidationError(_))
        );
        // Updating an existing line is still allowed at the cap
        session.add_to_cart(p1, "1kg", 3).await.unwrap();
        assert_eq!(session.cart().await.unwrap().len(), 2);

        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        assert_matches!(
            session.replace_wishlist(ids.clone()).await,
            Err(ServiceError::ValidationError(_))
        );
        session.add_to_wishlist(ids[0]).await.unwrap();
        session.add_to_wishlist(ids[1]).await.unwrap();
        assert_matches!(
            session.add_to_wishlist(ids[2]).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(session.wishlist().await.unwrap(), vec![ids[0], ids[1]]);
    }

    #[tokio::test]
    async fn quantity_above_line_limit_is_rejected() {
        let session = manager().session("device-q").unwrap();
        assert_matches!(
            session.add_to_cart(Uuid::new_v4(), "500g", MAX_LINE_QUANTITY + 1).await,
            Err(ServiceError::ValidationError(_))
        );
        session
            .add_to_cart(Uuid::new_v4(), "500g", MAX_LINE_QUANTITY)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_wishlist_keeps_first_occurrence_order() {
        let session = manager().session("device-w").unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        session.replace_wishlist(vec![b, a, b, a]).await.unwrap();
        assert_eq!(session.wishlist().await.unwrap(), vec![b, a]);
    }

    proptest! {
        #[test]
        fn adds_never_duplicate_pairs(ops in prop::collection::vec((0usize..3, 0usize..3, 1i32..10), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let products: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
            let labels = ["250g", "500g", "1kg"];

            rt.block_on(async {
                let session = manager().session("prop-device").unwrap();
                let mut expected = std::collections::HashMap::new();
                for (p, l, q) in &ops {
                    session.add_to_cart(products[*p], labels[*l], *q).await.unwrap();
                    expected.insert((products[*p], labels[*l].to_string()), *q);
                }

                let cart = session.cart().await.unwrap();
                let mut seen = std::collections::HashSet::new();
                for line in &cart {
                    prop_assert!(seen.insert((line.product_id, line.variant_label.clone())));
                    prop_assert_eq!(
                        expected.get(&(line.product_id, line.variant_label.clone())),
                        Some(&line.quantity)
                    );
                }
                prop_assert_eq!(cart.len(), expected.len());
                Ok(())
            })?;
        }
    }
}
