//! Contracts for the external state containers the SDK consumes (cart,
//! campaign catalog, profiles, checkout, attribution) and in-memory
//! implementations of each for hosts, the CLI and tests.
//!
//! Stores are the single source of truth: consumers read snapshots and
//! mutate only through the action methods.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{CartError, CartResult};
use crate::event_bus::{EventBus, SdkEvent};
use crate::types::{
    AddItemRequest, AttributionData, CartItem, CartState, CartTotals, CheckoutSnapshot,
    PackageData, PackageId, PackageProfile, ShippingMethod,
};

pub trait CampaignStore: Send + Sync {
    fn package(&self, ref_id: PackageId) -> Option<PackageData>;
    fn currency(&self) -> String;
    fn store_name(&self) -> Option<String>;
    fn shipping_methods(&self) -> Vec<ShippingMethod>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    fn state(&self) -> CartState;

    fn has_item(&self, package_id: PackageId) -> bool {
        self.state().has_item(package_id)
    }

    fn item(&self, package_id: PackageId) -> Option<CartItem> {
        self.state().item(package_id).cloned()
    }

    async fn add_item(&self, request: AddItemRequest) -> CartResult<()>;
    async fn remove_item(&self, package_id: PackageId) -> CartResult<()>;
    /// Set a line's quantity; zero removes the line.
    async fn update_quantity(&self, package_id: PackageId, quantity: u32) -> CartResult<()>;
    /// Replace the line for `old_id` with `request` in one state transition.
    async fn swap_package(&self, old_id: PackageId, request: AddItemRequest) -> CartResult<()>;
    async fn set_shipping_method(&self, shipping_id: u32) -> CartResult<()>;

    /// Change notifications; the receiver always holds the latest state.
    fn subscribe(&self) -> watch::Receiver<CartState>;
}

pub trait ProfileStore: Send + Sync {
    fn active_profile(&self) -> Option<PackageProfile>;

    fn mapped_package_id(&self, package_id: PackageId) -> PackageId {
        self.active_profile()
            .map_or(package_id, |p| p.map(package_id))
    }

    fn original_package_id(&self, package_id: PackageId) -> Option<PackageId> {
        self.active_profile().and_then(|p| p.reverse(package_id))
    }
}

pub trait CheckoutStore: Send + Sync {
    fn snapshot(&self) -> CheckoutSnapshot;
}

pub trait AttributionStore: Send + Sync {
    fn attribution_for_api(&self) -> Option<AttributionData>;
}

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

pub struct InMemoryCampaignStore {
    packages: RwLock<HashMap<PackageId, PackageData>>,
    currency: String,
    store_name: Option<String>,
    shipping_methods: Vec<ShippingMethod>,
}

impl InMemoryCampaignStore {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            packages: RwLock::new(HashMap::new()),
            currency: currency.into(),
            store_name: None,
            shipping_methods: Vec::new(),
        }
    }

    pub fn with_packages(mut self, packages: impl IntoIterator<Item = PackageData>) -> Self {
        self.packages
            .get_mut()
            .extend(packages.into_iter().map(|p| (p.ref_id, p)));
        self
    }

    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    pub fn with_shipping_methods(mut self, methods: Vec<ShippingMethod>) -> Self {
        self.shipping_methods = methods;
        self
    }

    pub fn insert(&self, package: PackageData) {
        self.packages.write().insert(package.ref_id, package);
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn package(&self, ref_id: PackageId) -> Option<PackageData> {
        self.packages.read().get(&ref_id).cloned()
    }

    fn currency(&self) -> String {
        self.currency.clone()
    }

    fn store_name(&self) -> Option<String> {
        self.store_name.clone()
    }

    fn shipping_methods(&self) -> Vec<ShippingMethod> {
        self.shipping_methods.clone()
    }
}

// ---------------------------------------------------------------------------
// Profiles / checkout / attribution
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryProfileStore {
    active: RwLock<Option<PackageProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, profile: PackageProfile) {
        info!(profile = %profile.id, "package profile activated");
        *self.active.write() = Some(profile);
    }

    pub fn deactivate(&self) {
        *self.active.write() = None;
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn active_profile(&self) -> Option<PackageProfile> {
        self.active.read().clone()
    }
}

#[derive(Default)]
pub struct InMemoryCheckoutStore {
    snapshot: RwLock<CheckoutSnapshot>,
}

impl InMemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&self, name: impl Into<String>, value: impl Into<String>) {
        self.snapshot
            .write()
            .form_data
            .insert(name.into(), value.into());
    }

    pub fn set_snapshot(&self, snapshot: CheckoutSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

impl CheckoutStore for InMemoryCheckoutStore {
    fn snapshot(&self) -> CheckoutSnapshot {
        self.snapshot.read().clone()
    }
}

#[derive(Default)]
pub struct InMemoryAttributionStore {
    data: RwLock<Option<AttributionData>>,
}

impl InMemoryAttributionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, data: AttributionData) {
        *self.data.write() = Some(data);
    }
}

impl AttributionStore for InMemoryAttributionStore {
    fn attribution_for_api(&self) -> Option<AttributionData> {
        self.data.read().clone()
    }
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// Cart store backed by process memory. Publishes `cart:*` events on the bus
/// and broadcasts every committed state on a watch channel.
pub struct InMemoryCartStore {
    state: Mutex<CartState>,
    campaign: Arc<dyn CampaignStore>,
    profiles: Option<Arc<dyn ProfileStore>>,
    bus: Arc<EventBus>,
    notifier: watch::Sender<CartState>,
}

impl InMemoryCartStore {
    pub fn new(campaign: Arc<dyn CampaignStore>, bus: Arc<EventBus>) -> Self {
        let initial = CartState {
            currency: campaign.currency(),
            ..CartState::default()
        };
        let (notifier, _) = watch::channel(initial.clone());
        Self {
            state: Mutex::new(initial),
            campaign,
            profiles: None,
            bus,
            notifier,
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    fn canonical_id(&self, package_id: PackageId) -> PackageId {
        self.profiles
            .as_ref()
            .map_or(package_id, |p| p.mapped_package_id(package_id))
    }

    fn build_item(&self, request: &AddItemRequest) -> CartResult<CartItem> {
        if request.quantity == 0 {
            return Err(CartError::InvalidQuantity {
                package_id: request.package_id,
                quantity: 0,
            });
        }
        let package_id = self.canonical_id(request.package_id);
        let package = self
            .campaign
            .package(package_id)
            .ok_or(CartError::PackageNotFound(package_id))?;
        Ok(CartItem {
            package_id,
            original_package_id: (package_id != request.package_id).then_some(request.package_id),
            quantity: request.quantity,
            price: package.unit_price().unwrap_or_default(),
            title: package.name.clone(),
            image: package.image.clone(),
            sku: package.product_sku.clone(),
            product_id: package.product_id,
            product_name: package.product_name.clone(),
            variant_id: package.product_variant_id,
            variant_name: package.product_variant_name.clone(),
            is_upsell: request.is_upsell,
        })
    }

    fn shipping_price(&self, shipping_id: Option<u32>) -> f64 {
        shipping_id
            .and_then(|id| {
                self.campaign
                    .shipping_methods()
                    .into_iter()
                    .find(|m| m.ref_id == id)
            })
            .and_then(|m| crate::types::parse_price(&m.price))
            .unwrap_or_default()
    }

    /// Recompute totals, publish the state and the `cart:updated` event.
    /// Called with the state lock released.
    fn commit(&self, events: Vec<SdkEvent>) {
        let snapshot = {
            let mut state = self.state.lock();
            let subtotal: f64 = state.items.iter().map(CartItem::line_total).sum();
            let shipping = self.shipping_price(state.shipping_method);
            state.totals = CartTotals {
                subtotal,
                shipping,
                total: subtotal + shipping,
                count: state.items.iter().map(|i| i.quantity).sum(),
            };
            state.clone()
        };
        self.notifier.send_replace(snapshot.clone());
        for event in &events {
            self.bus.emit(event);
        }
        self.bus.emit(&SdkEvent::CartUpdated {
            item_count: snapshot.totals.count,
            total: snapshot.totals.total,
        });
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    fn state(&self) -> CartState {
        self.state.lock().clone()
    }

    async fn add_item(&self, request: AddItemRequest) -> CartResult<()> {
        let item = self.build_item(&request)?;
        let event = {
            let mut state = self.state.lock();
            if let Some(existing) = state.items.iter_mut().find(|i| i.matches(item.package_id)) {
                existing.quantity += item.quantity;
            } else {
                state.items.push(item.clone());
            }
            SdkEvent::CartItemAdded {
                package_id: item.package_id,
                quantity: item.quantity,
                item: Some(item.clone()),
            }
        };
        debug!(package_id = item.package_id, quantity = item.quantity, "cart item added");
        self.commit(vec![event]);
        Ok(())
    }

    async fn remove_item(&self, package_id: PackageId) -> CartResult<()> {
        let removed = {
            let mut state = self.state.lock();
            let idx = state
                .items
                .iter()
                .position(|i| i.matches(package_id))
                .ok_or(CartError::ItemNotInCart(package_id))?;
            state.items.remove(idx)
        };
        debug!(package_id = removed.package_id, "cart item removed");
        self.commit(vec![SdkEvent::CartItemRemoved {
            package_id: removed.package_id,
            item: Some(removed),
        }]);
        Ok(())
    }

    async fn update_quantity(&self, package_id: PackageId, quantity: u32) -> CartResult<()> {
        if quantity == 0 {
            return self.remove_item(package_id).await;
        }
        let event = {
            let mut state = self.state.lock();
            let item = state
                .items
                .iter_mut()
                .find(|i| i.matches(package_id))
                .ok_or(CartError::ItemNotInCart(package_id))?;
            let old_quantity = item.quantity;
            item.quantity = quantity;
            SdkEvent::CartQuantityChanged {
                package_id: item.package_id,
                old_quantity,
                new_quantity: quantity,
            }
        };
        self.commit(vec![event]);
        Ok(())
    }

    async fn swap_package(&self, old_id: PackageId, request: AddItemRequest) -> CartResult<()> {
        let new_item = self.build_item(&request)?;
        let event = {
            let mut state = self.state.lock();
            let idx = state
                .items
                .iter()
                .position(|i| i.matches(old_id))
                .ok_or(CartError::ItemNotInCart(old_id))?;
            let previous = std::mem::replace(&mut state.items[idx], new_item.clone());
            // A second line for the new package would leave a duplicate.
            let new_id = new_item.package_id;
            let mut seen = false;
            state.items.retain(|i| {
                if i.package_id != new_id {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
            SdkEvent::CartPackageSwapped {
                previous_package_id: previous.package_id,
                new_package_id: new_id,
                price_difference: new_item.line_total() - previous.line_total(),
                previous_item: previous,
                new_item: new_item.clone(),
            }
        };
        info!(old_id, new_id = new_item.package_id, "cart package swapped");
        self.commit(vec![event]);
        Ok(())
    }

    async fn set_shipping_method(&self, shipping_id: u32) -> CartResult<()> {
        let method = self
            .campaign
            .shipping_methods()
            .into_iter()
            .find(|m| m.ref_id == shipping_id)
            .ok_or(CartError::ShippingMethodNotFound(shipping_id))?;
        self.state.lock().shipping_method = Some(shipping_id);
        self.commit(vec![SdkEvent::ShippingSelected {
            shipping_id,
            tier: Some(method.code),
        }]);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<CartState> {
        self.notifier.subscribe()
    }
}
