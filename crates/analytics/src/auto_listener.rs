//! Turns domain events from the bus into analytics events, with a debounce
//! window per event type and package so double-fired UI actions are tracked
//! once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use campaign_cart_core::config::DebounceConfig;
use campaign_cart_core::event_bus::{EventBus, SdkEvent, SubscriptionId};
use campaign_cart_core::stores::CartStore;

use crate::builder::ItemInput;
use crate::data_layer::DataLayerManager;
use crate::ecommerce::EcommerceEvents;
use crate::view_tracker::ViewItemTracker;

/// Remembers when each key last fired.
pub struct Debouncer {
    last: DashMap<String, Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self { last: DashMap::new() }
    }

    /// True when `key` has not fired within `window`; records the firing.
    pub fn allow(&self, key: &str, window: Duration) -> bool {
        let now = Instant::now();
        if let Some(previous) = self.last.get(key) {
            if now.duration_since(*previous) < window {
                debug!(key, "debounced");
                return false;
            }
        }
        self.last.insert(key.to_string(), now);
        true
    }

    pub fn clear(&self) {
        self.last.clear();
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

struct Listener {
    data_layer: Arc<DataLayerManager>,
    events: Arc<EcommerceEvents>,
    cart: Arc<dyn CartStore>,
    views: Option<Arc<ViewItemTracker>>,
    debounce: DebounceConfig,
    debouncer: Debouncer,
}

impl Listener {
    fn window(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn handle(&self, event: &SdkEvent) -> anyhow::Result<()> {
        let d = &self.debounce;
        let envelope = match event {
            SdkEvent::CartItemAdded { package_id, quantity, item } => {
                if !self
                    .debouncer
                    .allow(&format!("add:{package_id}"), Self::window(d.add_to_cart_ms))
                {
                    return Ok(());
                }
                let input = match item {
                    Some(item) => ItemInput {
                        quantity: *quantity,
                        ..ItemInput::from(item)
                    },
                    None => ItemInput::package(*package_id, *quantity),
                };
                self.events.add_to_cart(&input, None)
            }
            SdkEvent::CartItemRemoved { package_id, item } => {
                if !self
                    .debouncer
                    .allow(&format!("remove:{package_id}"), Self::window(d.remove_from_cart_ms))
                {
                    return Ok(());
                }
                let input = item
                    .as_ref()
                    .map(ItemInput::from)
                    .unwrap_or_else(|| ItemInput::package(*package_id, 1));
                self.events.remove_from_cart(&input)
            }
            SdkEvent::CartQuantityChanged {
                package_id,
                old_quantity,
                new_quantity,
            } => {
                let item = self.cart.item(*package_id);
                let base = item
                    .as_ref()
                    .map(ItemInput::from)
                    .unwrap_or_else(|| ItemInput::package(*package_id, 1));
                if new_quantity > old_quantity {
                    let input = ItemInput {
                        quantity: new_quantity - old_quantity,
                        ..base
                    };
                    self.events.add_to_cart(&input, None)
                } else if new_quantity < old_quantity {
                    let input = ItemInput {
                        quantity: old_quantity - new_quantity,
                        ..base
                    };
                    self.events.remove_from_cart(&input)
                } else {
                    return Ok(());
                }
            }
            SdkEvent::CartPackageSwapped {
                previous_package_id,
                new_package_id,
                previous_item,
                new_item,
                price_difference,
            } => {
                let key = format!("swap:{previous_package_id}:{new_package_id}");
                if !self.debouncer.allow(&key, Self::window(d.package_swap_ms)) {
                    return Ok(());
                }
                self.events.package_swapped(previous_item, new_item, *price_difference)
            }
            SdkEvent::CheckoutStarted => {
                if !self.debouncer.allow("checkout", Self::window(d.begin_checkout_ms)) {
                    return Ok(());
                }
                self.events.begin_checkout(&self.cart.state())
            }
            SdkEvent::ShippingSelected { shipping_id, tier } => {
                let tier = tier.clone().unwrap_or_else(|| shipping_id.to_string());
                self.events.add_shipping_info(&self.cart.state(), &tier)
            }
            SdkEvent::PaymentSelected { payment_type } => {
                self.events.add_payment_info(&self.cart.state(), payment_type)
            }
            SdkEvent::UpsellViewed { order_id, package_id } => {
                let key = format!("upsell-viewed:{order_id}:{package_id}");
                if !self.debouncer.allow(&key, Self::window(d.upsell_ms)) {
                    return Ok(());
                }
                self.events.viewed_upsell(order_id, *package_id)
            }
            SdkEvent::UpsellAccepted(offer) => {
                let key = format!("upsell-accepted:{}:{}", offer.order_id, offer.package_id);
                if !self.debouncer.allow(&key, Self::window(d.upsell_ms)) {
                    return Ok(());
                }
                self.events.accepted_upsell(offer)
            }
            SdkEvent::UpsellSkipped { order_id, package_id } => {
                self.events.skipped_upsell(order_id, *package_id)
            }
            SdkEvent::OrderCompleted(order) => self.events.purchase(order, &self.cart.state()),
            SdkEvent::UserLoggedIn { method } => self.events.login(method.as_deref().unwrap_or("email")),
            SdkEvent::UserSignedUp { method } => self.events.sign_up(method.as_deref().unwrap_or("email")),
            SdkEvent::SearchPerformed { term, .. } => self.events.view_search_results(term, &[]),
            SdkEvent::RouteChanged { url } => {
                debug!(url = %url, "route changed");
                self.data_layer.invalidate_context();
                if let Some(views) = &self.views {
                    views.reset();
                    views.scan();
                }
                return Ok(());
            }
            _ => return Ok(()),
        };
        self.data_layer.push(envelope);
        Ok(())
    }
}

const SUBSCRIBED: &[&str] = &[
    "cart:item-added",
    "cart:item-removed",
    "cart:quantity-changed",
    "cart:package-swapped",
    "checkout:started",
    "shipping:selected",
    "payment:selected",
    "upsell:viewed",
    "upsell:accepted",
    "upsell:skipped",
    "order:completed",
    "user:logged-in",
    "user:signed-up",
    "search:performed",
    "route:changed",
];

pub struct AutoEventListener {
    bus: Arc<EventBus>,
    listener: Arc<Listener>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl AutoEventListener {
    pub fn new(
        bus: Arc<EventBus>,
        data_layer: Arc<DataLayerManager>,
        events: Arc<EcommerceEvents>,
        cart: Arc<dyn CartStore>,
        debounce: DebounceConfig,
    ) -> Self {
        Self {
            bus,
            listener: Arc::new(Listener {
                data_layer,
                events,
                cart,
                views: None,
                debounce,
                debouncer: Debouncer::new(),
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Route changes also reset and rescan this tracker.
    pub fn with_view_tracker(mut self, views: Arc<ViewItemTracker>) -> Self {
        if let Some(listener) = Arc::get_mut(&mut self.listener) {
            listener.views = Some(views);
        }
        self
    }

    pub fn start(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }
        for name in SUBSCRIBED {
            let listener = self.listener.clone();
            subscriptions.push(self.bus.subscribe(*name, move |event| listener.handle(event)));
        }
        info!(count = subscriptions.len(), "analytics auto listener started");
    }

    pub fn stop(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(id);
        }
    }

    pub fn is_listening(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }
}

impl Drop for AutoEventListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::{fixture, package};
    use campaign_cart_core::config::AnalyticsConfig;
    use campaign_cart_core::storage::StorageAdapter;
    use campaign_cart_core::stores::InMemoryCampaignStore;
    use campaign_cart_core::stores::InMemoryCartStore;
    use campaign_cart_core::types::AddItemRequest;

    struct Harness {
        bus: Arc<EventBus>,
        cart: Arc<InMemoryCartStore>,
        dl: Arc<DataLayerManager>,
        listener: AutoEventListener,
    }

    fn harness(debounce: DebounceConfig) -> Harness {
        let bus = EventBus::shared();
        let campaign = Arc::new(
            InMemoryCampaignStore::new("USD").with_packages([package(1, "10.00"), package(2, "19.99")]),
        );
        let cart = Arc::new(InMemoryCartStore::new(campaign, bus.clone()));
        let dl = Arc::new(DataLayerManager::new(
            &AnalyticsConfig::default(),
            StorageAdapter::memory(),
            StorageAdapter::memory(),
        ));
        let events = Arc::new(EcommerceEvents::new(fixture().builder));
        let listener = AutoEventListener::new(bus.clone(), dl.clone(), events, cart.clone(), debounce);
        listener.start();
        Harness { bus, cart, dl, listener }
    }

    fn names(dl: &DataLayerManager) -> Vec<String> {
        dl.events()
            .iter()
            .map(|e| e["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_cart_events_become_analytics_events() {
        let h = harness(DebounceConfig::default());
        h.cart.add_item(AddItemRequest::new(1, 1)).await.unwrap();
        h.cart.swap_package(1, AddItemRequest::new(2, 1)).await.unwrap();
        h.cart.remove_item(2).await.unwrap();
        assert_eq!(
            names(&h.dl),
            vec!["dl_add_to_cart", "dl_package_swapped", "dl_remove_from_cart"]
        );
    }

    #[tokio::test]
    async fn test_repeat_add_within_window_debounced() {
        let h = harness(DebounceConfig::default());
        h.cart.add_item(AddItemRequest::new(1, 1)).await.unwrap();
        h.cart.add_item(AddItemRequest::new(1, 1)).await.unwrap();
        h.cart.add_item(AddItemRequest::new(2, 1)).await.unwrap();
        assert_eq!(names(&h.dl), vec!["dl_add_to_cart", "dl_add_to_cart"]);
    }

    #[tokio::test]
    async fn test_quantity_increase_tracks_delta() {
        let h = harness(DebounceConfig::default());
        h.cart.add_item(AddItemRequest::new(1, 1)).await.unwrap();
        h.cart.update_quantity(1, 3).await.unwrap();
        let events = h.dl.events();
        assert_eq!(events[1]["event"], "dl_add_to_cart");
        assert_eq!(events[1]["ecommerce"]["items"][0]["quantity"], 2);
    }

    #[test]
    fn test_checkout_and_stop() {
        let h = harness(DebounceConfig::default());
        h.bus.emit(&SdkEvent::CheckoutStarted);
        h.bus.emit(&SdkEvent::CheckoutStarted);
        assert_eq!(names(&h.dl), vec!["dl_begin_checkout"]);

        h.listener.stop();
        assert!(!h.listener.is_listening());
        h.bus.emit(&SdkEvent::PaymentSelected {
            payment_type: "card".into(),
        });
        assert_eq!(h.dl.events().len(), 1);
    }

    #[test]
    fn test_debouncer_zero_window_allows() {
        let d = Debouncer::new();
        assert!(d.allow("k", Duration::ZERO));
        assert!(d.allow("k", Duration::ZERO));
        assert!(d.allow("j", Duration::from_secs(60)));
        assert!(!d.allow("j", Duration::from_secs(60)));
    }
}
