//! Process-wide event bus: synchronous publish/subscribe keyed by event name.
//!
//! Cart stores, selectors and the checkout flow publish [`SdkEvent`]s here;
//! the analytics auto listener subscribes to turn them into tracked events.
//! Handler errors and panics are caught per handler and logged, so one broken
//! subscriber never stops the others or the publisher.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error};

use crate::types::{CartItem, Order, PackageId, SelectionMode, UpsellOffer};

/// Domain events published on the bus. [`SdkEvent::name`] is the string
/// contract subscribers key on.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkEvent {
    CartItemAdded {
        package_id: PackageId,
        quantity: u32,
        item: Option<CartItem>,
    },
    CartItemRemoved {
        package_id: PackageId,
        item: Option<CartItem>,
    },
    CartQuantityChanged {
        package_id: PackageId,
        old_quantity: u32,
        new_quantity: u32,
    },
    CartPackageSwapped {
        previous_package_id: PackageId,
        new_package_id: PackageId,
        previous_item: CartItem,
        new_item: CartItem,
        price_difference: f64,
    },
    CartUpdated {
        item_count: u32,
        total: f64,
    },
    CheckoutStarted,
    ShippingSelected {
        shipping_id: u32,
        tier: Option<String>,
    },
    PaymentSelected {
        payment_type: String,
    },
    UpsellViewed {
        order_id: String,
        package_id: PackageId,
    },
    UpsellAccepted(UpsellOffer),
    UpsellSkipped {
        order_id: String,
        package_id: Option<PackageId>,
    },
    OrderCompleted(Order),
    SelectorItemSelected {
        selector_id: String,
        package_id: PackageId,
        previous_package_id: Option<PackageId>,
        mode: SelectionMode,
        pending_action: Option<bool>,
    },
    SelectorSelectionChanged {
        selector_id: String,
        package_id: Option<PackageId>,
    },
    SelectorQuantityChanged {
        selector_id: String,
        package_id: PackageId,
        quantity: u32,
    },
    ErrorOccurred {
        source: String,
        message: String,
    },
    RouteChanged {
        url: String,
    },
    PageViewed {
        url: String,
    },
    UserLoggedIn {
        method: Option<String>,
    },
    UserSignedUp {
        method: Option<String>,
    },
    SearchPerformed {
        term: String,
        results: Option<u32>,
    },
}

impl SdkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SdkEvent::CartItemAdded { .. } => "cart:item-added",
            SdkEvent::CartItemRemoved { .. } => "cart:item-removed",
            SdkEvent::CartQuantityChanged { .. } => "cart:quantity-changed",
            SdkEvent::CartPackageSwapped { .. } => "cart:package-swapped",
            SdkEvent::CartUpdated { .. } => "cart:updated",
            SdkEvent::CheckoutStarted => "checkout:started",
            SdkEvent::ShippingSelected { .. } => "shipping:selected",
            SdkEvent::PaymentSelected { .. } => "payment:selected",
            SdkEvent::UpsellViewed { .. } => "upsell:viewed",
            SdkEvent::UpsellAccepted(_) => "upsell:accepted",
            SdkEvent::UpsellSkipped { .. } => "upsell:skipped",
            SdkEvent::OrderCompleted(_) => "order:completed",
            SdkEvent::SelectorItemSelected { .. } => "selector:item-selected",
            SdkEvent::SelectorSelectionChanged { .. } => "selector:selection-changed",
            SdkEvent::SelectorQuantityChanged { .. } => "selector:quantity-changed",
            SdkEvent::ErrorOccurred { .. } => "error:occurred",
            SdkEvent::RouteChanged { .. } => "route:changed",
            SdkEvent::PageViewed { .. } => "page:viewed",
            SdkEvent::UserLoggedIn { .. } => "user:logged-in",
            SdkEvent::UserSignedUp { .. } => "user:signed-up",
            SdkEvent::SearchPerformed { .. } => "search:performed",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SdkEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-memory publish/subscribe hub. One instance is created at startup and
/// shared by reference with every component that publishes or listens.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<&'static str, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register `handler` for events named `name`.
    pub fn subscribe<F>(&self, name: &'static str, handler: F) -> SubscriptionId
    where
        F: Fn(&SdkEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Dispatch `event` to its subscribers in subscription order. Returns the
    /// number of handlers that completed successfully.
    pub fn emit(&self, event: &SdkEvent) -> usize {
        let name = event.name();
        // Snapshot so handlers can (un)subscribe while we dispatch.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(name)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        debug!(event = name, handlers = handlers.len(), "emitting bus event");

        let mut ok = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => error!(event = name, error = %e, "event handler failed"),
                Err(_) => error!(event = name, "event handler panicked"),
            }
        }
        ok
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.handlers.read().get(name).map_or(0, Vec::len)
    }
}
