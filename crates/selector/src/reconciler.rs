//! The package selector state machine.
//!
//! A selector owns the cards under its root element and at most one
//! selected card. Three triggers drive it: the initial scan, DOM mutations
//! reported by the host, and cart state changes. All three run the same
//! `reconcile` pass (prune, register, sync, select), so
//! the selection invariants hold whichever trigger fires. Clicks are handled
//! separately because they are the only transitions the shopper starts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use campaign_cart_core::config::SelectorDefaults;
use campaign_cart_core::dom::{DomMutation, NodeId, SharedDocument};
use campaign_cart_core::error::CartError;
use campaign_cart_core::event_bus::{EventBus, SdkEvent};
use campaign_cart_core::stores::{CampaignStore, CartStore, ProfileStore};
use campaign_cart_core::types::{parse_price, AddItemRequest, CartState, PackageId, SelectionMode};

use crate::config::*;
use crate::item::SelectorItem;

pub type SelectorHandle = Arc<Mutex<PackageSelector>>;

/// Collaborators shared by every selector on the page.
#[derive(Clone)]
pub struct SelectorDeps {
    pub document: SharedDocument,
    pub bus: Arc<EventBus>,
    pub cart: Arc<dyn CartStore>,
    pub campaign: Arc<dyn CampaignStore>,
    pub profiles: Option<Arc<dyn ProfileStore>>,
    pub defaults: SelectorDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Card,
    Increase,
    Decrease,
}

enum Trigger<'a> {
    Scan,
    Mutation(&'a DomMutation),
    Cart(&'a CartState),
}

pub struct PackageSelector {
    root: NodeId,
    config: SelectorConfig,
    deps: SelectorDeps,
    items: Vec<SelectorItem>,
    selected: Option<NodeId>,
    /// Click targets per card. A card without an entry ignores clicks.
    listeners: HashMap<NodeId, Vec<(NodeId, Binding)>>,
    destroyed: bool,
}

impl PackageSelector {
    pub fn new(root: NodeId, deps: SelectorDeps) -> Self {
        let config = SelectorConfig::parse(&deps.document.read(), root, &deps.defaults);
        info!(selector_id = %config.id, mode = config.mode.as_str(), "package selector created");
        Self {
            root,
            config,
            deps,
            items: Vec::new(),
            selected: None,
            listeners: HashMap::new(),
            destroyed: false,
        }
    }

    /// Create and initialize a selector for every selector root in the
    /// document.
    pub async fn attach_all(deps: SelectorDeps) -> Vec<SelectorHandle> {
        let roots = {
            let doc = deps.document.read();
            doc.query_attr(doc.root(), SELECTOR_ATTR)
        };
        let mut handles = Vec::with_capacity(roots.len());
        for root in roots {
            let mut selector = Self::new(root, deps.clone());
            selector.initialize().await;
            handles.push(selector.into_handle());
        }
        handles
    }

    pub fn into_handle(self) -> SelectorHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn mode(&self) -> SelectionMode {
        self.config.mode
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn items(&self) -> &[SelectorItem] {
        &self.items
    }

    pub fn item(&self, card: NodeId) -> Option<&SelectorItem> {
        self.items.iter().find(|i| i.element == card)
    }

    pub fn selected_item(&self) -> Option<&SelectorItem> {
        self.selected.and_then(|node| self.item(node))
    }

    pub fn selected_package(&self) -> Option<PackageId> {
        self.selected_item().map(|i| i.package_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // ---- triggers ------------------------------------------------------

    pub async fn initialize(&mut self) {
        self.reconcile(Trigger::Scan).await;
    }

    pub async fn handle_mutation(&mut self, mutation: &DomMutation) {
        self.reconcile(Trigger::Mutation(mutation)).await;
    }

    pub async fn sync_with_cart(&mut self, state: &CartState) {
        self.reconcile(Trigger::Cart(state)).await;
    }

    async fn reconcile(&mut self, trigger: Trigger<'_>) {
        if self.destroyed {
            return;
        }

        self.prune_detached();
        let mut implicit_swap = None;
        if let Trigger::Mutation(DomMutation::AttributeChanged { node, name }) = &trigger {
            if CARD_FIELD_ATTRS.contains(&name.as_str()) {
                implicit_swap = self.refresh_card(*node);
            }
        }
        self.discover();
        self.enforce_single_preselect();

        if let Some(previous) = implicit_swap {
            self.swap_in_cart(previous).await;
        }

        let state = match trigger {
            Trigger::Cart(state) => state.clone(),
            _ => self.deps.cart.state(),
        };
        self.apply_cart_state(&state);
        self.reconcile_selection(&state).await;
        self.clear_stale_selected_attrs();
    }

    /// Route a click on `target` to the card or quantity button it lands in.
    pub async fn handle_click(&mut self, target: NodeId) {
        if self.destroyed {
            return;
        }
        let Some((card, binding)) = self.binding_for(target) else {
            return;
        };
        match binding {
            Binding::Card => self.select_card(card).await,
            Binding::Increase => self.change_quantity(card, 1).await,
            Binding::Decrease => self.change_quantity(card, -1).await,
        }
    }

    fn binding_for(&self, target: NodeId) -> Option<(NodeId, Binding)> {
        let doc = self.deps.document.read();
        let mut best: Option<(NodeId, NodeId, Binding)> = None;
        for (card, bindings) in &self.listeners {
            for (node, binding) in bindings {
                if !doc.contains(*node, target) {
                    continue;
                }
                // The innermost bound node wins (a button inside a card).
                let deeper = best.map_or(true, |(current, _, _)| doc.contains(current, *node));
                if deeper {
                    best = Some((*node, *card, *binding));
                }
            }
        }
        best.map(|(_, card, binding)| (card, binding))
    }

    /// Detach everything. Later triggers and clicks are no-ops.
    pub fn destroy(&mut self) {
        self.listeners.clear();
        self.items.clear();
        self.selected = None;
        self.destroyed = true;
        info!(selector_id = %self.config.id, "package selector destroyed");
    }

    // ---- registration --------------------------------------------------

    fn owns(&self, card: NodeId) -> bool {
        let doc = self.deps.document.read();
        doc.is_connected(card)
            && doc
                .parent(card)
                .and_then(|parent| doc.closest_with_attr(parent, SELECTOR_ATTR))
                == Some(self.root)
    }

    fn prune_detached(&mut self) {
        let gone: Vec<NodeId> = self
            .items
            .iter()
            .map(|i| i.element)
            .filter(|card| !self.owns(*card))
            .collect();
        for card in gone {
            self.unregister(card);
        }
    }

    fn unregister(&mut self, card: NodeId) {
        self.listeners.remove(&card);
        self.items.retain(|i| i.element != card);
        debug!(selector_id = %self.config.id, "selector card removed");
        if self.selected == Some(card) {
            self.selected = None;
            self.deps.document.write().remove_attr(self.root, SELECTED_PACKAGE_ATTR);
            self.deps.bus.emit(&SdkEvent::SelectorSelectionChanged {
                selector_id: self.config.id.clone(),
                package_id: None,
            });
        }
    }

    fn discover(&mut self) {
        let cards: Vec<NodeId> = {
            let doc = self.deps.document.read();
            doc.query_attr(self.root, CARD_ATTR)
        };
        for card in cards {
            if self.item(card).is_none() && self.owns(card) {
                self.register(card);
            }
        }
    }

    fn resolve_id(&self, card: &CardConfig) -> PackageId {
        match &self.deps.profiles {
            Some(profiles) if card.apply_profile => profiles.mapped_package_id(card.package_id),
            _ => card.package_id,
        }
    }

    fn register(&mut self, card: NodeId) {
        let (config, bindings) = {
            let doc = self.deps.document.read();
            let Some(config) = CardConfig::parse(&doc, card, &self.deps.defaults) else {
                return;
            };
            let mut bindings = vec![(card, Binding::Card)];
            bindings.extend(
                doc.query_attr(card, QUANTITY_INCREASE_ATTR)
                    .into_iter()
                    .map(|n| (n, Binding::Increase)),
            );
            bindings.extend(
                doc.query_attr(card, QUANTITY_DECREASE_ATTR)
                    .into_iter()
                    .map(|n| (n, Binding::Decrease)),
            );
            (config, bindings)
        };
        let package_id = self.resolve_id(&config);
        let mut item = SelectorItem::new(card, &config, package_id);
        self.fill_display(&mut item);
        debug!(
            selector_id = %self.config.id,
            package_id,
            pre_selected = item.is_pre_selected,
            "selector card registered"
        );
        self.items.push(item);
        self.listeners.insert(card, bindings);
        self.render(card);
    }

    /// Re-read a tracked card after an attribute change. Returns the card as
    /// it was when the cart has to follow the change.
    fn refresh_card(&mut self, card: NodeId) -> Option<SelectorItem> {
        self.item(card)?;
        let config = {
            let doc = self.deps.document.read();
            CardConfig::parse(&doc, card, &self.deps.defaults)
        }?;
        let package_id = self.resolve_id(&config);
        let previous = self.item(card)?.clone();
        let mut item = previous.clone();
        item.update(&config, package_id);
        self.fill_display(&mut item);
        if let Some(slot) = self.items.iter_mut().find(|i| i.element == card) {
            *slot = item;
        }
        self.render(card);
        if self.selected == Some(card) {
            self.deps
                .document
                .write()
                .set_attr(self.root, SELECTED_PACKAGE_ATTR, package_id.to_string());
        }

        let follow =
            previous.package_id != package_id && self.selected == Some(card) && self.config.mode == SelectionMode::Swap;
        follow.then_some(previous)
    }

    /// Catalog name and price, else whatever the card shows.
    fn fill_display(&self, item: &mut SelectorItem) {
        if let Some(package) = self.deps.campaign.package(item.package_id) {
            item.price = package.unit_price();
            item.name = package.name;
            return;
        }
        warn!(package_id = item.package_id, "package missing from campaign data, reading card text");
        let doc = self.deps.document.read();
        if let Some(node) = doc.query_attr_first(item.element, PACKAGE_NAME_ATTR) {
            item.name = doc.text(node).trim().to_string();
        }
        item.price = doc
            .query_attr_first(item.element, PACKAGE_PRICE_ATTR)
            .and_then(|node| parse_price(doc.text(node)));
    }

    fn enforce_single_preselect(&mut self) {
        let marked: Vec<NodeId> = self
            .items
            .iter()
            .filter(|i| i.is_pre_selected)
            .map(|i| i.element)
            .collect();
        if marked.len() <= 1 {
            return;
        }
        warn!(
            selector_id = %self.config.id,
            count = marked.len(),
            "multiple pre-selected cards, keeping the first"
        );
        let mut doc = self.deps.document.write();
        for card in &marked[1..] {
            if let Some(item) = self.items.iter_mut().find(|i| i.element == *card) {
                item.is_pre_selected = false;
            }
            if self.selected != Some(*card) {
                doc.set_attr(*card, SELECTED_ATTR, "false");
            }
        }
    }

    /// Cards other than the selected one never keep `data-next-selected="true"`.
    fn clear_stale_selected_attrs(&self) {
        let mut doc = self.deps.document.write();
        for item in &self.items {
            if Some(item.element) != self.selected && doc.attr(item.element, SELECTED_ATTR) == Some("true") {
                doc.set_attr(item.element, SELECTED_ATTR, "false");
            }
        }
    }

    // ---- cart sync -----------------------------------------------------

    fn apply_cart_state(&mut self, state: &CartState) {
        let mut changed = Vec::new();
        for item in &mut self.items {
            let line = state.items.iter().find(|l| !l.is_upsell && item.matches_line(l));
            let in_cart = line.is_some();
            let quantity = line.map_or(item.quantity, |l| l.quantity);
            if item.in_cart != in_cart || item.quantity != quantity {
                item.in_cart = in_cart;
                item.quantity = quantity;
                changed.push(item.element);
            }
        }
        for card in changed {
            self.render(card);
        }
    }

    async fn reconcile_selection(&mut self, state: &CartState) {
        if self.config.mode == SelectionMode::Swap {
            if let Some(card) = self.items.iter().find(|i| i.in_cart).map(|i| i.element) {
                if self.selected != Some(card) {
                    self.select_item(card);
                }
                return;
            }
        }
        if self.selected.is_some() {
            return;
        }

        if let Some(card) = self.items.iter().find(|i| i.is_pre_selected).map(|i| i.element) {
            self.select_item(card);
            if self.config.mode == SelectionMode::Swap && state.is_empty() {
                if let Some(request) = self.request_for(card) {
                    if let Err(e) = self.deps.cart.add_item(request).await {
                        self.report("pre-selected package", &e);
                        self.restore_selection(None);
                    }
                }
            }
        } else if self.config.mode == SelectionMode::Select {
            if let Some(first) = self.items.first().map(|i| i.element) {
                self.select_item(first);
            }
        }
    }

    fn request_for(&self, card: NodeId) -> Option<AddItemRequest> {
        self.item(card)
            .map(|i| AddItemRequest::new(i.request_id(), i.quantity))
    }

    /// Put the selected card's package in the cart, swapping out whichever
    /// line another card of this selector put there.
    async fn update_cart(&self, card: NodeId) -> Result<(), CartError> {
        let Some(item) = self.item(card) else {
            return Ok(());
        };
        let state = self.deps.cart.state();
        let existing = state
            .items
            .iter()
            .find(|line| !line.is_upsell && self.items.iter().any(|i| i.matches_line(line)))
            .map(|line| (line.package_id, item.matches_line(line)));
        let request = AddItemRequest::new(item.request_id(), item.quantity);

        match existing {
            Some((_, true)) => Ok(()),
            Some((old_id, false)) => self.deps.cart.swap_package(old_id, request).await,
            None if state.has_item(item.package_id) => Ok(()),
            None => self.deps.cart.add_item(request).await,
        }
    }

    /// Follow a selected card's package change into the cart; a refused
    /// change puts the card back the way it was.
    async fn swap_in_cart(&mut self, previous: SelectorItem) {
        let card = previous.element;
        let Some(request) = self.request_for(card) else {
            return;
        };
        let old_id = previous.package_id;
        let result = if self.deps.cart.has_item(old_id) {
            self.deps.cart.swap_package(old_id, request).await
        } else {
            self.deps.cart.add_item(request).await
        };
        if let Err(e) = result {
            self.report("package id change", &e);
            self.revert_item(previous);
        }
    }

    fn revert_item(&mut self, previous: SelectorItem) {
        let card = previous.element;
        let package_id = previous.package_id;
        if let Some(slot) = self.items.iter_mut().find(|i| i.element == card) {
            *slot = previous;
        }
        self.render(card);
        if self.selected == Some(card) {
            self.deps
                .document
                .write()
                .set_attr(self.root, SELECTED_PACKAGE_ATTR, package_id.to_string());
        }
    }

    // ---- shopper actions -----------------------------------------------

    async fn select_card(&mut self, card: NodeId) {
        if self.selected == Some(card) {
            debug!(selector_id = %self.config.id, "card already selected");
            return;
        }
        if self.item(card).is_none() {
            return;
        }
        let previous = self.selected;
        self.select_item(card);
        if self.config.mode != SelectionMode::Swap {
            return;
        }

        if let Err(e) = self.update_cart(card).await {
            self.report("card selection", &e);
            self.restore_selection(previous);
            return;
        }
        if let Some(shipping_id) = self.item(card).and_then(|i| i.shipping_id) {
            if let Err(e) = self.deps.cart.set_shipping_method(shipping_id).await {
                warn!(selector_id = %self.config.id, shipping_id, error = %e, "could not apply card shipping method");
            }
        }
    }

    async fn change_quantity(&mut self, card: NodeId, delta: i64) {
        let Some(item) = self.items.iter_mut().find(|i| i.element == card) else {
            return;
        };
        let previous_quantity = item.quantity;
        let quantity = item.clamp(i64::from(previous_quantity) + delta);
        if quantity == previous_quantity {
            debug!(package_id = item.package_id, quantity, "quantity at its bound");
            self.render(card);
            return;
        }
        item.quantity = quantity;
        let package_id = item.package_id;
        let request = AddItemRequest::new(item.request_id(), quantity);
        self.render(card);
        self.deps.bus.emit(&SdkEvent::SelectorQuantityChanged {
            selector_id: self.config.id.clone(),
            package_id,
            quantity,
        });

        if self.config.mode == SelectionMode::Swap && self.selected == Some(card) {
            let result = if self.deps.cart.has_item(package_id) {
                self.deps.cart.update_quantity(package_id, quantity).await
            } else {
                self.deps.cart.add_item(request).await
            };
            if let Err(e) = result {
                self.report("quantity change", &e);
                if let Some(item) = self.items.iter_mut().find(|i| i.element == card) {
                    item.quantity = previous_quantity;
                }
                self.render(card);
            }
        }
    }

    // ---- selection state and DOM ---------------------------------------

    fn select_item(&mut self, card: NodeId) {
        let Some(package_id) = self.item(card).map(|i| i.package_id) else {
            return;
        };
        let previous = self.selected;
        let previous_package_id = self.selected_package();
        self.paint_selection(previous, Some(card));
        self.selected = Some(card);

        let mode = self.config.mode;
        self.deps.bus.emit(&SdkEvent::SelectorItemSelected {
            selector_id: self.config.id.clone(),
            package_id,
            previous_package_id,
            mode,
            pending_action: (mode == SelectionMode::Select).then_some(true),
        });
        self.deps.bus.emit(&SdkEvent::SelectorSelectionChanged {
            selector_id: self.config.id.clone(),
            package_id: Some(package_id),
        });
    }

    /// Undo a selection the cart refused.
    fn restore_selection(&mut self, previous: Option<NodeId>) {
        let previous = previous.filter(|card| self.item(*card).is_some());
        self.paint_selection(self.selected, previous);
        self.selected = previous;
        self.deps.bus.emit(&SdkEvent::SelectorSelectionChanged {
            selector_id: self.config.id.clone(),
            package_id: self.selected_package(),
        });
    }

    fn paint_selection(&self, from: Option<NodeId>, to: Option<NodeId>) {
        let package_id = to.and_then(|card| self.item(card)).map(|i| i.package_id);
        let mut doc = self.deps.document.write();
        if let Some(card) = from {
            doc.toggle_class(card, SELECTED_CLASS, false);
            doc.set_attr(card, SELECTED_ATTR, "false");
        }
        match (to, package_id) {
            (Some(card), Some(package_id)) => {
                doc.toggle_class(card, SELECTED_CLASS, true);
                doc.set_attr(card, SELECTED_ATTR, "true");
                doc.set_attr(self.root, SELECTED_PACKAGE_ATTR, package_id.to_string());
            }
            _ => {
                doc.remove_attr(self.root, SELECTED_PACKAGE_ATTR);
            }
        }
    }

    /// Write a card's in-cart flag, quantity display and button state.
    fn render(&self, card: NodeId) {
        let Some(item) = self.item(card) else {
            return;
        };
        let mut doc = self.deps.document.write();
        doc.toggle_class(card, IN_CART_CLASS, item.in_cart);
        doc.set_attr(card, IN_CART_ATTR, if item.in_cart { "true" } else { "false" });
        for display in doc.query_attr(card, QUANTITY_DISPLAY_ATTR) {
            doc.set_text(display, item.quantity.to_string());
        }
        for button in doc.query_attr(card, QUANTITY_INCREASE_ATTR) {
            doc.set_disabled(button, !item.can_increase());
        }
        for button in doc.query_attr(card, QUANTITY_DECREASE_ATTR) {
            doc.set_disabled(button, !item.can_decrease());
        }
    }

    fn report(&self, action: &str, err: &CartError) {
        error!(selector_id = %self.config.id, action, error = %err, "selector cart update failed");
        self.deps.bus.emit(&SdkEvent::ErrorOccurred {
            source: format!("package-selector:{}", self.config.id),
            message: err.to_string(),
        });
    }
}

/// Feed cart changes into `selector` until it is destroyed or the cart
/// goes away.
pub fn spawn_cart_sync(selector: SelectorHandle, mut changes: watch::Receiver<CartState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let state = changes.borrow_and_update().clone();
            let mut selector = selector.lock().await;
            if selector.is_destroyed() {
                break;
            }
            selector.sync_with_cart(&state).await;
        }
        debug!("selector cart sync stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_cart_core::dom::Document;
    use campaign_cart_core::stores::{InMemoryCampaignStore, InMemoryCartStore, InMemoryProfileStore};
    use campaign_cart_core::types::{PackageData, PackageProfile};
    use parking_lot::Mutex as SyncMutex;

    fn package(ref_id: PackageId, price: &str) -> PackageData {
        PackageData {
            ref_id,
            name: format!("Bundle {ref_id}"),
            price: price.into(),
            price_total: None,
            retail_price: None,
            qty: 1,
            image: None,
            product_id: None,
            product_name: None,
            product_sku: None,
            product_variant_id: None,
            product_variant_name: None,
            is_recurring: false,
        }
    }

    struct Page {
        deps: SelectorDeps,
        cart: Arc<InMemoryCartStore>,
        root: NodeId,
        events: Arc<SyncMutex<Vec<SdkEvent>>>,
    }

    fn page(mode: &str, profiles: Option<Arc<InMemoryProfileStore>>) -> Page {
        let mut doc = Document::at("https://shop.example.com/offer").unwrap();
        let root = doc.create_element("section");
        doc.set_attr(root, SELECTOR_ATTR, "");
        doc.set_attr(root, SELECTOR_ID_ATTR, "main");
        doc.set_attr(root, SELECTION_MODE_ATTR, mode);
        let body = doc.root();
        doc.append_child(body, root);

        let bus = EventBus::shared();
        let campaign = Arc::new(InMemoryCampaignStore::new("USD").with_packages([
            package(1, "10.00"),
            package(2, "20.00"),
            package(101, "8.00"),
        ]));
        let mut cart = InMemoryCartStore::new(campaign.clone(), bus.clone());
        if let Some(p) = &profiles {
            cart = cart.with_profiles(p.clone());
        }
        let cart = Arc::new(cart);

        let events = Arc::new(SyncMutex::new(Vec::new()));
        for name in ["selector:item-selected", "selector:selection-changed", "error:occurred"] {
            let sink = events.clone();
            bus.subscribe(name, move |e| {
                sink.lock().push(e.clone());
                Ok(())
            });
        }

        Page {
            deps: SelectorDeps {
                document: doc.into_shared(),
                bus,
                cart: cart.clone(),
                campaign,
                profiles: profiles.map(|p| p as Arc<dyn ProfileStore>),
                defaults: SelectorDefaults::default(),
            },
            cart,
            root,
            events,
        }
    }

    fn add_card(page: &Page, package_id: &str) -> NodeId {
        let mut doc = page.deps.document.write();
        let card = doc.create_element("div");
        doc.set_attr(card, CARD_ATTR, "");
        doc.set_attr(card, PACKAGE_ID_ATTR, package_id);
        doc.append_child(page.root, card);
        card
    }

    #[tokio::test]
    async fn test_select_mode_auto_selects_first_without_cart() {
        let page = page("select", None);
        let first = add_card(&page, "1");
        add_card(&page, "2");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;

        assert_eq!(selector.selected_package(), Some(1));
        assert!(page.cart.state().is_empty());
        let events = page.events.lock();
        assert!(matches!(
            &events[0],
            SdkEvent::SelectorItemSelected { pending_action: Some(true), mode: SelectionMode::Select, .. }
        ));
        drop(events);
        assert_eq!(page.deps.document.read().attr(first, SELECTED_ATTR), Some("true"));
    }

    #[tokio::test]
    async fn test_select_mode_click_leaves_cart_alone() {
        let page = page("select", None);
        add_card(&page, "1");
        let second = add_card(&page, "2");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;

        selector.handle_click(second).await;
        assert_eq!(selector.selected_package(), Some(2));
        assert!(page.cart.state().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_package_reverts_selection() {
        let page = page("swap", None);
        let good = add_card(&page, "1");
        let missing = add_card(&page, "999");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        selector.handle_click(good).await;
        assert_eq!(selector.selected_package(), Some(1));

        selector.handle_click(missing).await;
        assert_eq!(selector.selected_package(), Some(1));
        assert_eq!(page.cart.state().items[0].package_id, 1);
        let doc = page.deps.document.read();
        assert_eq!(doc.attr(missing, SELECTED_ATTR), Some("false"));
        assert_eq!(doc.attr(page.root, SELECTED_PACKAGE_ATTR), Some("1"));
        drop(doc);
        assert!(page
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, SdkEvent::ErrorOccurred { .. })));
    }

    #[tokio::test]
    async fn test_removed_selected_card_clears_selection() {
        let page = page("swap", None);
        let card = add_card(&page, "1");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        selector.handle_click(card).await;

        let mutation = page.deps.document.write().remove(card).unwrap();
        selector.handle_mutation(&mutation).await;
        assert!(selector.items().is_empty());
        assert_eq!(selector.selected_package(), None);
        assert_eq!(page.deps.document.read().attr(page.root, SELECTED_PACKAGE_ATTR), None);

        // Listeners went with the card.
        selector.handle_click(card).await;
        assert_eq!(selector.selected_package(), None);
    }

    #[tokio::test]
    async fn test_profile_remaps_card_unless_opted_out() {
        let profiles = Arc::new(InMemoryProfileStore::new());
        profiles.activate(PackageProfile::new("sale", [(1, 101)].into_iter().collect()));
        let page = page("swap", Some(profiles));
        let mapped = add_card(&page, "1");
        let plain = add_card(&page, "2");
        page.deps.document.write().set_attr(plain, APPLY_PROFILE_ATTR, "false");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;

        let item = selector.item(mapped).unwrap();
        assert_eq!(item.package_id, 101);
        assert_eq!(item.original_package_id, Some(1));
        assert_eq!(item.price, Some(8.0));

        selector.handle_click(mapped).await;
        let line = page.cart.state().items[0].clone();
        assert_eq!(line.package_id, 101);
        assert_eq!(line.original_package_id, Some(1));
        assert!(selector.item(mapped).unwrap().matches_line(&line));
    }

    #[tokio::test]
    async fn test_package_id_change_on_selected_card_swaps_cart() {
        let page = page("swap", None);
        let card = add_card(&page, "1");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        selector.handle_click(card).await;

        let mutation = page.deps.document.write().set_attr(card, PACKAGE_ID_ATTR, "2");
        selector.handle_mutation(&mutation).await;
        let state = page.cart.state();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].package_id, 2);
        assert_eq!(selector.selected_package(), Some(2));
        assert_eq!(page.deps.document.read().attr(page.root, SELECTED_PACKAGE_ATTR), Some("2"));
    }

    #[tokio::test]
    async fn test_rejected_package_id_change_keeps_cart_selection() {
        let page = page("swap", None);
        let card = add_card(&page, "1");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        selector.handle_click(card).await;

        let mutation = page.deps.document.write().set_attr(card, PACKAGE_ID_ATTR, "999");
        selector.handle_mutation(&mutation).await;

        let state = page.cart.state();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].package_id, 1);
        assert_eq!(selector.selected_package(), Some(1));
        let item = selector.item(card).unwrap();
        assert_eq!(item.name, "Bundle 1");
        assert!(item.in_cart);
        assert_eq!(page.deps.document.read().attr(page.root, SELECTED_PACKAGE_ATTR), Some("1"));
        assert!(page
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, SdkEvent::ErrorOccurred { .. })));
    }

    #[tokio::test]
    async fn test_refused_quantity_change_rolls_back_display() {
        let page = page("swap", None);
        page.cart.add_item(AddItemRequest::new(2, 1)).await.unwrap();
        let card = add_card(&page, "999");
        let (display, increase) = {
            let mut doc = page.deps.document.write();
            doc.set_attr(card, SELECTED_ATTR, "true");
            let display = doc.create_element("span");
            doc.set_attr(display, QUANTITY_DISPLAY_ATTR, "");
            doc.append_child(card, display);
            let increase = doc.create_element("button");
            doc.set_attr(increase, QUANTITY_INCREASE_ATTR, "");
            doc.append_child(card, increase);
            (display, increase)
        };
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        assert_eq!(selector.selected_package(), Some(999));

        selector.handle_click(increase).await;
        assert_eq!(selector.item(card).unwrap().quantity, 1);
        assert_eq!(page.deps.document.read().text(display), "1");
        assert!(!page.cart.has_item(999));
    }

    #[tokio::test]
    async fn test_destroy_makes_triggers_noops() {
        let page = page("swap", None);
        let card = add_card(&page, "1");
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        selector.destroy();

        selector.handle_click(card).await;
        selector.sync_with_cart(&page.cart.state()).await;
        assert!(selector.items().is_empty());
        assert!(page.cart.state().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_miss_reads_card_text() {
        let page = page("swap", None);
        let card = add_card(&page, "77");
        {
            let mut doc = page.deps.document.write();
            let name = doc.create_element("h3");
            doc.set_attr(name, PACKAGE_NAME_ATTR, "");
            doc.set_text(name, " Mystery Box ");
            doc.append_child(card, name);
            let price = doc.create_element("span");
            doc.set_attr(price, PACKAGE_PRICE_ATTR, "");
            doc.set_text(price, "$12.50");
            doc.append_child(card, price);
        }
        let mut selector = PackageSelector::new(page.root, page.deps.clone());
        selector.initialize().await;
        let item = selector.item(card).unwrap();
        assert_eq!(item.name, "Mystery Box");
        assert_eq!(item.price, Some(12.5));
    }
}
