//! Automatic `dl_view_item` / `dl_view_item_list` from the packages visible on
//! the page, plus scroll-depth milestones.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use campaign_cart_core::dom::{DomMutation, SharedDocument};
use campaign_cart_core::types::PackageId;

use crate::builder::ItemInput;
use crate::data_layer::DataLayerManager;
use crate::ecommerce::EcommerceEvents;

const PACKAGE_ATTR: &str = "data-next-package-id";
const META_VIEW_ITEM: &str = "next-analytics-view-item";
const META_VIEW_ITEM_LIST: &str = "next-analytics-view-item-list";
const META_SCROLL: &str = "next-analytics-scroll-tracking";

pub const SCROLL_THRESHOLDS: [u32; 4] = [25, 50, 75, 90];

pub struct ViewItemTracker {
    document: SharedDocument,
    data_layer: Arc<DataLayerManager>,
    events: Arc<EcommerceEvents>,
    seen: Mutex<HashSet<PackageId>>,
}

impl ViewItemTracker {
    pub fn new(document: SharedDocument, data_layer: Arc<DataLayerManager>, events: Arc<EcommerceEvents>) -> Self {
        Self {
            document,
            data_layer,
            events,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Visible package ids in document order, first occurrence only.
    fn visible_packages(&self) -> (Vec<PackageId>, Option<PackageId>, bool) {
        let doc = self.document.read();
        let forced = doc.meta(META_VIEW_ITEM).and_then(|raw| match raw.trim().parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(value = raw, "ignoring non-numeric next-analytics-view-item");
                None
            }
        });
        let lists_enabled = doc.meta(META_VIEW_ITEM_LIST) != Some("false");

        let mut ids = Vec::new();
        for node in doc.query_attr(doc.root(), PACKAGE_ATTR) {
            if !doc.is_visible(node) {
                continue;
            }
            match doc.attr(node, PACKAGE_ATTR).and_then(|v| v.trim().parse::<PackageId>().ok()) {
                Some(id) if !ids.contains(&id) => ids.push(id),
                Some(_) => {}
                None => debug!("package element without a numeric id"),
            }
        }
        (ids, forced, lists_enabled)
    }

    /// Fire view events for packages not seen yet. Returns how many events
    /// were pushed.
    pub fn scan(&self) -> usize {
        let (visible, forced, lists_enabled) = self.visible_packages();

        if let Some(id) = forced {
            if self.seen.lock().insert(id) {
                self.data_layer.push(self.events.view_item(&ItemInput::package(id, 1)));
                return 1;
            }
            return 0;
        }

        let fresh: Vec<PackageId> = {
            let mut seen = self.seen.lock();
            visible.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        if fresh.is_empty() {
            return 0;
        }

        if visible.len() == 1 {
            self.data_layer.push(self.events.view_item(&ItemInput::package(fresh[0], 1)));
            return 1;
        }
        if !lists_enabled {
            debug!(count = fresh.len(), "list views disabled by meta tag");
            return 0;
        }
        let inputs: Vec<ItemInput> = fresh.iter().map(|id| ItemInput::package(*id, 1)).collect();
        self.data_layer.push(self.events.view_item_list(&inputs, None));
        1
    }

    /// Rescan when packages may have appeared.
    pub fn on_mutation(&self, mutation: &DomMutation) -> usize {
        match mutation {
            DomMutation::ChildAdded { .. } => self.scan(),
            DomMutation::AttributeChanged { name, .. } if name == PACKAGE_ATTR || name == "hidden" => self.scan(),
            _ => 0,
        }
    }

    /// Forget what was seen (new route).
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

pub struct ScrollTracker {
    document: SharedDocument,
    data_layer: Arc<DataLayerManager>,
    events: Arc<EcommerceEvents>,
    fired: Mutex<BTreeSet<u32>>,
}

impl ScrollTracker {
    pub fn new(document: SharedDocument, data_layer: Arc<DataLayerManager>, events: Arc<EcommerceEvents>) -> Self {
        Self {
            document,
            data_layer,
            events,
            fired: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.document.read().meta(META_SCROLL) == Some("true")
    }

    /// Report a scroll position; returns the thresholds newly crossed.
    pub fn on_scroll(&self, scroll_top: f64, page_height: f64) -> Vec<u32> {
        if !self.is_enabled() || page_height <= 0.0 {
            return Vec::new();
        }
        let viewport = f64::from(self.document.read().viewport.height);
        let percent = ((scroll_top + viewport) / page_height * 100.0).clamp(0.0, 100.0);

        let crossed: Vec<u32> = {
            let mut fired = self.fired.lock();
            SCROLL_THRESHOLDS
                .iter()
                .copied()
                .filter(|t| f64::from(*t) <= percent && fired.insert(*t))
                .collect()
        };
        for threshold in &crossed {
            self.data_layer.push(self.events.scroll_depth(*threshold));
        }
        crossed
    }

    pub fn reset(&self) {
        self.fired.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::fixture;
    use campaign_cart_core::config::AnalyticsConfig;
    use campaign_cart_core::dom::{Document, NodeId};
    use campaign_cart_core::storage::StorageAdapter;
    use serde_json::Value;

    fn setup(doc: Document) -> (SharedDocument, Arc<DataLayerManager>, Arc<EcommerceEvents>) {
        let shared = doc.into_shared();
        let dl = Arc::new(DataLayerManager::new(
            &AnalyticsConfig::default(),
            StorageAdapter::memory(),
            StorageAdapter::memory(),
        ));
        let events = Arc::new(EcommerceEvents::new(fixture().builder));
        (shared, dl, events)
    }

    fn card(doc: &mut Document, package_id: &str) -> NodeId {
        let node = doc.create_element("div");
        doc.set_attr(node, PACKAGE_ATTR, package_id);
        let root = doc.root();
        doc.append_child(root, node);
        node
    }

    fn names(dl: &DataLayerManager) -> Vec<String> {
        dl.events()
            .iter()
            .map(|e| e["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_single_package_fires_view_item_once() {
        let mut doc = Document::at("https://shop.example.com/product").unwrap();
        card(&mut doc, "2");
        let (shared, dl, events) = setup(doc);
        let tracker = ViewItemTracker::new(shared, dl.clone(), events);
        assert_eq!(tracker.scan(), 1);
        assert_eq!(tracker.scan(), 0);
        assert_eq!(names(&dl), vec!["dl_view_item"]);
    }

    #[test]
    fn test_several_packages_fire_list_with_positions() {
        let mut doc = Document::at("https://shop.example.com/collections/all").unwrap();
        card(&mut doc, "1");
        card(&mut doc, "2");
        let hidden = card(&mut doc, "3");
        doc.set_attr(hidden, "hidden", "");
        let (shared, dl, events) = setup(doc);
        let tracker = ViewItemTracker::new(shared.clone(), dl.clone(), events);
        tracker.scan();

        let event = &dl.events()[0];
        assert_eq!(event["event"], "dl_view_item_list");
        let items = event["ecommerce"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["index"], 1);

        // Newly inserted card only reports itself.
        let mutation = {
            let mut doc = shared.write();
            let node = doc.create_element("div");
            doc.set_attr(node, PACKAGE_ATTR, "3");
            let root = doc.root();
            doc.append_child(root, node)
        };
        tracker.on_mutation(&mutation);
        let second = &dl.events()[1];
        assert_eq!(second["ecommerce"]["items"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_meta_overrides() {
        let mut doc = Document::at("https://shop.example.com/").unwrap();
        card(&mut doc, "1");
        card(&mut doc, "2");
        doc.set_meta(META_VIEW_ITEM_LIST, "false");
        let (shared, dl, events) = setup(doc);
        let tracker = ViewItemTracker::new(shared.clone(), dl.clone(), events);
        assert_eq!(tracker.scan(), 0);

        shared.write().set_meta(META_VIEW_ITEM, "3");
        tracker.reset();
        assert_eq!(tracker.scan(), 1);
        assert_eq!(dl.events()[0]["ecommerce"]["items"][0]["item_id"], Value::String("3".into()));
    }

    #[test]
    fn test_scroll_thresholds_fire_once() {
        let mut doc = Document::at("https://shop.example.com/").unwrap();
        doc.set_meta(META_SCROLL, "true");
        doc.viewport.height = 1000;
        let (shared, dl, events) = setup(doc);
        let scroll = ScrollTracker::new(shared, dl.clone(), events);

        assert_eq!(scroll.on_scroll(0.0, 4000.0), vec![25]);
        assert_eq!(scroll.on_scroll(2000.0, 4000.0), vec![50, 75]);
        assert!(scroll.on_scroll(1500.0, 4000.0).is_empty());
        assert_eq!(names(&dl).len(), 3);
        assert_eq!(dl.events()[2]["scroll_depth"], 75);
    }
}
