//! `Analytics`: wires the pipeline together for one page load and exposes the
//! manual tracking API.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use campaign_cart_core::config::{SdkConfig, TrackingMode};
use campaign_cart_core::dom::{DomMutation, SharedDocument};
use campaign_cart_core::event_bus::EventBus;
use campaign_cart_core::storage::StorageAdapter;
use campaign_cart_core::stores::{AttributionStore, CampaignStore, CartStore, CheckoutStore};
use campaign_cart_core::types::{Order, PackageId, UpsellOffer};

use crate::auto_listener::AutoEventListener;
use crate::builder::{EventBuilder, ItemInput, ListPlacement};
use crate::data_layer::{DataLayerManager, PushOutcome};
use crate::ecommerce::EcommerceEvents;
use crate::events::EventEnvelope;
use crate::global::GlobalArray;
use crate::list_attribution::ListAttributionTracker;
use crate::providers::campaign::CampaignAdapter;
use crate::providers::facebook::{FacebookAdapter, PixelApi};
use crate::providers::gtm::GtmAdapter;
use crate::providers::rudderstack::{RudderApi, RudderStackAdapter};
use crate::providers::transport::{HttpTransport, LoggingTransport};
use crate::providers::webhook::WebhookAdapter;
use crate::providers::Provider;
use crate::view_tracker::{ScrollTracker, ViewItemTracker};

const IGNORE_KEY: &str = "analytics-ignore";

/// Page globals the adapters talk to. Anything missing disables the
/// provider that needs it.
#[derive(Default)]
pub struct Integrations {
    pub gtm_data_layer: Option<GlobalArray>,
    pub pixel: Option<Arc<dyn PixelApi>>,
    pub rudderstack: Option<Arc<dyn RudderApi>>,
    pub http: Option<Arc<dyn HttpTransport>>,
    /// Registered as-is after the configured providers.
    pub providers: Vec<Arc<dyn Provider>>,
}

/// Collaborators the host constructs once per page.
pub struct AnalyticsDeps {
    pub bus: Arc<EventBus>,
    pub document: SharedDocument,
    pub local: StorageAdapter,
    pub session: StorageAdapter,
    pub campaign: Arc<dyn CampaignStore>,
    pub cart: Arc<dyn CartStore>,
    pub checkout: Arc<dyn CheckoutStore>,
    pub attribution: Option<Arc<dyn AttributionStore>>,
    pub integrations: Integrations,
}

/// Why analytics is off for this page, if it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    Config,
    IgnoreFlag,
    MetaTag,
}

pub struct Analytics {
    enabled: bool,
    disabled_reason: Option<DisabledReason>,
    data_layer: Arc<DataLayerManager>,
    events: Arc<EcommerceEvents>,
    lists: Arc<ListAttributionTracker>,
    views: Arc<ViewItemTracker>,
    scroll: ScrollTracker,
    listener: Option<AutoEventListener>,
    webhook: Option<Arc<WebhookAdapter>>,
    cart: Arc<dyn CartStore>,
    document: SharedDocument,
}

impl Analytics {
    /// Gating, providers, `dl_user_data`, pending replay, view scan, then the
    /// auto listener (auto mode only).
    pub fn initialize(config: &SdkConfig, deps: AnalyticsDeps) -> Self {
        let analytics_config = &config.analytics;
        let disabled_reason = Self::gate(config, &deps.document, &deps.session);

        let mut data_layer = DataLayerManager::new(analytics_config, deps.local.clone(), deps.session.clone())
            .with_document(deps.document.clone());
        if let Some(attribution) = deps.attribution.clone() {
            data_layer = data_layer.with_attribution(attribution);
        }
        let data_layer = Arc::new(data_layer);

        let lists = Arc::new(ListAttributionTracker::new(
            deps.session.clone(),
            analytics_config.list_ttl_ms,
        ));
        let builder = Arc::new(EventBuilder::new(
            deps.campaign.clone(),
            deps.checkout.clone(),
            deps.session.clone(),
            lists.clone(),
            deps.document.clone(),
            analytics_config.store_name.clone(),
        ));
        let events = Arc::new(EcommerceEvents::new(builder));
        let views = Arc::new(ViewItemTracker::new(
            deps.document.clone(),
            data_layer.clone(),
            events.clone(),
        ));
        let scroll = ScrollTracker::new(deps.document.clone(), data_layer.clone(), events.clone());

        let mut analytics = Self {
            enabled: disabled_reason.is_none(),
            disabled_reason,
            data_layer,
            events,
            lists,
            views,
            scroll,
            listener: None,
            webhook: None,
            cart: deps.cart.clone(),
            document: deps.document.clone(),
        };
        if let Some(reason) = disabled_reason {
            info!(?reason, "analytics disabled for this page");
            return analytics;
        }

        let debugger = deps.document.read().query_param("debugger").as_deref() == Some("true");
        if debugger || config.debug {
            analytics.data_layer.set_debug_mode(true);
        }

        analytics.register_providers(config, &deps);

        analytics.data_layer.push(analytics.events.user_data(&deps.cart.state()));
        let replayed = analytics.data_layer.process_pending_events();
        if replayed > 0 {
            info!(replayed, "pending events delivered");
        }

        {
            let doc = deps.document.read().clone();
            analytics.lists.detect(&doc);
        }
        analytics.views.scan();

        if analytics_config.mode == TrackingMode::Auto {
            let listener = AutoEventListener::new(
                deps.bus.clone(),
                analytics.data_layer.clone(),
                analytics.events.clone(),
                deps.cart.clone(),
                analytics_config.debounce.clone(),
            )
            .with_view_tracker(analytics.views.clone());
            listener.start();
            analytics.listener = Some(listener);
        }

        info!(
            providers = ?analytics.data_layer.provider_names(),
            mode = ?analytics_config.mode,
            "analytics initialized"
        );
        analytics
    }

    fn gate(config: &SdkConfig, document: &SharedDocument, session: &StorageAdapter) -> Option<DisabledReason> {
        if !config.analytics.enabled {
            return Some(DisabledReason::Config);
        }
        let doc = document.read();
        if doc.query_param("ignore").as_deref() == Some("true") {
            session.set(IGNORE_KEY, &true);
        }
        if session.get_or(IGNORE_KEY, false) {
            return Some(DisabledReason::IgnoreFlag);
        }
        match doc.meta("next-analytics-disable") {
            Some(v) if v.trim() != "false" => Some(DisabledReason::MetaTag),
            _ => None,
        }
    }

    fn enable_only(document: &SharedDocument) -> Option<HashSet<String>> {
        let doc = document.read();
        let raw = doc.meta("next-analytics-enable-only")?;
        let names: HashSet<String> = raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            warn!("empty next-analytics-enable-only ignored");
            return None;
        }
        Some(names)
    }

    fn register_providers(&mut self, config: &SdkConfig, deps: &AnalyticsDeps) {
        let only = Self::enable_only(&deps.document);
        let allowed = |name: &str| only.as_ref().map_or(true, |set| set.contains(name));
        let integrations = &deps.integrations;
        let http: Arc<dyn HttpTransport> = integrations
            .http
            .clone()
            .unwrap_or_else(|| Arc::new(LoggingTransport));
        let providers = &config.providers;

        if let Some(gtm) = providers.gtm.clone().filter(|c| c.enabled && allowed("gtm")) {
            let array = integrations
                .gtm_data_layer
                .clone()
                .unwrap_or_else(|| GlobalArray::new("dataLayer"));
            let adapter = GtmAdapter::new(gtm, array);
            match adapter.validate_config() {
                Ok(()) => self.data_layer.register_provider(Arc::new(adapter)),
                Err(e) => warn!(error = %e, "GTM provider not registered"),
            }
        }

        if let Some(fb) = providers.facebook.clone().filter(|c| c.enabled && allowed("facebook")) {
            match &integrations.pixel {
                Some(pixel) => {
                    let adapter = FacebookAdapter::new(fb, pixel.clone(), self.events.builder().store_name());
                    match adapter.validate_config() {
                        Ok(()) => self.data_layer.register_provider(Arc::new(adapter)),
                        Err(e) => warn!(error = %e, "Facebook provider not registered"),
                    }
                }
                None => warn!("Facebook configured but no pixel is available"),
            }
        }

        if let Some(rs) = providers
            .rudderstack
            .clone()
            .filter(|c| c.enabled && allowed("rudderstack"))
        {
            match &integrations.rudderstack {
                Some(api) => self
                    .data_layer
                    .register_provider(Arc::new(RudderStackAdapter::new(rs, api.clone()))),
                None => warn!("RudderStack configured but no client is available"),
            }
        }

        if let Some(hook) = providers.webhook.clone().filter(|c| c.enabled && allowed("webhook")) {
            let adapter = Arc::new(WebhookAdapter::new(hook, http.clone()));
            match adapter.validate_config() {
                Ok(()) => {
                    if adapter.start().is_none() {
                        debug!("no runtime, webhook flushes only on demand");
                    }
                    self.data_layer.register_provider(adapter.clone());
                    self.webhook = Some(adapter);
                }
                Err(e) => warn!(error = %e, "webhook provider not registered"),
            }
        }

        if let Some(campaign) = providers.campaign.clone().filter(|c| c.enabled && allowed("campaign")) {
            let adapter = CampaignAdapter::new(campaign, http);
            match adapter.validate_config() {
                Ok(()) => self.data_layer.register_provider(Arc::new(adapter)),
                Err(e) => warn!(error = %e, "campaign provider not registered"),
            }
        }

        for provider in &integrations.providers {
            if allowed(&provider.name().to_lowercase()) {
                self.data_layer.register_provider(provider.clone());
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disabled_reason(&self) -> Option<DisabledReason> {
        self.disabled_reason
    }

    pub fn data_layer(&self) -> &Arc<DataLayerManager> {
        &self.data_layer
    }

    pub fn events(&self) -> &EcommerceEvents {
        &self.events
    }

    pub fn lists(&self) -> &ListAttributionTracker {
        &self.lists
    }

    pub fn view_tracker(&self) -> &ViewItemTracker {
        &self.views
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.data_layer.set_debug_mode(enabled);
    }

    fn push(&self, event: EventEnvelope) -> PushOutcome {
        if !self.enabled {
            debug!(event = %event.event, "analytics disabled, event ignored");
            return PushOutcome::Filtered;
        }
        self.data_layer.push(event)
    }

    pub fn track_view_item(&self, package_id: PackageId) -> PushOutcome {
        self.push(self.events.view_item(&ItemInput::package(package_id, 1)))
    }

    pub fn track_view_item_list(
        &self,
        package_ids: &[PackageId],
        list_id: Option<String>,
        list_name: Option<String>,
    ) -> PushOutcome {
        let inputs: Vec<ItemInput> = package_ids.iter().map(|id| ItemInput::package(*id, 1)).collect();
        let list = (list_id.is_some() || list_name.is_some()).then_some(ListPlacement { list_id, list_name });
        self.push(self.events.view_item_list(&inputs, list))
    }

    pub fn track_add_to_cart(&self, package_id: PackageId, quantity: u32) -> PushOutcome {
        self.push(self.events.add_to_cart(&ItemInput::package(package_id, quantity), None))
    }

    pub fn track_remove_from_cart(&self, package_id: PackageId, quantity: u32) -> PushOutcome {
        self.push(self.events.remove_from_cart(&ItemInput::package(package_id, quantity)))
    }

    pub fn track_view_cart(&self) -> PushOutcome {
        self.push(self.events.view_cart(&self.cart.state()))
    }

    pub fn track_begin_checkout(&self) -> PushOutcome {
        self.push(self.events.begin_checkout(&self.cart.state()))
    }

    pub fn track_add_shipping_info(&self, shipping_tier: &str) -> PushOutcome {
        self.push(self.events.add_shipping_info(&self.cart.state(), shipping_tier))
    }

    pub fn track_add_payment_info(&self, payment_type: &str) -> PushOutcome {
        self.push(self.events.add_payment_info(&self.cart.state(), payment_type))
    }

    pub fn track_purchase(&self, order: &Order) -> PushOutcome {
        if let Some(customer) = &order.customer {
            let mut user = Map::new();
            if let Some(email) = &customer.email {
                user.insert("customer_email".into(), json!(email));
            }
            if let Some(first) = &customer.first_name {
                user.insert("customer_first_name".into(), json!(first));
            }
            if let Some(last) = &customer.last_name {
                user.insert("customer_last_name".into(), json!(last));
            }
            self.events.builder().remember_user(user);
        }
        self.push(self.events.purchase(order, &self.cart.state()))
    }

    pub fn track_view_search_results(&self, term: &str, package_ids: &[PackageId]) -> PushOutcome {
        let results: Vec<ItemInput> = package_ids.iter().map(|id| ItemInput::package(*id, 1)).collect();
        self.push(self.events.view_search_results(term, &results))
    }

    pub fn track_login(&self, method: &str) -> PushOutcome {
        self.push(self.events.login(method))
    }

    pub fn track_sign_up(&self, method: &str) -> PushOutcome {
        self.push(self.events.sign_up(method))
    }

    pub fn track_custom(&self, name: &str, fields: Map<String, Value>) -> PushOutcome {
        self.push(self.events.custom(name, fields))
    }

    pub fn track_viewed_upsell(&self, order_id: &str, package_id: PackageId) -> PushOutcome {
        self.push(self.events.viewed_upsell(order_id, package_id))
    }

    pub fn track_accepted_upsell(&self, offer: &UpsellOffer) -> PushOutcome {
        self.push(self.events.accepted_upsell(offer))
    }

    pub fn track_skipped_upsell(&self, order_id: &str, package_id: Option<PackageId>) -> PushOutcome {
        self.push(self.events.skipped_upsell(order_id, package_id))
    }

    /// In-app navigation: refresh page context and list attribution, then
    /// rescan for visible packages.
    pub fn on_route_change(&self) {
        if !self.enabled {
            return;
        }
        self.data_layer.invalidate_context();
        let doc = self.document.read().clone();
        self.lists.detect(&doc);
        self.views.reset();
        self.scroll.reset();
        self.views.scan();
    }

    pub fn on_mutation(&self, mutation: &DomMutation) {
        if self.enabled {
            self.views.on_mutation(mutation);
        }
    }

    pub fn on_scroll(&self, scroll_top: f64, page_height: f64) -> Vec<u32> {
        if !self.enabled {
            return Vec::new();
        }
        self.scroll.on_scroll(scroll_top, page_height)
    }

    /// Push out anything the webhook is still holding.
    pub async fn flush(&self) -> usize {
        match &self.webhook {
            Some(hook) => hook.flush().await,
            None => 0,
        }
    }
}
