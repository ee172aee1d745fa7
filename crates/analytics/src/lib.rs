//! Analytics pipeline for the campaign cart SDK.
//!
//! Events are built from store state, funnelled through
//! [`DataLayerManager`], and fanned out to the registered providers.
//! [`Analytics`] wires everything for a page load.

pub mod auto_listener;
pub mod builder;
pub mod data_layer;
pub mod ecommerce;
pub mod events;
pub mod facade;
pub mod global;
pub mod list_attribution;
pub mod pending;
pub mod providers;
pub mod schema;
pub mod view_tracker;

pub use auto_listener::{AutoEventListener, Debouncer};
pub use builder::{EventBuilder, ItemInput, ListPlacement};
pub use data_layer::{DataLayerManager, EventTransform, PushOutcome};
pub use ecommerce::EcommerceEvents;
pub use events::{EcommerceItem, EventEnvelope, EventMetadata};
pub use facade::{Analytics, AnalyticsDeps, DisabledReason, Integrations};
pub use global::GlobalArray;
pub use list_attribution::{ListAttributionTracker, ListContext};
pub use pending::PendingEventsQueue;
pub use providers::{Delivery, Provider, ProviderGate};
pub use schema::{EventValidator, SchemaRegistry};
pub use view_tracker::{ScrollTracker, ViewItemTracker};
