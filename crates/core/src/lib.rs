//! Shared foundation for the campaign cart SDK: configuration, errors, the
//! event bus, storage, the document model and the external store contracts.

pub mod config;
pub mod dom;
pub mod error;
pub mod event_bus;
pub mod storage;
pub mod stores;
pub mod types;

pub use config::SdkConfig;
pub use dom::{Document, DomMutation, NodeId, SharedDocument};
pub use error::{CartError, CartResult, SdkError, SdkResult, StorageError};
pub use event_bus::{EventBus, SdkEvent, SubscriptionId};
pub use storage::{MemoryBackend, StorageAdapter, StorageBackend};
pub use stores::{
    AttributionStore, CampaignStore, CartStore, CheckoutStore, InMemoryAttributionStore,
    InMemoryCampaignStore, InMemoryCartStore, InMemoryCheckoutStore, InMemoryProfileStore,
    ProfileStore,
};
pub use types::{PackageId, SelectionMode};
