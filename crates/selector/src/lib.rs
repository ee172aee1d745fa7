//! Package selector reconciler: keeps a group of package cards, the cart and
//! the DOM in agreement about which package the shopper has chosen.

pub mod config;
pub mod item;
pub mod reconciler;

pub use config::{CardConfig, SelectorConfig};
pub use item::SelectorItem;
pub use reconciler::{spawn_cart_sync, PackageSelector, SelectorDeps, SelectorHandle};
