//! Data-attribute parsing for selectors and their cards. Attributes are read
//! once per registration; anything malformed falls back to a default with a
//! warning.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use campaign_cart_core::config::SelectorDefaults;
use campaign_cart_core::dom::{Document, NodeId};
use campaign_cart_core::types::{PackageId, SelectionMode};

pub const SELECTOR_ATTR: &str = "data-next-cart-selector";
pub const SELECTOR_ID_ATTR: &str = "data-next-selector-id";
pub const SELECTION_MODE_ATTR: &str = "data-next-selection-mode";
pub const SELECTED_PACKAGE_ATTR: &str = "data-selected-package";

pub const CARD_ATTR: &str = "data-next-selector-card";
pub const PACKAGE_ID_ATTR: &str = "data-next-package-id";
pub const QUANTITY_ATTR: &str = "data-next-quantity";
pub const SELECTED_ATTR: &str = "data-next-selected";
pub const SHIPPING_ID_ATTR: &str = "data-next-shipping-id";
pub const MIN_QUANTITY_ATTR: &str = "data-next-min-quantity";
pub const MAX_QUANTITY_ATTR: &str = "data-next-max-quantity";
pub const APPLY_PROFILE_ATTR: &str = "data-next-apply-profile";
pub const IN_CART_ATTR: &str = "data-next-in-cart";

pub const QUANTITY_DISPLAY_ATTR: &str = "data-next-quantity-display";
pub const QUANTITY_INCREASE_ATTR: &str = "data-next-quantity-increase";
pub const QUANTITY_DECREASE_ATTR: &str = "data-next-quantity-decrease";
pub const PACKAGE_NAME_ATTR: &str = "data-next-package-name";
pub const PACKAGE_PRICE_ATTR: &str = "data-next-package-price";

pub const SELECTED_CLASS: &str = "next-selected";
pub const IN_CART_CLASS: &str = "next-in-cart";

/// Card attributes whose change re-registers the card.
pub const CARD_FIELD_ATTRS: &[&str] = &[
    PACKAGE_ID_ATTR,
    QUANTITY_ATTR,
    SHIPPING_ID_ATTR,
    MIN_QUANTITY_ATTR,
    MAX_QUANTITY_ATTR,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorConfig {
    pub id: String,
    pub mode: SelectionMode,
}

impl SelectorConfig {
    pub fn parse(doc: &Document, node: NodeId, defaults: &SelectorDefaults) -> Self {
        let id = doc
            .attr(node, SELECTOR_ID_ATTR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("selector-{}", &Uuid::new_v4().simple().to_string()[..8]));
        let raw_mode = doc
            .attr(node, SELECTION_MODE_ATTR)
            .unwrap_or(defaults.mode.as_str());
        Self {
            mode: parse_mode(raw_mode, &id),
            id,
        }
    }
}

fn parse_mode(raw: &str, selector_id: &str) -> SelectionMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "swap" | "" => SelectionMode::Swap,
        "select" => SelectionMode::Select,
        other => {
            warn!(selector_id, mode = other, "unknown selection mode, using swap");
            SelectionMode::Swap
        }
    }
}

/// Everything a card declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConfig {
    pub package_id: PackageId,
    pub quantity: u32,
    pub min_quantity: u32,
    pub max_quantity: u32,
    pub pre_selected: bool,
    pub shipping_id: Option<u32>,
    pub apply_profile: bool,
}

impl CardConfig {
    /// `None` when the card has no usable package id.
    pub fn parse(doc: &Document, node: NodeId, defaults: &SelectorDefaults) -> Option<Self> {
        let package_id = match numeric::<PackageId>(doc, node, PACKAGE_ID_ATTR) {
            Some(id) => id,
            None => {
                warn!(attr = PACKAGE_ID_ATTR, "selector card without a numeric package id ignored");
                return None;
            }
        };
        let min_quantity = numeric(doc, node, MIN_QUANTITY_ATTR)
            .unwrap_or(defaults.min_quantity)
            .max(1);
        let mut max_quantity = numeric(doc, node, MAX_QUANTITY_ATTR).unwrap_or(defaults.max_quantity);
        if max_quantity < min_quantity {
            warn!(package_id, min_quantity, max_quantity, "max quantity below min, using min");
            max_quantity = min_quantity;
        }
        let quantity = numeric(doc, node, QUANTITY_ATTR)
            .unwrap_or(1)
            .clamp(min_quantity, max_quantity);

        Some(Self {
            package_id,
            quantity,
            min_quantity,
            max_quantity,
            pre_selected: doc.attr(node, SELECTED_ATTR).map(str::trim) == Some("true"),
            shipping_id: numeric(doc, node, SHIPPING_ID_ATTR),
            apply_profile: doc.attr(node, APPLY_PROFILE_ATTR).map(str::trim) != Some("false"),
        })
    }
}

fn numeric<T: std::str::FromStr>(doc: &Document, node: NodeId, attr: &str) -> Option<T> {
    let raw = doc.attr(node, attr)?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(attr, value = raw, "non-numeric attribute ignored");
            None
        }
    }
}
