use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Numeric campaign package reference id.
pub type PackageId = u32;

/// Campaign catalog entry for one purchasable package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageData {
    pub ref_id: PackageId,
    pub name: String,
    /// Unit price as delivered by the campaign API, e.g. `"19.99"`.
    pub price: String,
    #[serde(default)]
    pub price_total: Option<String>,
    #[serde(default)]
    pub retail_price: Option<String>,
    #[serde(default = "default_qty")]
    pub qty: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub product_id: Option<u32>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_sku: Option<String>,
    #[serde(default)]
    pub product_variant_id: Option<u32>,
    #[serde(default)]
    pub product_variant_name: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}

fn default_qty() -> u32 {
    1
}

impl PackageData {
    pub fn unit_price(&self) -> Option<f64> {
        parse_price(&self.price)
    }

    pub fn total_price(&self) -> Option<f64> {
        self.price_total.as_deref().and_then(parse_price)
    }
}

/// Parse a decimal price string ("19.99", "$19.99", "1,019.99").
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// One line in the cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub package_id: PackageId,
    /// The id the caller asked for before profile remapping, when it differs.
    #[serde(default)]
    pub original_package_id: Option<PackageId>,
    pub quantity: u32,
    pub price: f64,
    pub title: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub product_id: Option<u32>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub variant_id: Option<u32>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub is_upsell: bool,
}

impl CartItem {
    /// True when this line answers to `package_id` either directly or through
    /// the pre-remapping id.
    pub fn matches(&self, package_id: PackageId) -> bool {
        self.package_id == package_id || self.original_package_id == Some(package_id)
    }

    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CartTotals {
    pub subtotal: f64,
    pub shipping: f64,
    pub total: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CartState {
    pub items: Vec<CartItem>,
    pub totals: CartTotals,
    #[serde(default)]
    pub shipping_method: Option<u32>,
    pub currency: String,
}

impl CartState {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_item(&self, package_id: PackageId) -> bool {
        self.items.iter().any(|i| i.matches(package_id))
    }

    pub fn item(&self, package_id: PackageId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.matches(package_id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddItemRequest {
    pub package_id: PackageId,
    pub quantity: u32,
    #[serde(default)]
    pub is_upsell: bool,
}

impl AddItemRequest {
    pub fn new(package_id: PackageId, quantity: u32) -> Self {
        Self {
            package_id,
            quantity,
            is_upsell: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingMethod {
    pub ref_id: u32,
    pub code: String,
    pub price: String,
}

/// How a package selector applies a card choice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Selecting a card replaces whatever selector package is in the cart.
    #[default]
    Swap,
    /// Selecting a card only changes local state; a follow-up action commits it.
    Select,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::Swap => "swap",
            SelectionMode::Select => "select",
        }
    }
}

/// Named package-id remapping table (A/B tests, regional variants).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub package_mappings: HashMap<PackageId, PackageId>,
    #[serde(default)]
    pub reverse_mapping: Option<HashMap<PackageId, PackageId>>,
}

impl PackageProfile {
    pub fn new(id: impl Into<String>, package_mappings: HashMap<PackageId, PackageId>) -> Self {
        let reverse = package_mappings.iter().map(|(k, v)| (*v, *k)).collect();
        Self {
            id: id.into(),
            name: None,
            package_mappings,
            reverse_mapping: Some(reverse),
        }
    }

    /// Map an original id to this profile's id. Unmapped ids pass through.
    pub fn map(&self, package_id: PackageId) -> PackageId {
        self.package_mappings
            .get(&package_id)
            .copied()
            .unwrap_or(package_id)
    }

    /// Find the original id a mapped id came from.
    pub fn reverse(&self, mapped_id: PackageId) -> Option<PackageId> {
        match &self.reverse_mapping {
            Some(reverse) => reverse.get(&mapped_id).copied(),
            // Linear scan; profile tables are small.
            None => self
                .package_mappings
                .iter()
                .find(|(_, v)| **v == mapped_id)
                .map(|(k, _)| *k),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Live checkout form state used for user-property enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSnapshot {
    #[serde(default)]
    pub form_data: HashMap<String, String>,
    #[serde(default)]
    pub billing_address: Option<Address>,
}

/// Attribution fields forwarded with events and orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funnel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaffiliate1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaffiliate2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaffiliate3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaffiliate4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaffiliate5: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    #[serde(default)]
    pub package_id: Option<PackageId>,
    #[serde(default)]
    pub product_sku: Option<String>,
    #[serde(default)]
    pub product_title: Option<String>,
    #[serde(default)]
    pub price_incl_tax: Option<f64>,
    #[serde(default = "default_qty")]
    pub quantity: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub is_upsell: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderCustomer {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// A completed order as returned by the order API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub ref_id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub total_incl_tax: Option<f64>,
    #[serde(default)]
    pub total_tax: Option<f64>,
    #[serde(default)]
    pub shipping_incl_tax: Option<f64>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub vouchers: Vec<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub customer: Option<OrderCustomer>,
}

impl Order {
    /// The identifier shown to customers, falling back to the API reference.
    pub fn display_id(&self) -> &str {
        self.number.as_deref().unwrap_or(&self.ref_id)
    }
}

/// A post-purchase upsell offer or acceptance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpsellOffer {
    pub order_id: String,
    pub package_id: PackageId,
    #[serde(default = "default_qty")]
    pub quantity: u32,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub package_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price(" $1,019.50 "), Some(1019.5));
        assert_eq!(parse_price("free"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_cart_item_matches_original_id() {
        let item = CartItem {
            package_id: 102,
            original_package_id: Some(2),
            quantity: 1,
            price: 10.0,
            title: "Bottle".into(),
            image: None,
            sku: None,
            product_id: None,
            product_name: None,
            variant_id: None,
            variant_name: None,
            is_upsell: false,
        };
        assert!(item.matches(102));
        assert!(item.matches(2));
        assert!(!item.matches(3));
    }

    #[test]
    fn test_profile_mapping_idempotent_for_disjoint_ids() {
        let profile = PackageProfile::new("black-friday", HashMap::from([(1, 101), (2, 102)]));
        for id in [1, 2, 3] {
            let once = profile.map(id);
            assert_eq!(profile.map(once), once);
        }
        assert_eq!(profile.reverse(102), Some(2));
        assert_eq!(profile.reverse(5), None);
    }

    #[test]
    fn test_profile_reverse_linear_fallback() {
        let profile = PackageProfile {
            id: "eu".into(),
            name: None,
            package_mappings: HashMap::from([(1, 201)]),
            reverse_mapping: None,
        };
        assert_eq!(profile.reverse(201), Some(1));
    }

    #[test]
    fn test_package_price_parsing() {
        let pkg = PackageData {
            ref_id: 2,
            name: "Two Pack".into(),
            price: "19.99".into(),
            price_total: Some("39.98".into()),
            retail_price: None,
            qty: 2,
            image: None,
            product_id: None,
            product_name: None,
            product_sku: None,
            product_variant_id: None,
            product_variant_name: None,
            is_recurring: false,
        };
        assert_eq!(pkg.unit_price(), Some(19.99));
        assert_eq!(pkg.total_price(), Some(39.98));
    }
}
