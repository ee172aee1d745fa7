use serde::Serialize;

use campaign_cart_core::dom::NodeId;
use campaign_cart_core::types::{CartItem, PackageId};

use crate::config::CardConfig;

/// One registered card.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorItem {
    #[serde(skip)]
    pub element: NodeId,
    /// Canonical id after profile remapping.
    pub package_id: PackageId,
    /// Id the card declared when a profile remapped it.
    pub original_package_id: Option<PackageId>,
    pub quantity: u32,
    pub min_quantity: u32,
    pub max_quantity: u32,
    pub price: Option<f64>,
    pub name: String,
    pub is_pre_selected: bool,
    pub shipping_id: Option<u32>,
    pub in_cart: bool,
}

impl SelectorItem {
    pub fn new(element: NodeId, card: &CardConfig, package_id: PackageId) -> Self {
        Self {
            element,
            package_id,
            original_package_id: (package_id != card.package_id).then_some(card.package_id),
            quantity: card.quantity,
            min_quantity: card.min_quantity,
            max_quantity: card.max_quantity,
            price: None,
            name: String::new(),
            is_pre_selected: card.pre_selected,
            shipping_id: card.shipping_id,
            in_cart: false,
        }
    }

    /// Refresh from re-parsed attributes; selection and cart flags are kept.
    pub fn update(&mut self, card: &CardConfig, package_id: PackageId) {
        self.package_id = package_id;
        self.original_package_id = (package_id != card.package_id).then_some(card.package_id);
        self.quantity = card.quantity;
        self.min_quantity = card.min_quantity;
        self.max_quantity = card.max_quantity;
        self.shipping_id = card.shipping_id;
    }

    /// The id to hand the cart, which applies profile mapping itself.
    pub fn request_id(&self) -> PackageId {
        self.original_package_id.unwrap_or(self.package_id)
    }

    /// Does a cart line stand for this card, directly or through a profile?
    pub fn matches_line(&self, line: &CartItem) -> bool {
        line.matches(self.package_id) || self.original_package_id.is_some_and(|id| line.matches(id))
    }

    pub fn clamp(&self, quantity: i64) -> u32 {
        let clamped = quantity.clamp(i64::from(self.min_quantity), i64::from(self.max_quantity));
        u32::try_from(clamped).unwrap_or(self.min_quantity)
    }

    pub fn can_increase(&self) -> bool {
        self.quantity < self.max_quantity
    }

    pub fn can_decrease(&self) -> bool {
        self.quantity > self.min_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_cart_core::dom::Document;

    fn line(package_id: PackageId, original: Option<PackageId>) -> CartItem {
        CartItem {
            package_id,
            original_package_id: original,
            quantity: 1,
            price: 10.0,
            title: "Line".into(),
            image: None,
            sku: None,
            product_id: None,
            product_name: None,
            variant_id: None,
            variant_name: None,
            is_upsell: false,
        }
    }

    fn card(package_id: PackageId) -> CardConfig {
        CardConfig {
            package_id,
            quantity: 1,
            min_quantity: 1,
            max_quantity: 3,
            pre_selected: false,
            shipping_id: None,
            apply_profile: true,
        }
    }

    #[test]
    fn test_remapped_item_matches_either_id() {
        let mut doc = Document::at("https://shop.example.com/").unwrap();
        let node = doc.create_element("div");
        let item = SelectorItem::new(node, &card(1), 101);
        assert_eq!(item.original_package_id, Some(1));
        assert_eq!(item.request_id(), 1);
        assert!(item.matches_line(&line(101, None)));
        assert!(item.matches_line(&line(55, Some(1))));
        assert!(!item.matches_line(&line(2, None)));
    }

    #[test]
    fn test_quantity_bounds() {
        let mut doc = Document::at("https://shop.example.com/").unwrap();
        let node = doc.create_element("div");
        let mut item = SelectorItem::new(node, &card(4), 4);
        assert!(!item.can_decrease());
        assert!(item.can_increase());
        assert_eq!(item.clamp(-4), 1);
        assert_eq!(item.clamp(10), 3);
        item.quantity = 3;
        assert!(!item.can_increase());
    }
}
