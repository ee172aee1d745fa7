//! One constructor per `dl_*` event. Each assembles the right `ecommerce`
//! sub-shape from cart, catalog and order data and hands it to
//! [`EventBuilder::create_event`].

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use campaign_cart_core::types::{CartItem, CartState, Order, PackageId, UpsellOffer};

use crate::builder::{EventBuilder, ItemInput, ListPlacement};
use crate::events::{self, Ecommerce, EcommerceItem, EventEnvelope};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn items_value(items: &[EcommerceItem]) -> f64 {
    round2(items.iter().map(|i| i.price * f64::from(i.quantity)).sum())
}

pub struct EcommerceEvents {
    builder: Arc<EventBuilder>,
}

impl EcommerceEvents {
    pub fn new(builder: Arc<EventBuilder>) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &EventBuilder {
        &self.builder
    }

    fn event(&self, name: &str, ecommerce: Option<Ecommerce>, extra: Map<String, Value>) -> EventEnvelope {
        let mut event = self.builder.create_event(name, extra);
        if ecommerce.is_some() {
            event.ecommerce = ecommerce;
        }
        event
    }

    fn cart_items(&self, cart: &CartState) -> Vec<EcommerceItem> {
        cart.items
            .iter()
            .enumerate()
            .map(|(i, item)| self.builder.format_ecommerce_item(&ItemInput::from(item), Some(i), None))
            .collect()
    }

    fn cart_ecommerce(&self, cart: &CartState) -> Ecommerce {
        let items = self.cart_items(cart);
        let value = if cart.totals.total > 0.0 {
            round2(cart.totals.total)
        } else {
            items_value(&items)
        };
        Ecommerce::new(self.builder.currency(), value, items)
    }

    /// Fired first on every initialized page.
    pub fn user_data(&self, cart: &CartState) -> EventEnvelope {
        let extra = fields([
            ("cart_total", json!(round2(cart.totals.total))),
            ("cart_item_count", json!(cart.totals.count)),
        ]);
        self.event(events::DL_USER_DATA, None, extra)
    }

    pub fn view_item_list(&self, items: &[ItemInput], list: Option<ListPlacement>) -> EventEnvelope {
        let list = list.or_else(|| self.builder.lists().current().map(ListPlacement::from));
        let formatted: Vec<EcommerceItem> = items
            .iter()
            .enumerate()
            .map(|(i, input)| self.builder.format_ecommerce_item(input, Some(i), list.as_ref()))
            .collect();
        let mut ecommerce = Ecommerce::new(self.builder.currency(), items_value(&formatted), formatted);
        if let Some(list) = list {
            ecommerce.item_list_id = list.list_id;
            ecommerce.item_list_name = list.list_name;
        }
        self.event(events::DL_VIEW_ITEM_LIST, Some(ecommerce), Map::new())
    }

    pub fn view_item(&self, item: &ItemInput) -> EventEnvelope {
        let formatted = self.builder.format_ecommerce_item(item, None, None);
        let value = round2(formatted.price * f64::from(formatted.quantity));
        let ecommerce = Ecommerce::new(self.builder.currency(), value, vec![formatted]);
        self.event(events::DL_VIEW_ITEM, Some(ecommerce), Map::new())
    }

    pub fn add_to_cart(&self, item: &ItemInput, list: Option<ListPlacement>) -> EventEnvelope {
        let formatted = self.builder.format_ecommerce_item(item, None, list.as_ref());
        let value = round2(formatted.price * f64::from(formatted.quantity));
        let ecommerce = Ecommerce::new(self.builder.currency(), value, vec![formatted]);
        self.event(events::DL_ADD_TO_CART, Some(ecommerce), Map::new())
    }

    pub fn remove_from_cart(&self, item: &ItemInput) -> EventEnvelope {
        let formatted = self.builder.format_ecommerce_item(item, None, None);
        let value = round2(formatted.price * f64::from(formatted.quantity));
        let ecommerce = Ecommerce::new(self.builder.currency(), value, vec![formatted]);
        self.event(events::DL_REMOVE_FROM_CART, Some(ecommerce), Map::new())
    }

    pub fn view_cart(&self, cart: &CartState) -> EventEnvelope {
        self.event(events::DL_VIEW_CART, Some(self.cart_ecommerce(cart)), Map::new())
    }

    pub fn begin_checkout(&self, cart: &CartState) -> EventEnvelope {
        self.event(events::DL_BEGIN_CHECKOUT, Some(self.cart_ecommerce(cart)), Map::new())
    }

    pub fn add_shipping_info(&self, cart: &CartState, shipping_tier: &str) -> EventEnvelope {
        let mut ecommerce = self.cart_ecommerce(cart);
        ecommerce.shipping_tier = Some(shipping_tier.to_string());
        ecommerce.shipping = Some(round2(cart.totals.shipping));
        self.event(events::DL_ADD_SHIPPING_INFO, Some(ecommerce), Map::new())
    }

    pub fn add_payment_info(&self, cart: &CartState, payment_type: &str) -> EventEnvelope {
        let mut ecommerce = self.cart_ecommerce(cart);
        ecommerce.payment_type = Some(payment_type.to_string());
        self.event(events::DL_ADD_PAYMENT_INFO, Some(ecommerce), Map::new())
    }

    /// Order lines win over cart items; money fields come from the order with
    /// cart fallbacks. Clears list attribution and flags the event for
    /// delivery after the confirmation redirect.
    pub fn purchase(&self, order: &Order, cart: &CartState) -> EventEnvelope {
        let items: Vec<EcommerceItem> = if order.lines.is_empty() {
            self.cart_items(cart)
        } else {
            order
                .lines
                .iter()
                .filter(|line| !line.is_upsell)
                .enumerate()
                .map(|(i, line)| self.builder.format_ecommerce_item(&ItemInput::from(line), Some(i), None))
                .collect()
        };

        let value = order
            .total_incl_tax
            .or((cart.totals.total > 0.0).then_some(cart.totals.total))
            .unwrap_or_else(|| items_value(&items));
        let shipping = order.shipping_incl_tax.unwrap_or(cart.totals.shipping);

        let mut ecommerce = Ecommerce::new(
            order.currency.clone().unwrap_or_else(|| self.builder.currency()),
            round2(value),
            items,
        );
        ecommerce.transaction_id = Some(order.display_id().to_string());
        ecommerce.affiliation = Some(self.builder.store_name());
        ecommerce.tax = Some(round2(order.total_tax.unwrap_or(0.0)));
        ecommerce.shipping = Some(round2(shipping));
        if !order.vouchers.is_empty() {
            ecommerce.coupon = Some(order.vouchers.join(","));
        }
        ecommerce.payment_type = order.payment_method.clone();
        ecommerce.shipping_tier = order.shipping_method.clone();

        let extra = fields([("order_id", json!(order.ref_id))]);
        let event = self.event(events::DL_PURCHASE, Some(ecommerce), extra).redirecting();
        self.builder.lists().clear();
        debug!(order_id = %order.ref_id, "list attribution cleared after purchase");
        event
    }

    pub fn package_swapped(&self, previous: &CartItem, new: &CartItem, price_difference: f64) -> EventEnvelope {
        let removed = self
            .builder
            .format_ecommerce_item(&ItemInput::from(previous), Some(0), None);
        let added = self.builder.format_ecommerce_item(&ItemInput::from(new), Some(0), None);
        let value = round2(added.price * f64::from(added.quantity));
        let mut ecommerce = Ecommerce::new(self.builder.currency(), value, vec![added.clone()]);
        ecommerce.items_removed = Some(vec![removed]);
        ecommerce.items_added = Some(vec![added]);
        let extra = fields([("price_difference", json!(round2(price_difference)))]);
        self.event(events::DL_PACKAGE_SWAPPED, Some(ecommerce), extra)
    }

    pub fn viewed_upsell(&self, order_id: &str, package_id: PackageId) -> EventEnvelope {
        let item = self
            .builder
            .format_ecommerce_item(&ItemInput::package(package_id, 1), Some(0), None);
        let upsell = json!({
            "package_id": package_id,
            "package_name": item.item_name,
            "quantity": 1,
            "value": item.price,
        });
        let ecommerce = Ecommerce::new(self.builder.currency(), item.price, vec![item]);
        let extra = fields([("order_id", json!(order_id)), ("upsell", upsell)]);
        self.event(events::DL_VIEWED_UPSELL, Some(ecommerce), extra)
    }

    /// Transaction id is `{order}-US{n}` with `n` counted per order in
    /// session storage.
    pub fn accepted_upsell(&self, offer: &UpsellOffer) -> EventEnvelope {
        let counter_key = format!("upsell-counter-{}", offer.order_id);
        let n: u32 = self.builder.session_storage().get_or(&counter_key, 0u32) + 1;
        self.builder.session_storage().set(&counter_key, &n);
        let transaction_id = format!("{}-US{}", offer.order_id, n);

        let input = ItemInput {
            name: offer.package_name.clone(),
            ..ItemInput::package(offer.package_id, offer.quantity)
        };
        let item = self.builder.format_ecommerce_item(&input, Some(0), None);
        let value = round2(
            offer
                .value
                .unwrap_or(item.price * f64::from(item.quantity)),
        );
        let upsell = json!({
            "package_id": offer.package_id,
            "package_name": offer.package_name.clone().unwrap_or_else(|| item.item_name.clone()),
            "quantity": offer.quantity,
            "value": value,
        });
        let mut ecommerce = Ecommerce::new(self.builder.currency(), value, vec![item]);
        ecommerce.transaction_id = Some(transaction_id);
        ecommerce.affiliation = Some(self.builder.store_name());

        let extra = fields([("order_id", json!(offer.order_id)), ("upsell", upsell)]);
        self.event(events::DL_ACCEPTED_UPSELL, Some(ecommerce), extra)
            .redirecting()
    }

    pub fn skipped_upsell(&self, order_id: &str, package_id: Option<PackageId>) -> EventEnvelope {
        let mut extra = fields([("order_id", json!(order_id))]);
        if let Some(id) = package_id {
            extra.insert("upsell".into(), json!({ "package_id": id }));
        }
        self.event(events::DL_SKIPPED_UPSELL, None, extra)
    }

    pub fn view_search_results(&self, term: &str, results: &[ItemInput]) -> EventEnvelope {
        let items: Vec<EcommerceItem> = results
            .iter()
            .enumerate()
            .map(|(i, input)| self.builder.format_ecommerce_item(input, Some(i), None))
            .collect();
        let ecommerce = (!items.is_empty()).then(|| {
            let value = items_value(&items);
            Ecommerce::new(self.builder.currency(), value, items)
        });
        let extra = fields([("search_term", json!(term))]);
        self.event(events::DL_VIEW_SEARCH_RESULTS, ecommerce, extra)
    }

    pub fn login(&self, method: &str) -> EventEnvelope {
        self.event(events::DL_LOGIN, None, fields([("method", json!(method))]))
    }

    pub fn sign_up(&self, method: &str) -> EventEnvelope {
        self.event(events::DL_SIGN_UP, None, fields([("method", json!(method))]))
    }

    pub fn scroll_depth(&self, percent: u32) -> EventEnvelope {
        self.event(events::DL_SCROLL_DEPTH, None, fields([("scroll_depth", json!(percent))]))
    }

    pub fn custom(&self, name: &str, extra: Map<String, Value>) -> EventEnvelope {
        self.builder.create_event(name, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::{fixture, Fixture};
    use crate::list_attribution::ListContext;
    use campaign_cart_core::types::{CartTotals, OrderLine};

    fn events() -> (EcommerceEvents, Fixture) {
        let f = fixture();
        (EcommerceEvents::new(f.builder.clone()), f)
    }

    fn cart_item(package_id: PackageId, price: f64, quantity: u32) -> CartItem {
        CartItem {
            package_id,
            original_package_id: None,
            quantity,
            price,
            title: format!("Package {package_id}"),
            image: None,
            sku: None,
            product_id: None,
            product_name: None,
            variant_id: None,
            variant_name: None,
            is_upsell: false,
        }
    }

    #[test]
    fn test_add_to_cart_price_is_numeric() {
        let (ev, _) = events();
        let event = ev.add_to_cart(&ItemInput::package(2, 1), None);
        let json = event.to_value();
        let item = &json["ecommerce"]["items"][0];
        assert_eq!(item["price"].as_f64(), Some(19.99));
        assert!(item["price"].is_number());
        assert_eq!(item["quantity"], 1);
        assert_eq!(json["ecommerce"]["value"], 19.99);
    }

    #[test]
    fn test_purchase_prefers_order_lines_and_clears_list() {
        let (ev, f) = events();
        f.lists.set_list(Some("summer".into()), None, "https://shop.example.com/collections/summer");

        let order = Order {
            ref_id: "ORD-1".into(),
            total_incl_tax: Some(64.97),
            total_tax: Some(5.0),
            shipping_incl_tax: Some(4.99),
            lines: vec![
                OrderLine {
                    package_id: Some(3),
                    quantity: 2,
                    ..OrderLine::default()
                },
                OrderLine {
                    package_id: Some(1),
                    quantity: 1,
                    is_upsell: true,
                    ..OrderLine::default()
                },
            ],
            ..Order::default()
        };
        let cart = CartState {
            items: vec![cart_item(1, 10.0, 1)],
            totals: CartTotals {
                subtotal: 10.0,
                shipping: 0.0,
                total: 10.0,
                count: 1,
            },
            shipping_method: None,
            currency: "USD".into(),
        };

        let event = ev.purchase(&order, &cart);
        let ecommerce = event.ecommerce.as_ref().unwrap();
        assert_eq!(ecommerce.transaction_id.as_deref(), Some("ORD-1"));
        assert_eq!(ecommerce.items.len(), 1);
        assert_eq!(ecommerce.items[0].item_id, "3");
        assert_eq!(ecommerce.value, Some(64.97));
        assert_eq!(ecommerce.shipping, Some(4.99));
        assert!(event.will_redirect);
        assert!(f.lists.current().is_none());
    }

    #[test]
    fn test_purchase_falls_back_to_cart() {
        let (ev, _) = events();
        let order = Order {
            ref_id: "ORD-2".into(),
            ..Order::default()
        };
        let cart = CartState {
            items: vec![cart_item(2, 19.99, 2)],
            totals: CartTotals {
                subtotal: 39.98,
                shipping: 5.0,
                total: 44.98,
                count: 2,
            },
            shipping_method: Some(1),
            currency: "USD".into(),
        };
        let ecommerce = ev.purchase(&order, &cart).ecommerce.unwrap();
        assert_eq!(ecommerce.value, Some(44.98));
        assert_eq!(ecommerce.shipping, Some(5.0));
        assert_eq!(ecommerce.items[0].quantity, 2);
    }

    #[test]
    fn test_accepted_upsell_counter_per_order() {
        let (ev, _) = events();
        let offer = UpsellOffer {
            order_id: "ORD-7".into(),
            package_id: 3,
            quantity: 1,
            value: Some(29.99),
            package_name: None,
        };
        let first = ev.accepted_upsell(&offer);
        let second = ev.accepted_upsell(&offer);
        assert_eq!(
            first.ecommerce.as_ref().unwrap().transaction_id.as_deref(),
            Some("ORD-7-US1")
        );
        assert_eq!(
            second.ecommerce.as_ref().unwrap().transaction_id.as_deref(),
            Some("ORD-7-US2")
        );
        assert!(first.will_redirect);
        assert_eq!(first.field("upsell").unwrap()["value"], 29.99);

        let other = UpsellOffer {
            order_id: "ORD-8".into(),
            ..offer
        };
        assert_eq!(
            ev.accepted_upsell(&other).ecommerce.unwrap().transaction_id.as_deref(),
            Some("ORD-8-US1")
        );
    }

    #[test]
    fn test_package_swapped_lists_both_sides() {
        let (ev, _) = events();
        let event = ev.package_swapped(&cart_item(1, 10.0, 1), &cart_item(2, 19.99, 1), 9.99);
        let ecommerce = event.ecommerce.unwrap();
        assert_eq!(ecommerce.items_removed.unwrap()[0].item_id, "1");
        assert_eq!(ecommerce.items_added.unwrap()[0].item_id, "2");
        assert_eq!(event.extra["price_difference"], 9.99);
    }

    #[test]
    fn test_view_item_list_uses_tracked_list() {
        let (ev, f) = events();
        let ctx = ListContext {
            list_id: Some("summer".into()),
            list_name: Some("Summer".into()),
            timestamp: chrono::Utc::now().timestamp_millis(),
            url: "https://shop.example.com/collections/summer".into(),
        };
        f.lists.set_list(ctx.list_id.clone(), ctx.list_name.clone(), &ctx.url);
        let event = ev.view_item_list(&[ItemInput::package(1, 1), ItemInput::package(2, 1)], None);
        let ecommerce = event.ecommerce.unwrap();
        assert_eq!(ecommerce.item_list_id.as_deref(), Some("summer"));
        assert_eq!(ecommerce.items[1].index, Some(1));
        assert_eq!(ecommerce.items[1].item_list_name.as_deref(), Some("Summer"));
    }

    #[test]
    fn test_search_event_carries_term() {
        let (ev, _) = events();
        let event = ev.view_search_results("drops", &[]);
        assert_eq!(event.field("search_term").unwrap(), "drops");
        assert!(event.ecommerce.is_none());
    }
}
