//! Declarative per-event schemas and a best-effort structural validator.
//!
//! Validation only runs when the data layer manager has it switched on. An
//! unknown event type is a warning, never an error; whether to drop an event
//! is the manager's decision.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{
    EventEnvelope, DL_ACCEPTED_UPSELL, DL_ADD_PAYMENT_INFO, DL_ADD_SHIPPING_INFO, DL_ADD_TO_CART,
    DL_BEGIN_CHECKOUT, DL_LOGIN, DL_PACKAGE_SWAPPED, DL_PURCHASE, DL_REMOVE_FROM_CART,
    DL_SCROLL_DEPTH, DL_SIGN_UP, DL_SKIPPED_UPSELL, DL_USER_DATA, DL_VIEWED_UPSELL, DL_VIEW_CART,
    DL_VIEW_ITEM, DL_VIEW_ITEM_LIST, DL_VIEW_SEARCH_RESULTS,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            enum_values: None,
            properties: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldSchema)>,
        K: Into<String>,
    {
        Self {
            properties: Some(properties.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..Self::of(FieldType::Object)
        }
    }

    pub fn array(items: FieldSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(FieldType::Array)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

pub type EventSchema = BTreeMap<String, FieldSchema>;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Event-type → schema table, pre-populated with the built-in `dl_*` events.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EventSchema>,
}

fn ecommerce_item_schema() -> FieldSchema {
    FieldSchema::object([
        ("item_id", FieldSchema::string().required()),
        ("item_name", FieldSchema::string().required()),
        ("price", FieldSchema::number().required()),
        ("quantity", FieldSchema::integer().required()),
        ("currency", FieldSchema::string()),
        ("item_brand", FieldSchema::string()),
        ("item_category", FieldSchema::string()),
        ("item_variant", FieldSchema::string()),
        ("item_sku", FieldSchema::string()),
        ("index", FieldSchema::integer()),
    ])
}

fn ecommerce_schema() -> FieldSchema {
    FieldSchema::object([
        ("currency", FieldSchema::string()),
        ("value", FieldSchema::number()),
        ("items", FieldSchema::array(ecommerce_item_schema())),
        ("transaction_id", FieldSchema::string()),
        ("tax", FieldSchema::number()),
        ("shipping", FieldSchema::number()),
        ("coupon", FieldSchema::string()),
    ])
}

fn base_schema() -> EventSchema {
    BTreeMap::from([
        ("event".to_string(), FieldSchema::string().required()),
        ("event_id".to_string(), FieldSchema::string()),
        ("event_time".to_string(), FieldSchema::string()),
        (
            "user_properties".to_string(),
            FieldSchema::object([(
                "visitor_type",
                FieldSchema::string().one_of(vec!["guest".into(), "logged_in".into()]),
            )]),
        ),
    ])
}

fn ecommerce_event_schema() -> EventSchema {
    let mut schema = base_schema();
    schema.insert("ecommerce".into(), ecommerce_schema().required());
    schema
}

fn upsell_event_schema() -> EventSchema {
    let mut schema = base_schema();
    schema.insert("order_id".into(), FieldSchema::string());
    schema.insert(
        "upsell".into(),
        FieldSchema::object([
            ("package_id", FieldSchema::of(FieldType::Any)),
            ("package_name", FieldSchema::string()),
            ("quantity", FieldSchema::integer()),
            ("value", FieldSchema::number()),
        ]),
    );
    schema
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let mut schemas = HashMap::new();
        for name in [
            DL_VIEW_ITEM_LIST,
            DL_VIEW_ITEM,
            DL_ADD_TO_CART,
            DL_REMOVE_FROM_CART,
            DL_VIEW_CART,
            DL_BEGIN_CHECKOUT,
            DL_ADD_SHIPPING_INFO,
            DL_ADD_PAYMENT_INFO,
            DL_PURCHASE,
            DL_PACKAGE_SWAPPED,
        ] {
            schemas.insert(name.to_string(), ecommerce_event_schema());
        }
        for name in [DL_VIEWED_UPSELL, DL_ACCEPTED_UPSELL, DL_SKIPPED_UPSELL] {
            schemas.insert(name.to_string(), upsell_event_schema());
        }
        for name in [DL_USER_DATA, DL_LOGIN, DL_SIGN_UP] {
            schemas.insert(name.to_string(), base_schema());
        }
        let mut search = base_schema();
        search.insert("search_term".into(), FieldSchema::string());
        schemas.insert(DL_VIEW_SEARCH_RESULTS.to_string(), search);
        let mut scroll = base_schema();
        scroll.insert("scroll_depth".into(), FieldSchema::integer().required());
        schemas.insert(DL_SCROLL_DEPTH.to_string(), scroll);
        Self { schemas }
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn register(&mut self, event: impl Into<String>, schema: EventSchema) {
        self.schemas.insert(event.into(), schema);
    }

    pub fn get(&self, event: &str) -> Option<&EventSchema> {
        self.schemas.get(event)
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventValidator {
    registry: SchemaRegistry,
}

impl EventValidator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    pub fn validate_event(&self, event: &EventEnvelope) -> ValidationResult {
        self.validate_value(&event.to_value())
    }

    pub fn validate_value(&self, event: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let name = event.get("event").and_then(Value::as_str).unwrap_or("");
        if name.is_empty() {
            errors.push("Missing required field: event".to_string());
        } else {
            match self.registry.get(name) {
                Some(schema) => validate_object("", event, schema, &mut errors),
                None => warnings.push(format!("No schema registered for event type: {name}")),
            }
            check_semantics(name, event, &mut errors, &mut warnings);
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn validate_object(path: &str, value: &Value, schema: &EventSchema, errors: &mut Vec<String>) {
    for (key, field) in schema {
        let field_path = join(path, key);
        match value.get(key) {
            None | Some(Value::Null) => {
                if field.required {
                    errors.push(format!("Missing required field: {field_path}"));
                }
            }
            Some(v) => validate_field(&field_path, v, field, errors),
        }
    }
}

fn validate_field(path: &str, value: &Value, schema: &FieldSchema, errors: &mut Vec<String>) {
    if !schema.field_type.matches(value) {
        errors.push(format!(
            "Field {path} should be {}, got {}",
            schema.field_type.label(),
            type_name(value)
        ));
        return;
    }
    if let Some(allowed) = &schema.enum_values {
        if !allowed.contains(value) {
            errors.push(format!("Field {path} has invalid value {value}"));
        }
    }
    if let Some(props) = &schema.properties {
        validate_object(path, value, props, errors);
    }
    if let (Some(item_schema), Some(items)) = (&schema.items, value.as_array()) {
        for (i, item) in items.iter().enumerate() {
            validate_field(&format!("{path}[{i}]"), item, item_schema, errors);
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

fn present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn check_semantics(name: &str, event: &Value, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let ecommerce = event.get("ecommerce");

    if let Some(ecom) = ecommerce {
        if let Some(currency) = ecom.get("currency").and_then(Value::as_str) {
            if !is_currency_code(currency) {
                warnings.push(format!("Invalid currency code: {currency}"));
            }
        }
        for key in ["value", "tax", "shipping"] {
            if ecom.get(key).and_then(Value::as_f64).is_some_and(|n| n < 0.0) {
                warnings.push(format!("Negative value for ecommerce.{key}"));
            }
        }
        if let Some(items) = ecom.get("items").and_then(Value::as_array) {
            for (i, item) in items.iter().enumerate() {
                for key in ["price", "quantity"] {
                    if item.get(key).and_then(Value::as_f64).is_some_and(|n| n < 0.0) {
                        warnings.push(format!("Negative value for ecommerce.items[{i}].{key}"));
                    }
                }
                if let Some(currency) = item.get("currency").and_then(Value::as_str) {
                    if !is_currency_code(currency) {
                        warnings.push(format!("Invalid currency code on item {i}: {currency}"));
                    }
                }
            }
        }
    }

    match name {
        DL_PURCHASE => {
            if !present(ecommerce.and_then(|e| e.get("transaction_id"))) {
                errors.push("dl_purchase requires ecommerce.transaction_id".to_string());
            }
        }
        DL_VIEW_SEARCH_RESULTS => {
            if !present(event.get("search_term")) {
                errors.push("dl_view_search_results requires search_term".to_string());
            }
        }
        DL_VIEWED_UPSELL | DL_ACCEPTED_UPSELL | DL_SKIPPED_UPSELL => {
            if !present(event.get("order_id")) {
                errors.push(format!("{name} requires order_id"));
            }
            let upsell = event.get("upsell");
            if !present(upsell.and_then(|u| u.get("package_id"))) {
                errors.push(format!("{name} requires upsell.package_id"));
            }
            if name == DL_ACCEPTED_UPSELL && !present(upsell.and_then(|u| u.get("value"))) {
                errors.push("dl_accepted_upsell requires upsell.value".to_string());
            }
        }
        _ => {}
    }
}
