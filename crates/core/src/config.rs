use std::collections::HashMap;

use serde::Deserialize;

/// Root SDK configuration. Loaded from environment variables with the
/// prefix `CAMPAIGN_CART__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub selector: SelectorDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_prefix")]
    pub prefix: String,
    /// Optional byte quota for the in-memory backends (0 = unlimited).
    #[serde(default)]
    pub quota_bytes: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Domain events on the bus are turned into analytics events automatically.
    #[default]
    Auto,
    /// Only the facade's explicit `track_*` calls produce events.
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: TrackingMode,
    #[serde(default)]
    pub validate_events: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_pending_stale_ms")]
    pub pending_stale_ms: u64,
    #[serde(default = "default_list_ttl_ms")]
    pub list_ttl_ms: u64,
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default)]
    pub debounce: DebounceConfig,
}

/// Per-event-type debounce windows for the auto event listener.
#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_cart_debounce_ms")]
    pub add_to_cart_ms: u64,
    #[serde(default = "default_cart_debounce_ms")]
    pub remove_from_cart_ms: u64,
    #[serde(default = "default_swap_debounce_ms")]
    pub package_swap_ms: u64,
    #[serde(default = "default_swap_debounce_ms")]
    pub begin_checkout_ms: u64,
    #[serde(default = "default_swap_debounce_ms")]
    pub upsell_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gtm: Option<GtmProviderConfig>,
    #[serde(default)]
    pub facebook: Option<FacebookProviderConfig>,
    #[serde(default)]
    pub rudderstack: Option<RudderStackProviderConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookProviderConfig>,
    #[serde(default)]
    pub campaign: Option<CampaignProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GtmProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_events: Vec<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default = "default_availability_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacebookProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_events: Vec<String>,
    pub pixel_id: String,
    #[serde(default = "default_availability_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RudderStackProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_events: Vec<String>,
    #[serde(default = "default_availability_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_events: Vec<String>,
    pub endpoint: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_webhook_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_webhook_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_webhook_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_webhook_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub blocked_events: Vec<String>,
    #[serde(default = "default_campaign_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorDefaults {
    #[serde(default = "default_selection_mode")]
    pub mode: String,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: u32,
    #[serde(default = "default_max_quantity")]
    pub max_quantity: u32,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_storage_prefix() -> String {
    "next-".to_string()
}
fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn default_pending_stale_ms() -> u64 {
    5 * 60 * 1000
}
fn default_list_ttl_ms() -> u64 {
    30 * 60 * 1000
}
fn default_store_name() -> String {
    "campaign-cart".to_string()
}
fn default_cart_debounce_ms() -> u64 {
    500
}
fn default_swap_debounce_ms() -> u64 {
    1000
}
fn default_availability_timeout_ms() -> u64 {
    5000
}
fn default_webhook_batch_size() -> usize {
    10
}
fn default_webhook_batch_interval_ms() -> u64 {
    5000
}
fn default_webhook_max_retries() -> u32 {
    3
}
fn default_webhook_retry_delay_ms() -> u64 {
    1000
}
fn default_campaign_api_endpoint() -> String {
    "https://campaigns.example.com/api/v1".to_string()
}
fn default_selection_mode() -> String {
    "swap".to_string()
}
fn default_min_quantity() -> u32 {
    1
}
fn default_max_quantity() -> u32 {
    999
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: default_storage_prefix(),
            quota_bytes: 0,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: TrackingMode::default(),
            validate_events: false,
            debug: false,
            session_timeout_ms: default_session_timeout_ms(),
            pending_stale_ms: default_pending_stale_ms(),
            list_ttl_ms: default_list_ttl_ms(),
            store_name: default_store_name(),
            debounce: DebounceConfig::default(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            add_to_cart_ms: default_cart_debounce_ms(),
            remove_from_cart_ms: default_cart_debounce_ms(),
            package_swap_ms: default_swap_debounce_ms(),
            begin_checkout_ms: default_swap_debounce_ms(),
            upsell_ms: default_swap_debounce_ms(),
        }
    }
}

impl Default for SelectorDefaults {
    fn default() -> Self {
        Self {
            mode: default_selection_mode(),
            min_quantity: default_min_quantity(),
            max_quantity: default_max_quantity(),
        }
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            debug: false,
            storage: StorageConfig::default(),
            analytics: AnalyticsConfig::default(),
            providers: ProvidersConfig::default(),
            selector: SelectorDefaults::default(),
        }
    }
}

impl WebhookProviderConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            enabled: true,
            blocked_events: Vec::new(),
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            batch_size: default_webhook_batch_size(),
            batch_interval_ms: default_webhook_batch_interval_ms(),
            max_retries: default_webhook_max_retries(),
            retry_delay_ms: default_webhook_retry_delay_ms(),
        }
    }
}

impl Default for GtmProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_events: Vec::new(),
            container_id: None,
            timeout_ms: default_availability_timeout_ms(),
        }
    }
}

impl Default for RudderStackProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_events: Vec::new(),
            timeout_ms: default_availability_timeout_ms(),
        }
    }
}

impl SdkConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::builder(None)?.try_deserialize()
    }

    /// Load configuration from a TOML file, with environment overrides on top.
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        Self::builder(Some(path))?.try_deserialize()
    }

    fn builder(path: Option<&str>) -> Result<config::Config, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_CART")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()
    }

    /// Debug mode is on when either the root or the analytics flag is set.
    pub fn debug_enabled(&self) -> bool {
        self.debug || self.analytics.debug
    }
}
