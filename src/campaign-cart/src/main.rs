//! Campaign Cart: replays a shopping session against in-memory stores and
//! prints the analytics data layer it produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use campaign_cart_analytics::{Analytics, AnalyticsDeps, GlobalArray, Integrations, PushOutcome};
use campaign_cart_core::config::{GtmProviderConfig, SdkConfig, WebhookProviderConfig};
use campaign_cart_core::dom::Document;
use campaign_cart_core::event_bus::EventBus;
use campaign_cart_core::storage::StorageAdapter;
use campaign_cart_core::stores::{CartStore, InMemoryCampaignStore, InMemoryCartStore, InMemoryCheckoutStore};
use campaign_cart_core::types::{AddItemRequest, Order, PackageData, PackageId, UpsellOffer};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-cart")]
#[command(about = "Campaign cart SDK: replay a shopping session through the analytics pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, env = "CAMPAIGN_CART_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scripted session and print the data layer
    Simulate {
        /// Campaign catalog JSON
        #[arg(long)]
        catalog: PathBuf,

        /// Action script JSON
        #[arg(long)]
        script: PathBuf,

        /// Page URL the session starts on
        #[arg(long, default_value = "https://shop.example.com/")]
        url: String,

        /// Webhook endpoint; requests are logged, not sent
        #[arg(long, default_value = "https://collector.example.com/events")]
        webhook: String,

        /// Turn on debug mode (metadata flag and event validation)
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    store_name: Option<String>,
    packages: Vec<PackageData>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    Add {
        package_id: PackageId,
        #[serde(default = "one")]
        quantity: u32,
    },
    Remove {
        package_id: PackageId,
    },
    Quantity {
        package_id: PackageId,
        quantity: u32,
    },
    Swap {
        from: PackageId,
        to: PackageId,
        #[serde(default = "one")]
        quantity: u32,
    },
    Checkout,
    Purchase {
        order: Order,
    },
    Upsell {
        offer: UpsellOffer,
    },
}

fn one() -> u32 {
    1
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_cart=info,campaign_cart_analytics=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => SdkConfig::load_from(path),
        None => SdkConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SdkConfig::default()
    });

    match cli.command {
        Command::Simulate {
            catalog,
            script,
            url,
            webhook,
            debug,
        } => {
            if debug {
                config.debug = true;
            }
            let catalog: Catalog = read_json(&catalog)?;
            let actions: Vec<Action> = read_json(&script)?;
            let events = simulate(config, catalog, actions, &url, &webhook).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
    }

    Ok(())
}

async fn simulate(
    mut config: SdkConfig,
    catalog: Catalog,
    actions: Vec<Action>,
    url: &str,
    webhook: &str,
) -> anyhow::Result<Vec<serde_json::Value>> {
    config.providers.gtm.get_or_insert_with(GtmProviderConfig::default);
    config
        .providers
        .webhook
        .get_or_insert_with(|| WebhookProviderConfig::new(webhook));

    let document = Document::at(url).with_context(|| format!("invalid page url {url}"))?;
    let bus = EventBus::shared();
    let mut campaign = InMemoryCampaignStore::new(catalog.currency).with_packages(catalog.packages);
    if let Some(name) = catalog.store_name {
        campaign = campaign.with_store_name(name);
    }
    let campaign = Arc::new(campaign);
    let cart = Arc::new(InMemoryCartStore::new(campaign.clone(), bus.clone()));
    let gtm = GlobalArray::new("dataLayer");

    let analytics = Analytics::initialize(
        &config,
        AnalyticsDeps {
            bus,
            document: document.into_shared(),
            local: StorageAdapter::memory(),
            session: StorageAdapter::memory(),
            campaign,
            cart: cart.clone(),
            checkout: Arc::new(InMemoryCheckoutStore::new()),
            attribution: None,
            integrations: Integrations {
                gtm_data_layer: Some(gtm.clone()),
                ..Integrations::default()
            },
        },
    );
    if !analytics.is_enabled() {
        warn!(reason = ?analytics.disabled_reason(), "analytics disabled, nothing will be tracked");
    }

    info!(actions = actions.len(), "replaying session");
    for (step, action) in actions.into_iter().enumerate() {
        if let Err(e) = apply(&analytics, cart.as_ref(), action).await {
            warn!(step, error = %e, "action failed");
        }
    }

    let flushed = analytics.flush().await;
    info!(
        flushed,
        gtm_pushes = gtm.len(),
        pending = analytics.data_layer().pending().len(),
        "session complete"
    );
    Ok(analytics.data_layer().events())
}

async fn apply(analytics: &Analytics, cart: &dyn CartStore, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Add { package_id, quantity } => cart.add_item(AddItemRequest::new(package_id, quantity)).await?,
        Action::Remove { package_id } => cart.remove_item(package_id).await?,
        Action::Quantity { package_id, quantity } => cart.update_quantity(package_id, quantity).await?,
        Action::Swap { from, to, quantity } => cart.swap_package(from, AddItemRequest::new(to, quantity)).await?,
        Action::Checkout => report("dl_begin_checkout", analytics.track_begin_checkout()),
        Action::Purchase { order } => report("dl_purchase", analytics.track_purchase(&order)),
        Action::Upsell { offer } => report("dl_accepted_upsell", analytics.track_accepted_upsell(&offer)),
    }
    Ok(())
}

fn report(event: &str, outcome: PushOutcome) {
    info!(event, ?outcome, "tracked");
}
