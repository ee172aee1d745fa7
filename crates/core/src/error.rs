use thiserror::Error;

pub type SdkResult<T> = Result<T, SdkError>;
pub type CartResult<T> = Result<T, CartError>;

/// Failures surfaced by cart store actions. These are expected outcomes
/// (a package missing from the campaign catalog, a stale line id) and are
/// pattern-matched at the UI-interaction boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    #[error("Package {0} not found in campaign data")]
    PackageNotFound(u32),

    #[error("Package {0} is not in the cart")]
    ItemNotInCart(u32),

    #[error("Shipping method {0} not found in campaign data")]
    ShippingMethodNotFound(u32),

    #[error("Invalid quantity {quantity} for package {package_id}")]
    InvalidQuantity { package_id: u32, quantity: u32 },
}

/// Storage failures. Never escape the storage adapter; they are logged and
/// turned into defaults.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded writing {key} ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Selector error: {0}")]
    Selector(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
