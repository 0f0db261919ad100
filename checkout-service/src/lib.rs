pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orders;
pub mod reconcile;
pub mod redirect;
pub mod signature;
pub mod status_client;

// Re-export key types for tests
pub use crate::app::{build_router, AppState};
pub use crate::config::{CheckoutConfig, DEFAULT_ORDER_DESCRIPTION};
pub use crate::error::GatewayError;
pub use crate::metrics::CheckoutMetrics;
pub use crate::orders::{InMemoryOrderStore, Order, OrderStore, PaymentStatus, PgOrderStore};
pub use crate::redirect::{build_redirect_form, RedirectForm};
pub use crate::signature::{sign, verify, MerchantCredentials, SignablePayload};
pub use crate::status_client::{GatewayStatus, RemoteStatus, StatusClient};
