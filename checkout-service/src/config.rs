use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::signature::MerchantCredentials;

/// Substituted for an unset or blank description template at load time.
/// `$orderId` expands to the order's sequence number.
pub const DEFAULT_ORDER_DESCRIPTION: &str = "Pay for order #$orderId";

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub merchant_id: String,
    pub secret_key: String,
    pub testing_mode: bool,
    pub currency: String,
    pub description_template: String,
    /// Gateway endpoint the browser form posts to.
    pub checkout_url: String,
    /// Gateway endpoint for out-of-band order-status queries.
    pub status_url: String,
    /// Public base URL of this service, used to build the callback URLs
    /// handed to the gateway.
    pub public_base_url: String,
    /// Base URL of the storefront the browser-return paths redirect into.
    pub store_base_url: String,
    pub status_timeout_secs: u64,
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self> {
        let testing_mode = env::var("GATEWAY_TESTING_MODE")
            .ok()
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false);
        // Sandbox constants take over in testing mode, so live credentials
        // are only mandatory outside it.
        let (merchant_id, secret_key) = if testing_mode {
            (
                env::var("GATEWAY_MERCHANT_ID").unwrap_or_default(),
                env::var("GATEWAY_SECRET_KEY").unwrap_or_default(),
            )
        } else {
            (
                env::var("GATEWAY_MERCHANT_ID").context("GATEWAY_MERCHANT_ID must be set")?,
                env::var("GATEWAY_SECRET_KEY").context("GATEWAY_SECRET_KEY must be set")?,
            )
        };
        let checkout_url = env::var("GATEWAY_CHECKOUT_URL").context("GATEWAY_CHECKOUT_URL must be set")?;
        let status_url = env::var("GATEWAY_STATUS_URL").context("GATEWAY_STATUS_URL must be set")?;
        let public_base_url = env::var("PUBLIC_BASE_URL").context("PUBLIC_BASE_URL must be set")?;
        let store_base_url = env::var("STORE_BASE_URL").context("STORE_BASE_URL must be set")?;
        let currency = env::var("STORE_CURRENCY").unwrap_or_else(|_| "USD".to_string());
        let description_template = env::var("ORDER_DESCRIPTION_TEMPLATE")
            .ok()
            .filter(|template| !template.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ORDER_DESCRIPTION.to_string());
        let status_timeout_secs = env::var("GATEWAY_STATUS_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10);

        Ok(Self {
            merchant_id,
            secret_key,
            testing_mode,
            currency,
            description_template,
            checkout_url,
            status_url,
            public_base_url: trim_base(public_base_url),
            store_base_url: trim_base(store_base_url),
            status_timeout_secs: status_timeout_secs.max(1),
        })
    }

    pub fn credentials(&self) -> MerchantCredentials {
        MerchantCredentials {
            merchant_id: self.merchant_id.clone(),
            secret_key: self.secret_key.clone(),
            testing_mode: self.testing_mode,
        }
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn response_url(&self) -> String {
        format!("{}/callbacks/success", self.public_base_url)
    }

    pub fn server_callback_url(&self) -> String {
        format!("{}/callbacks/confirm", self.public_base_url)
    }

    pub fn home_url(&self) -> String {
        format!("{}/", self.store_base_url)
    }

    pub fn checkout_completed_url(&self, order_number: i64) -> String {
        format!("{}/checkout/completed/{}", self.store_base_url, order_number)
    }

    pub fn order_details_url(&self, order_number: i64) -> String {
        format!("{}/orders/{}", self.store_base_url, order_number)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
