use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("order not found")]
    OrderNotFound,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("remote status query failed: {0}")]
    RemoteQuery(String),
    #[error("gateway not configured: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Stable code used for metrics labels and X-Error-Code headers.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::OrderNotFound => "order_not_found",
            GatewayError::SignatureMismatch => "signature_mismatch",
            GatewayError::RemoteQuery(_) => "remote_query_failed",
            GatewayError::InvalidConfiguration(_) => "not_configured",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}
