use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::info;

use checkout_service::{
    build_router, AppState, CheckoutConfig, CheckoutMetrics, OrderStore, PgOrderStore, StatusClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(CheckoutConfig::from_env()?);
    if config.testing_mode {
        info!("gateway testing mode enabled; sandbox credentials in effect");
    }

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(db));

    let status_client = Arc::new(StatusClient::new(
        reqwest::Client::new(),
        config.status_url.clone(),
        config.status_timeout(),
    ));
    let metrics = Arc::new(CheckoutMetrics::new()?);

    let state = AppState {
        store,
        status_client,
        config,
        metrics,
    };
    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8087".to_string())
        .parse()?;
    let addr = SocketAddr::new(host.parse()?, port);
    println!("starting checkout-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
