use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tripdesk::config::AppConfig;
use tripdesk::db::{DocumentStore, SqliteStore};
use tripdesk::handlers;
use tripdesk::services::gateway::phonepe::PhonePeGateway;
use tripdesk::services::identity::jwt::JwtVerifier;
use tripdesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    if config.auth_secret == "changeme" {
        tracing::warn!("AUTH_SECRET not set, using the insecure default");
    }
    if config.webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, webhook signatures will not be checked");
    }
    anyhow::ensure!(
        !config.phonepe_client_id.is_empty() && !config.phonepe_client_secret.is_empty(),
        "PHONEPE_CLIENT_ID and PHONEPE_CLIENT_SECRET must be set"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.database_url)?);

    tracing::info!(env = ?config.phonepe_env, "using PhonePe payment gateway");
    let gateway = PhonePeGateway::new(
        config.phonepe_client_id.clone(),
        config.phonepe_client_secret.clone(),
        config.phonepe_client_version.clone(),
        config.phonepe_env.clone(),
    );
    let identity = JwtVerifier::new(&config.auth_secret, Arc::clone(&store));

    if config.strict_callback_codes {
        tracing::info!("strict callback codes enabled, unknown codes stay pending");
    }

    let state = Arc::new(AppState {
        store,
        config: config.clone(),
        identity: Box::new(identity),
        gateway: Box::new(gateway),
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
