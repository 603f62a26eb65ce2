use std::{sync::Arc, time::Duration};

use common::{cms::oauth::OAuthHttpClient, storage::db::SurrealDbClient, utils::config::get_config};
use retrieval_pipeline::telemetry;
use tenant_auth::{run_refresh_loop, StackCredentialManager};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Background process: credential refresh sweeps plus telemetry retention.
/// Runs alongside one or more `server` instances against the same database.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let token_endpoint = Arc::new(OAuthHttpClient::new(
        &config.cms_oauth_token_url,
        &config.cms_oauth_client_id,
        &config.cms_oauth_client_secret,
        &config.cms_oauth_redirect_uri,
        Duration::from_secs(config.provider_request_timeout_secs),
    )?);
    let credentials = Arc::new(StackCredentialManager::new(db.clone(), token_endpoint));

    info!("Starting worker process");
    let sweep_interval = Duration::from_secs(config.refresh_sweep_interval_secs);
    tokio::join!(
        run_refresh_loop(db.clone(), credentials, sweep_interval),
        telemetry::run_retention_loop(db.clone(), config.search_log_retention_days),
    );

    Ok(())
}
