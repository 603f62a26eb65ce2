use std::{sync::Arc, time::Duration};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    cms::{oauth::OAuthHttpClient, CmsHttpClient, DynContentApi},
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig, VectorBackendKind},
        embedding::{DynEmbedder, EmbeddingProvider, TextEmbedder},
    },
    vector::{http::VectorHttpClient, memory::InMemoryVectorStore, routing::IndexRouter, DynVectorStore},
};
use indexing_pipeline::{IndexingConfig, IndexingPipeline};
use retrieval_pipeline::{reranking::RerankerPool, DynReranker, RetrievalPipeline};
use tenant_auth::StackCredentialManager;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP surface only. Pair this binary with the `worker` binary, which
/// owns the credential refresh sweeps and telemetry retention.
#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
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

    let api_state = build_api_state(&config, db)?;
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_api_state(config: &AppConfig, db: Arc<SurrealDbClient>) -> Result<ApiState, AppError> {
    let timeout = Duration::from_secs(config.provider_request_timeout_secs);

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let provider = EmbeddingProvider::new_openai(
        openai_client,
        config.embedding_model.clone(),
        config.embedding_dimension,
    );
    info!(
        embedding_backend = provider.backend_label(),
        embedding_dimension = provider.dimension(),
        "Embedding provider initialized"
    );
    let embedder: DynEmbedder = Arc::new(provider);

    let token_endpoint = Arc::new(OAuthHttpClient::new(
        &config.cms_oauth_token_url,
        &config.cms_oauth_client_id,
        &config.cms_oauth_client_secret,
        &config.cms_oauth_redirect_uri,
        timeout,
    )?);
    let content_api: DynContentApi =
        Arc::new(CmsHttpClient::new(&config.cms_api_base_url, timeout)?);

    let store: DynVectorStore = match config.vector_backend {
        VectorBackendKind::Http => {
            let base_url = config.vector_api_base_url.as_deref().ok_or_else(|| {
                AppError::Validation(
                    "vector_api_base_url is required for the http vector backend".into(),
                )
            })?;
            let api_key = config.vector_api_key.as_deref().ok_or_else(|| {
                AppError::Validation(
                    "vector_api_key is required for the http vector backend".into(),
                )
            })?;
            Arc::new(VectorHttpClient::new(base_url, api_key, timeout)?)
        }
        VectorBackendKind::Memory => Arc::new(InMemoryVectorStore::new()),
    };
    let router = Arc::new(IndexRouter::new(
        store,
        Duration::from_secs(config.index_ready_timeout_secs),
    ));

    let credentials = Arc::new(StackCredentialManager::new(db.clone(), token_endpoint));
    let reranker = RerankerPool::maybe_from_config(config)?.map(|pool| pool as DynReranker);

    let indexing = Arc::new(IndexingPipeline::new(
        credentials.clone(),
        content_api.clone(),
        embedder.clone(),
        router.clone(),
        IndexingConfig::from_app_config(config),
    ));
    let retrieval = Arc::new(RetrievalPipeline::new(
        db.clone(),
        credentials.clone(),
        content_api,
        embedder,
        router,
        reranker,
    ));

    Ok(ApiState::new(
        db,
        config.clone(),
        credentials,
        indexing,
        retrieval,
    ))
}
