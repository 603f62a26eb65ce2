use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    Http,
    Memory,
}

fn default_vector_backend() -> VectorBackendKind {
    VectorBackendKind::Http
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,

    pub cms_api_base_url: String,
    pub cms_oauth_token_url: String,
    pub cms_oauth_client_id: String,
    pub cms_oauth_client_secret: String,
    pub cms_oauth_redirect_uri: String,

    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u32,

    #[serde(default = "default_vector_backend")]
    pub vector_backend: VectorBackendKind,
    #[serde(default)]
    pub vector_api_base_url: Option<String>,
    #[serde(default)]
    pub vector_api_key: Option<String>,
    #[serde(default = "default_index_ready_timeout_secs")]
    pub index_ready_timeout_secs: u64,

    #[serde(default = "default_refresh_sweep_interval_secs")]
    pub refresh_sweep_interval_secs: u64,
    #[serde(default = "default_indexing_batch_size")]
    pub indexing_batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub indexing_batch_pause_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub provider_request_timeout_secs: u64,

    #[serde(default)]
    pub reranking_enabled: bool,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default = "default_search_log_retention_days")]
    pub search_log_retention_days: i64,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> u32 {
    1536
}

fn default_index_ready_timeout_secs() -> u64 {
    120
}

fn default_refresh_sweep_interval_secs() -> u64 {
    300
}

fn default_indexing_batch_size() -> usize {
    50
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_search_log_retention_days() -> i64 {
    30
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            http_port: 0,
            cms_api_base_url: "https://cms.example.com".into(),
            cms_oauth_token_url: "https://cms.example.com/token".into(),
            cms_oauth_client_id: "client".into(),
            cms_oauth_client_secret: "secret".into(),
            cms_oauth_redirect_uri: "https://app.example.com/oauth/callback".into(),
            openai_api_key: "test".into(),
            openai_base_url: default_openai_base_url(),
            embedding_model: default_embedding_model(),
            embedding_dimension: 8,
            vector_backend: VectorBackendKind::Memory,
            vector_api_base_url: None,
            vector_api_key: None,
            index_ready_timeout_secs: 1,
            refresh_sweep_interval_secs: default_refresh_sweep_interval_secs(),
            indexing_batch_size: default_indexing_batch_size(),
            indexing_batch_pause_ms: 0,
            provider_request_timeout_secs: default_request_timeout_secs(),
            reranking_enabled: false,
            reranking_pool_size: None,
            fastembed_cache_dir: None,
            search_log_retention_days: default_search_log_retention_days(),
        }
    }
}
