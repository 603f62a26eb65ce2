use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use indexing_pipeline::IndexingPipeline;
use retrieval_pipeline::RetrievalPipeline;
use tenant_auth::StackCredentialManager;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub credentials: Arc<StackCredentialManager>,
    pub indexing: Arc<IndexingPipeline>,
    pub retrieval: Arc<RetrievalPipeline>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        credentials: Arc<StackCredentialManager>,
        indexing: Arc<IndexingPipeline>,
        retrieval: Arc<RetrievalPipeline>,
    ) -> Self {
        Self {
            db,
            config,
            credentials,
            indexing,
            retrieval,
        }
    }
}
