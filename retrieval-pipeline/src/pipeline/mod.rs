mod stages;

pub use stages::{PipelineContext, QueryInput};

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    cms::DynContentApi,
    error::AppError,
    storage::db::SurrealDbClient,
    utils::embedding::DynEmbedder,
    vector::{routing::IndexRouter, MetadataFilter},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tenant_auth::StackCredentialManager;
use tracing::{info, warn};

use crate::{fusion, reranking::DynReranker, telemetry};

use self::stages::{
    AssembleStage, CollectCandidatesStage, EmbedQueryStage, EnrichStage, RerankStage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Embed,
    CollectCandidates,
    Rerank,
    Enrich,
    Assemble,
}

#[async_trait::async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }

    pub fn embed_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Embed)
    }

    pub fn collect_candidates_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::CollectCandidates)
    }

    pub fn rerank_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Rerank)
    }

    pub fn enrich_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Enrich)
    }

    pub fn assemble_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Assemble)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    #[serde(default)]
    pub score_floor: Option<f32>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageSearchRequest {
    pub image_url: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    #[serde(default)]
    pub score_floor: Option<f32>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HybridSearchRequest {
    pub query: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
    #[serde(default = "default_image_weight")]
    pub image_weight: f32,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    #[serde(default)]
    pub score_floor: Option<f32>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_top_k() -> usize {
    10
}

fn default_environment() -> String {
    "production".to_owned()
}

fn default_text_weight() -> f32 {
    0.7
}

fn default_image_weight() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// Live entry fields fetched at query time; absent for asset hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub took_ms: u64,
}

/// Query-side orchestrator. Stages run strictly in order; rerank and
/// enrichment failures degrade the result instead of failing the request.
pub struct RetrievalPipeline {
    db: Arc<SurrealDbClient>,
    credentials: Arc<StackCredentialManager>,
    content_api: DynContentApi,
    embedder: DynEmbedder,
    router: Arc<IndexRouter>,
    reranker: Option<DynReranker>,
}

impl RetrievalPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        credentials: Arc<StackCredentialManager>,
        content_api: DynContentApi,
        embedder: DynEmbedder,
        router: Arc<IndexRouter>,
        reranker: Option<DynReranker>,
    ) -> Self {
        Self {
            db,
            credentials,
            content_api,
            embedder,
            router,
            reranker,
        }
    }

    /// Text search over the tenant's indexed entries. An empty result set is
    /// a valid outcome, not an error.
    pub async fn search(
        &self,
        stack_key: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, AppError> {
        let started = Instant::now();
        let result = self
            .run(
                stack_key,
                QueryInput::Text(request.query.clone()),
                "entry",
                request.top_k,
                request.filter.clone(),
                request.score_floor,
                &request.environment,
            )
            .await;

        self.finish(stack_key, &request.query, "text", started, result)
            .await
    }

    /// Image similarity search over the tenant's indexed assets.
    pub async fn search_image(
        &self,
        stack_key: &str,
        request: &ImageSearchRequest,
    ) -> Result<SearchResponse, AppError> {
        let started = Instant::now();
        let result = self
            .run(
                stack_key,
                QueryInput::Image(request.image_url.clone()),
                "asset",
                request.top_k,
                request.filter.clone(),
                request.score_floor,
                &request.environment,
            )
            .await;

        self.finish(stack_key, &request.image_url, "image", started, result)
            .await
    }

    /// Weighted fusion across the text and image modalities. A failing image
    /// side degrades to text-only; the text side is authoritative.
    pub async fn search_hybrid(
        &self,
        stack_key: &str,
        request: &HybridSearchRequest,
    ) -> Result<SearchResponse, AppError> {
        let started = Instant::now();

        let text_result = self
            .run(
                stack_key,
                QueryInput::Text(request.query.clone()),
                "entry",
                request.top_k,
                request.filter.clone(),
                request.score_floor,
                &request.environment,
            )
            .await;

        let result = match text_result {
            Ok(text_hits) => {
                let mut modalities = vec![(request.text_weight, text_hits)];
                if let Some(image_url) = &request.image_url {
                    match self
                        .run(
                            stack_key,
                            QueryInput::Image(image_url.clone()),
                            "asset",
                            request.top_k,
                            request.filter.clone(),
                            request.score_floor,
                            &request.environment,
                        )
                        .await
                    {
                        Ok(image_hits) => modalities.push((request.image_weight, image_hits)),
                        Err(err) => {
                            warn!(%stack_key, error = %err, "image modality failed; text-only fusion")
                        }
                    }
                }
                Ok(fusion::fuse_modalities(modalities, request.top_k))
            }
            Err(err) => Err(err),
        };

        self.finish(stack_key, &request.query, "hybrid", started, result)
            .await
    }

    async fn run(
        &self,
        stack_key: &str,
        query: QueryInput,
        kind_tag: &str,
        top_k: usize,
        filter: Option<MetadataFilter>,
        score_floor: Option<f32>,
        environment: &str,
    ) -> Result<Vec<SearchHit>, AppError> {
        let access_token = self.credentials.get_valid_access_token(stack_key).await?;
        let binding = self
            .router
            .ensure_index(stack_key, self.embedder.dimension())
            .await?;

        let mut filter = filter.unwrap_or_default();
        filter.insert("kind".into(), Value::String(kind_tag.to_owned()));

        let mut ctx = PipelineContext {
            embedder: &self.embedder,
            store: self.router.store(),
            content_api: &self.content_api,
            reranker: self.reranker.as_ref(),
            stack_key,
            access_token: &access_token,
            environment,
            binding: &binding,
            query,
            top_k,
            filter,
            score_floor,
            query_vector: None,
            candidates: Vec::new(),
            hits: Vec::new(),
        };

        let stages: Vec<BoxedStage> = vec![
            Box::new(EmbedQueryStage),
            Box::new(CollectCandidatesStage),
            Box::new(RerankStage),
            Box::new(EnrichStage),
            Box::new(AssembleStage),
        ];

        let mut timings = PipelineStageTimings::default();
        for stage in stages {
            let stage_start = Instant::now();
            stage.execute(&mut ctx).await?;
            timings.record(stage.kind(), stage_start.elapsed());
        }

        info!(
            %stack_key,
            embed_ms = timings.embed_ms(),
            collect_ms = timings.collect_candidates_ms(),
            rerank_ms = timings.rerank_ms(),
            enrich_ms = timings.enrich_ms(),
            assemble_ms = timings.assemble_ms(),
            hits = ctx.hits.len(),
            "retrieval pipeline finished"
        );

        Ok(ctx.hits)
    }

    async fn finish(
        &self,
        stack_key: &str,
        query: &str,
        modality: &str,
        started: Instant,
        result: Result<Vec<SearchHit>, AppError>,
    ) -> Result<SearchResponse, AppError> {
        let took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        telemetry::record_outcome(&self.db, stack_key, query, modality, took_ms, &result).await;

        result.map(|hits| SearchResponse { hits, took_ms })
    }
}
