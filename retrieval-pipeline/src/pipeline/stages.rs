use async_trait::async_trait;
use common::{
    cms::DynContentApi,
    error::AppError,
    utils::embedding::{DynEmbedder, EmbeddingMode},
    vector::{routing::TenantIndexBinding, DynVectorStore, MetadataFilter, VectorMatch},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::reranking::DynReranker;

use super::{PipelineStage, SearchHit, StageKind};

/// What the query embedding is derived from.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    Image(String),
}

impl QueryInput {
    fn as_str(&self) -> &str {
        match self {
            QueryInput::Text(s) | QueryInput::Image(s) => s,
        }
    }
}

pub struct PipelineContext<'a> {
    pub embedder: &'a DynEmbedder,
    pub store: &'a DynVectorStore,
    pub content_api: &'a DynContentApi,
    pub reranker: Option<&'a DynReranker>,
    pub stack_key: &'a str,
    pub access_token: &'a str,
    pub environment: &'a str,
    pub binding: &'a TenantIndexBinding,
    pub query: QueryInput,
    pub top_k: usize,
    pub filter: MetadataFilter,
    pub score_floor: Option<f32>,
    pub query_vector: Option<Vec<f32>>,
    pub candidates: Vec<VectorMatch>,
    pub hits: Vec<SearchHit>,
}

pub struct EmbedQueryStage;

#[async_trait]
impl PipelineStage for EmbedQueryStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let vector = match &ctx.query {
            QueryInput::Text(text) => ctx.embedder.embed(text, EmbeddingMode::Query).await?,
            QueryInput::Image(url) => ctx.embedder.embed_image(url).await?,
        };
        ctx.query_vector = Some(vector);
        Ok(())
    }
}

pub struct CollectCandidatesStage;

#[async_trait]
impl PipelineStage for CollectCandidatesStage {
    fn kind(&self) -> StageKind {
        StageKind::CollectCandidates
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let vector = ctx
            .query_vector
            .as_ref()
            .ok_or_else(|| AppError::InternalError("candidates requested before embed".into()))?;

        // Over-fetch so rerank and enrichment have room to drop candidates.
        let limit = (ctx.top_k * 2).max(ctx.top_k);
        let matches = ctx
            .store
            .query(
                &ctx.binding.index_name,
                vector,
                limit,
                Some(&ctx.filter),
                ctx.score_floor,
            )
            .await?;

        debug!(candidates = matches.len(), "collected candidates");
        ctx.candidates = matches;
        Ok(())
    }
}

pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let Some(reranker) = ctx.reranker else {
            return Ok(());
        };
        if ctx.candidates.len() < 2 {
            return Ok(());
        }

        let documents: Vec<String> = ctx
            .candidates
            .iter()
            .map(|c| {
                c.metadata
                    .get("snippet")
                    .and_then(Value::as_str)
                    .unwrap_or(c.id.as_str())
                    .to_owned()
            })
            .collect();

        match reranker.rerank(ctx.query.as_str(), documents).await {
            Ok(ranking) => {
                let mut reordered = Vec::with_capacity(ctx.candidates.len());
                for (index, score) in ranking {
                    if let Some(candidate) = ctx.candidates.get(index) {
                        let mut candidate = candidate.clone();
                        candidate.score = score;
                        reordered.push(candidate);
                    }
                }
                if !reordered.is_empty() {
                    ctx.candidates = reordered;
                }
            }
            Err(err) => {
                // Graceful degradation: keep the similarity ranking.
                warn!(stack_key = %ctx.stack_key, error = %err, "rerank failed; similarity order kept");
            }
        }
        Ok(())
    }
}

pub struct EnrichStage;

#[async_trait]
impl PipelineStage for EnrichStage {
    fn kind(&self) -> StageKind {
        StageKind::Enrich
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let mut hits = Vec::with_capacity(ctx.candidates.len());

        for candidate in &ctx.candidates {
            let content_type = candidate
                .metadata
                .get("content_type")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let snippet = candidate
                .metadata
                .get("snippet")
                .and_then(Value::as_str)
                .map(str::to_owned);

            let is_entry = candidate
                .metadata
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind == "entry");

            let entry = if is_entry {
                let Some(content_type) = content_type.as_deref() else {
                    warn!(candidate = %candidate.id, "candidate without content_type dropped");
                    continue;
                };
                match ctx
                    .content_api
                    .get_entry(
                        ctx.stack_key,
                        ctx.access_token,
                        content_type,
                        &candidate.id,
                        ctx.environment,
                    )
                    .await
                {
                    Ok(Some(entry)) => Some(entry.fields),
                    // Stale vector or transient CMS failure: drop this hit,
                    // never the whole request.
                    Ok(None) => {
                        debug!(candidate = %candidate.id, "entry gone from CMS; dropped");
                        continue;
                    }
                    Err(err) => {
                        warn!(candidate = %candidate.id, error = %err, "enrichment failed; dropped");
                        continue;
                    }
                }
            } else {
                // Asset hits render from their indexed metadata.
                None
            };

            hits.push(SearchHit {
                id: candidate.id.clone(),
                score: candidate.score,
                content_type,
                snippet,
                metadata: candidate.metadata.clone(),
                entry,
            });
        }

        ctx.hits = hits;
        Ok(())
    }
}

pub struct AssembleStage;

#[async_trait]
impl PipelineStage for AssembleStage {
    fn kind(&self) -> StageKind {
        StageKind::Assemble
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.hits
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ctx.hits.truncate(ctx.top_k);
        Ok(())
    }
}
