#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod fusion;
pub mod pipeline;
pub mod reranking;
pub mod telemetry;

pub use pipeline::{
    HybridSearchRequest, ImageSearchRequest, RetrievalPipeline, SearchHit, SearchRequest,
    SearchResponse, StageKind,
};
pub use reranking::{DynReranker, Reranker, RerankerPool};
