pub mod http;
pub mod memory;
pub mod routing;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
        }
    }
}

/// One embedded document as stored in a tenant's index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub vector_count: usize,
    pub dimension: usize,
}

/// Exact-match metadata filter applied at query time.
pub type MetadataFilter = BTreeMap<String, serde_json::Value>;

/// Seam for the vector database provider. The index name is an explicit
/// parameter on every data-plane call; there is no ambient binding to race.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), AppError>;

    async fn list_indexes(&self) -> Result<Vec<String>, AppError>;

    async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>, AppError>;

    async fn delete_index(&self, name: &str) -> Result<(), AppError>;

    /// Upsert replaces in place: re-indexing an unchanged entry is a no-op
    /// at the data level, and updates carry no delete/insert window.
    async fn upsert(&self, index: &str, record: VectorRecord) -> Result<(), AppError>;

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        score_floor: Option<f32>,
    ) -> Result<Vec<VectorMatch>, AppError>;

    /// Deleting an id that is not present is not an error.
    async fn delete_one(&self, index: &str, id: &str) -> Result<(), AppError>;

    async fn describe_stats(&self, index: &str) -> Result<IndexStats, AppError>;
}

pub type DynVectorStore = Arc<dyn VectorStore>;
