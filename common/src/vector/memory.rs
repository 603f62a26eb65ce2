use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AppError;

use super::{
    DistanceMetric, IndexDescription, IndexStats, MetadataFilter, VectorMatch, VectorRecord,
    VectorStore,
};

/// In-process vector store with cosine scoring. Used by tests and by local
/// runs without a hosted provider; indexes are ready immediately.
#[derive(Default)]
pub struct InMemoryVectorStore {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
}

struct MemoryIndex {
    dimension: usize,
    records: HashMap<String, VectorRecord>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(record: &VectorRecord, filter: Option<&MetadataFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter
        .iter()
        .all(|(key, expected)| record.metadata.get(key) == Some(expected))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        _metric: DistanceMetric,
    ) -> Result<(), AppError> {
        let mut guard = self.indexes.lock().expect("lock");
        guard.entry(name.to_owned()).or_insert(MemoryIndex {
            dimension,
            records: HashMap::new(),
        });
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        let guard = self.indexes.lock().expect("lock");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>, AppError> {
        let guard = self.indexes.lock().expect("lock");
        Ok(guard.get(name).map(|index| IndexDescription {
            name: name.to_owned(),
            dimension: index.dimension,
            ready: true,
        }))
    }

    async fn delete_index(&self, name: &str) -> Result<(), AppError> {
        let mut guard = self.indexes.lock().expect("lock");
        guard.remove(name);
        Ok(())
    }

    async fn upsert(&self, index: &str, record: VectorRecord) -> Result<(), AppError> {
        let mut guard = self.indexes.lock().expect("lock");
        let target = guard
            .get_mut(index)
            .ok_or_else(|| AppError::NotFound(format!("index {index} does not exist")))?;

        if record.vector.len() != target.dimension {
            return Err(AppError::Validation(format!(
                "vector dimension {} does not match index dimension {}",
                record.vector.len(),
                target.dimension
            )));
        }

        target.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        score_floor: Option<f32>,
    ) -> Result<Vec<VectorMatch>, AppError> {
        let guard = self.indexes.lock().expect("lock");
        let target = guard
            .get(index)
            .ok_or_else(|| AppError::NotFound(format!("index {index} does not exist")))?;

        let mut matches: Vec<VectorMatch> = target
            .records
            .values()
            .filter(|record| matches_filter(record, filter))
            .map(|record| VectorMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .filter(|m| score_floor.map_or(true, |floor| m.score >= floor))
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_one(&self, index: &str, id: &str) -> Result<(), AppError> {
        let mut guard = self.indexes.lock().expect("lock");
        if let Some(target) = guard.get_mut(index) {
            target.records.remove(id);
        }
        Ok(())
    }

    async fn describe_stats(&self, index: &str) -> Result<IndexStats, AppError> {
        let guard = self.indexes.lock().expect("lock");
        let target = guard
            .get(index)
            .ok_or_else(|| AppError::NotFound(format!("index {index} does not exist")))?;

        Ok(IndexStats {
            vector_count: target.records.len(),
            dimension: target.dimension,
        })
    }
}
