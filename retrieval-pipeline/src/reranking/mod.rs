use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::available_parallelism,
};

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use fastembed::{RerankInitOptions, TextRerank};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Cross-encoder reranking seam. The pipeline only depends on this trait,
/// so tests can inject an ordering or a failure without loading a model.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`. Returns `(document index, score)`
    /// pairs sorted by descending relevance.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<(usize, f32)>, AppError>;
}

pub type DynReranker = Arc<dyn Reranker>;

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

/// Fixed-size pool of fastembed rerank engines. The semaphore enforces
/// backpressure; engine selection is a simple rotating counter.
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Build the pool at startup. `pool_size` bounds parallel reranks.
    pub fn new(pool_size: usize) -> Result<Arc<Self>, AppError> {
        Self::new_with_options(pool_size, RerankInitOptions::default())
    }

    fn new_with_options(
        pool_size: usize,
        init_options: RerankInitOptions,
    ) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "reranking_pool_size must be greater than zero".to_string(),
            ));
        }

        fs::create_dir_all(&init_options.cache_dir)?;

        let mut engines = Vec::with_capacity(pool_size);
        for x in 0..pool_size {
            debug!("creating reranking engine: {x}");
            let model = TextRerank::try_new(init_options.clone())
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    /// Initialize a pool from application configuration; `None` when
    /// reranking is disabled.
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !config.reranking_enabled {
            return Ok(None);
        }

        let pool_size = config.reranking_pool_size.unwrap_or_else(default_pool_size);

        let mut options = RerankInitOptions::default();
        if let Some(cache_dir) = &config.fastembed_cache_dir {
            options.cache_dir = PathBuf::from(cache_dir);
        }

        Self::new_with_options(pool_size, options).map(Some)
    }

    /// Check out capacity plus an engine.
    pub async fn checkout(self: &Arc<Self>) -> RerankerLease {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        let idx = pick_engine_index(self.engines.len());
        let engine = self.engines[idx].clone();

        RerankerLease {
            _permit: permit,
            engine,
        }
    }
}

fn default_pool_size() -> usize {
    available_parallelism()
        .map(|value| value.get().min(2))
        .unwrap_or(2)
        .max(1)
}

pub struct RerankerLease {
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<(usize, f32)>, AppError> {
        let mut engine = self.engine.lock().await;
        let results = engine
            .rerank(query, documents.iter().map(String::as_str).collect::<Vec<_>>(), false, None)
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|r| (r.index, r.score))
            .collect())
    }
}

#[async_trait]
impl Reranker for RerankerPool {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<(usize, f32)>, AppError> {
        // `checkout` needs Arc<Self>; the pool is always held in one.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");
        let idx = pick_engine_index(self.engines.len());
        let lease = RerankerLease {
            _permit: permit,
            engine: self.engines[idx].clone(),
        };
        lease.rerank(query, documents).await
    }
}
