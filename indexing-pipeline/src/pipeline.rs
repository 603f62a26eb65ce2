use std::{sync::Arc, time::Duration};

use common::{
    cms::{CmsEntry, DynContentApi},
    error::AppError,
    utils::{
        config::AppConfig,
        embedding::{DynEmbedder, EmbeddingMode},
    },
    vector::{
        routing::{IndexRouter, TenantIndexBinding},
        VectorRecord,
    },
};
use serde::Serialize;
use serde_json::Value;
use tenant_auth::StackCredentialManager;
use tracing::{info, warn};

use crate::normalizer::normalize_entry;

/// Recorded per-entry failures are capped so a broken provider cannot grow
/// an unbounded error list across a large stack.
const MAX_RECORDED_ERRORS: usize = 25;

#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_pause: Duration::from_millis(1000),
        }
    }
}

impl IndexingConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.indexing_batch_size.max(1),
            batch_pause: Duration::from_millis(config.indexing_batch_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexingError {
    pub entry_id: String,
    pub content_type: String,
    pub error: String,
}

/// Outcome of one full-stack indexing run.
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct IndexingSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<IndexingError>,
}

impl IndexingSummary {
    fn record_failure(&mut self, entry_id: &str, content_type: &str, error: &AppError) {
        self.failed += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(IndexingError {
                entry_id: entry_id.to_owned(),
                content_type: content_type.to_owned(),
                error: error.to_string(),
            });
        }
    }
}

enum EntryOutcome {
    Indexed,
    Skipped,
}

/// First line of display/rerank text carried in the vector metadata.
const SNIPPET_LEN: usize = 300;

fn snippet_of(text: &str) -> String {
    if text.len() <= SNIPPET_LEN {
        return text.to_owned();
    }
    let mut cut = SNIPPET_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_owned()
}

/// Drives fetch, normalize, embed, upsert for one tenant at a time.
/// Failures are isolated per document; one broken entry never aborts a run.
pub struct IndexingPipeline {
    credentials: Arc<StackCredentialManager>,
    content_api: DynContentApi,
    embedder: DynEmbedder,
    router: Arc<IndexRouter>,
    config: IndexingConfig,
}

impl IndexingPipeline {
    pub fn new(
        credentials: Arc<StackCredentialManager>,
        content_api: DynContentApi,
        embedder: DynEmbedder,
        router: Arc<IndexRouter>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            credentials,
            content_api,
            embedder,
            router,
            config,
        }
    }

    pub(crate) fn credentials(&self) -> &StackCredentialManager {
        &self.credentials
    }

    pub(crate) fn content_api(&self) -> &DynContentApi {
        &self.content_api
    }

    /// Tenant-initiated full reset: drop the stack's index and recreate it
    /// empty. The next indexing run repopulates it.
    pub async fn reset_index(&self, stack_key: &str) -> Result<(), AppError> {
        self.credentials.get_valid_access_token(stack_key).await?;
        self.router
            .reset_index(stack_key, self.embedder.dimension())
            .await?;
        info!(%stack_key, "tenant index reset");
        Ok(())
    }

    /// Re-index every entry of a stack. `content_type_filter`, when given,
    /// restricts the run to the named content types.
    ///
    /// Credential, provisioning, and content-type listing failures abort the
    /// run; anything per-entry lands in the summary instead.
    pub async fn index_all(
        &self,
        stack_key: &str,
        environment: &str,
        content_type_filter: Option<&[String]>,
    ) -> Result<IndexingSummary, AppError> {
        let access_token = self.credentials.get_valid_access_token(stack_key).await?;
        let binding = self
            .router
            .ensure_index(stack_key, self.embedder.dimension())
            .await?;

        let mut content_types = self
            .content_api
            .list_content_types(stack_key, &access_token, environment)
            .await?;
        if let Some(filter) = content_type_filter {
            content_types.retain(|ct| filter.contains(ct));
        }

        info!(%stack_key, %environment, content_types = content_types.len(), "indexing run started");

        let mut summary = IndexingSummary::default();

        for content_type in &content_types {
            let entries = match self
                .content_api
                .list_entries(stack_key, &access_token, content_type, environment)
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(%stack_key, %content_type, error = %err, "listing entries failed");
                    summary.record_failure("*", content_type, &err);
                    continue;
                }
            };

            let mut batches = entries.chunks(self.config.batch_size).peekable();
            while let Some(batch) = batches.next() {
                for entry in batch {
                    match self.process_entry(&binding, entry).await {
                        Ok(EntryOutcome::Indexed) => summary.indexed += 1,
                        Ok(EntryOutcome::Skipped) => summary.skipped += 1,
                        Err(err) => {
                            warn!(%stack_key, entry_id = %entry.id, error = %err, "entry failed");
                            summary.record_failure(&entry.id, content_type, &err);
                        }
                    }
                }
                // Courtesy pause toward the embedding and vector providers;
                // fixed, not adaptive.
                if batches.peek().is_some() {
                    tokio::time::sleep(self.config.batch_pause).await;
                }
            }
        }

        info!(
            %stack_key,
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            "indexing run finished"
        );

        Ok(summary)
    }

    /// Index one entry. `Ok(false)` means the normalizer produced no text
    /// and the entry was skipped.
    pub async fn index_entry(&self, stack_key: &str, entry: &CmsEntry) -> Result<bool, AppError> {
        let binding = self
            .router
            .ensure_index(stack_key, self.embedder.dimension())
            .await?;
        match self.process_entry(&binding, entry).await? {
            EntryOutcome::Indexed => Ok(true),
            EntryOutcome::Skipped => Ok(false),
        }
    }

    /// Upsert replaces the stored vector in place, so an update is the same
    /// call as a first-time index; there is no delete/insert window.
    pub async fn update_entry(&self, stack_key: &str, entry: &CmsEntry) -> Result<bool, AppError> {
        self.index_entry(stack_key, entry).await
    }

    /// Index the stack's image assets for the image search variant. Asset
    /// vectors carry a `kind = asset` tag so text and image results stay
    /// separable at query time. Backends without an image model fail each
    /// asset individually, in the summary, like any per-document error.
    pub async fn index_assets(
        &self,
        stack_key: &str,
        environment: &str,
    ) -> Result<IndexingSummary, AppError> {
        let access_token = self.credentials.get_valid_access_token(stack_key).await?;
        let binding = self
            .router
            .ensure_index(stack_key, self.embedder.dimension())
            .await?;

        let assets = self
            .content_api
            .list_assets(stack_key, &access_token, environment)
            .await?;

        let mut summary = IndexingSummary::default();
        let mut batches = assets.chunks(self.config.batch_size).peekable();
        while let Some(batch) = batches.next() {
            for asset in batch {
                if !asset.content_type.starts_with("image/") {
                    summary.skipped += 1;
                    continue;
                }
                match self.process_asset(&binding, asset).await {
                    Ok(()) => summary.indexed += 1,
                    Err(err) => {
                        warn!(%stack_key, asset_id = %asset.id, error = %err, "asset failed");
                        summary.record_failure(&asset.id, "asset", &err);
                    }
                }
            }
            if batches.peek().is_some() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        info!(
            %stack_key,
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            "asset indexing finished"
        );

        Ok(summary)
    }

    async fn process_asset(
        &self,
        binding: &TenantIndexBinding,
        asset: &common::cms::CmsAsset,
    ) -> Result<(), AppError> {
        let vector = self.embedder.embed_image(&asset.url).await?;

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("stack_key".into(), Value::String(binding.stack_key.clone()));
        metadata.insert("kind".into(), Value::String("asset".into()));
        metadata.insert("url".into(), Value::String(asset.url.clone()));
        metadata.insert("content_type".into(), Value::String(asset.content_type.clone()));
        if let Some(title) = &asset.title {
            metadata.insert("title".into(), Value::String(title.clone()));
            metadata.insert("snippet".into(), Value::String(title.clone()));
        }

        self.router
            .store()
            .upsert(
                &binding.index_name,
                VectorRecord {
                    id: asset.id.clone(),
                    vector,
                    metadata,
                },
            )
            .await
    }

    /// Idempotent: removing an id that was never indexed succeeds.
    pub async fn remove_entry(&self, stack_key: &str, entry_id: &str) -> Result<(), AppError> {
        let binding = self
            .router
            .ensure_index(stack_key, self.embedder.dimension())
            .await?;
        self.router
            .store()
            .delete_one(&binding.index_name, entry_id)
            .await
    }

    async fn process_entry(
        &self,
        binding: &TenantIndexBinding,
        entry: &CmsEntry,
    ) -> Result<EntryOutcome, AppError> {
        let Some(document) = normalize_entry(entry) else {
            return Ok(EntryOutcome::Skipped);
        };

        let vector = self
            .embedder
            .embed(&document.text, EmbeddingMode::Document)
            .await?;

        let mut metadata = document.metadata;
        metadata.insert("stack_key".into(), Value::String(binding.stack_key.clone()));
        metadata.insert("kind".into(), Value::String("entry".into()));
        metadata.insert("snippet".into(), Value::String(snippet_of(&document.text)));

        self.router
            .store()
            .upsert(
                &binding.index_name,
                VectorRecord {
                    id: document.id,
                    vector,
                    metadata,
                },
            )
            .await?;

        Ok(EntryOutcome::Indexed)
    }
}
