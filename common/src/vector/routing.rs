use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::info;

use crate::error::AppError;

use super::{DistanceMetric, DynVectorStore};

/// Provider limit on index names.
pub const MAX_INDEX_NAME_LEN: usize = 45;
/// Hex chars of the tenant-key digest appended to every index name.
const NAME_DIGEST_LEN: usize = 8;
const READY_POLL_INTERVAL_MS: u64 = 2000;

/// The resolved tenant-to-index association, passed explicitly into every
/// search/upsert call. Being a value rather than shared state, two tenants'
/// requests cannot cross-bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIndexBinding {
    pub stack_key: String,
    pub index_name: String,
    pub dimension: usize,
}

/// Deterministic, collision-resistant index name for a tenant key.
///
/// The readable prefix is the key with non-alphanumerics stripped; the
/// digest suffix keeps two keys distinct even when their stripped prefixes
/// collide or truncation discards the differing part.
pub fn index_name_for(stack_key: &str) -> String {
    let stripped: String = stack_key
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let digest = Sha256::digest(stack_key.as_bytes());
    let suffix: String = digest
        .iter()
        .take(NAME_DIGEST_LEN / 2)
        .map(|byte| format!("{byte:02x}"))
        .collect();

    let budget = MAX_INDEX_NAME_LEN - NAME_DIGEST_LEN - 1;
    let prefix: String = stripped.chars().take(budget).collect();

    if prefix.is_empty() {
        format!("stack-{suffix}")
    } else {
        format!("{prefix}-{suffix}")
    }
}

/// Lazily provisions and resolves per-tenant vector indexes.
pub struct IndexRouter {
    store: DynVectorStore,
    ready_timeout: Duration,
}

impl IndexRouter {
    pub fn new(store: DynVectorStore, ready_timeout: Duration) -> Self {
        Self {
            store,
            ready_timeout,
        }
    }

    pub fn store(&self) -> &DynVectorStore {
        &self.store
    }

    /// Idempotent: creates the tenant's index if absent, waits until the
    /// provider reports it ready, and returns the binding to thread through
    /// subsequent calls.
    pub async fn ensure_index(
        &self,
        stack_key: &str,
        dimension: usize,
    ) -> Result<TenantIndexBinding, AppError> {
        let index_name = index_name_for(stack_key);

        let existing = self.store.describe_index(&index_name).await?;
        match existing {
            Some(description) if description.ready => {
                return Ok(TenantIndexBinding {
                    stack_key: stack_key.to_owned(),
                    index_name,
                    dimension: description.dimension,
                });
            }
            Some(_) => {}
            None => {
                info!(%stack_key, %index_name, dimension, "provisioning tenant index");
                self.store
                    .create_index(&index_name, dimension, DistanceMetric::Cosine)
                    .await?;
            }
        }

        self.wait_until_ready(&index_name).await?;

        Ok(TenantIndexBinding {
            stack_key: stack_key.to_owned(),
            index_name,
            dimension,
        })
    }

    /// Tenant-initiated reset: drop the index and provision a fresh one.
    pub async fn reset_index(
        &self,
        stack_key: &str,
        dimension: usize,
    ) -> Result<TenantIndexBinding, AppError> {
        let index_name = index_name_for(stack_key);
        self.store.delete_index(&index_name).await?;
        self.ensure_index(stack_key, dimension).await
    }

    async fn wait_until_ready(&self, index_name: &str) -> Result<(), AppError> {
        let attempts =
            (self.ready_timeout.as_millis() / u128::from(READY_POLL_INTERVAL_MS)).max(1) as usize;
        let strategy = FixedInterval::from_millis(READY_POLL_INTERVAL_MS).take(attempts);

        let store = &self.store;
        Retry::spawn(strategy, || async {
            match store.describe_index(index_name).await {
                Ok(Some(description)) if description.ready => Ok(()),
                Ok(_) => Err(AppError::ProvisionTimeout(format!(
                    "index {index_name} not ready yet"
                ))),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|_| {
            AppError::ProvisionTimeout(format!(
                "index {index_name} did not become ready within {:?}",
                self.ready_timeout
            ))
        })
    }
}
