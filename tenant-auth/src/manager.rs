use std::{collections::HashMap, sync::Arc};

use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use common::{
    cms::oauth::{DynTokenEndpoint, TokenBundle},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::stack_credential::{CredentialState, StackCredential, REFRESH_SAFETY_MARGIN_SECS},
    },
    utils::best_effort::spawn_best_effort,
};

/// Owns the lifecycle of every tenant's access/refresh token pair.
///
/// Refresh is single-flight per stack key: concurrent callers for the same
/// near-expiry credential serialize on a per-key mutex, and whoever arrives
/// second finds the credential already refreshed and returns without a
/// provider call.
pub struct StackCredentialManager {
    db: Arc<SurrealDbClient>,
    token_endpoint: DynTokenEndpoint,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StackCredentialManager {
    pub fn new(db: Arc<SurrealDbClient>, token_endpoint: DynTokenEndpoint) -> Self {
        Self {
            db,
            token_endpoint,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn safety_margin() -> ChronoDuration {
        ChronoDuration::seconds(REFRESH_SAFETY_MARGIN_SECS)
    }

    /// Resolve a valid access token for a stack, refreshing synchronously if
    /// the stored one is inside the safety margin.
    ///
    /// Fails with `NotFound` when the stack never authorized, and with
    /// `Auth` when the credential is inactive or the provider rejected the
    /// refresh token (both terminal until re-authorization).
    pub async fn get_valid_access_token(&self, stack_key: &str) -> Result<String, AppError> {
        let credential = self.require_credential(stack_key).await?;

        let now = chrono::Utc::now();
        if credential.is_active() && !credential.expires_within(Self::safety_margin(), now) {
            self.touch_last_used(stack_key);
            return Ok(credential.access_token);
        }

        let lock = self.lock_for(stack_key).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have finished the
        // refresh while this one waited.
        let credential = self.require_credential(stack_key).await?;
        let now = chrono::Utc::now();
        if credential.is_active() && !credential.expires_within(Self::safety_margin(), now) {
            self.touch_last_used(stack_key);
            return Ok(credential.access_token);
        }

        let refreshed = self.refresh_credential(credential).await?;
        self.touch_last_used(stack_key);
        Ok(refreshed.access_token)
    }

    /// Authorization-code leg of the handshake, driven by the OAuth
    /// callback. Persisting the bundle reactivates an inactive stack.
    pub async fn exchange_authorization_code(
        &self,
        stack_key: &str,
        code: &str,
    ) -> Result<StackCredential, AppError> {
        let bundle = self.token_endpoint.exchange_code(code).await?;
        self.save_or_update(stack_key, &bundle).await
    }

    /// Upsert after the authorization handshake or a completed refresh.
    pub async fn save_or_update(
        &self,
        stack_key: &str,
        bundle: &TokenBundle,
    ) -> Result<StackCredential, AppError> {
        StackCredential::upsert(&self.db, stack_key, bundle).await
    }

    /// Force re-validation on next use; called when a downstream service
    /// answers with an authorization error. Idempotent.
    pub async fn deactivate(&self, stack_key: &str) -> Result<(), AppError> {
        StackCredential::deactivate_for_stack(&self.db, stack_key).await
    }

    /// Refresh one credential through the provider. Used by
    /// `get_valid_access_token` and by the background sweep.
    pub async fn refresh_credential(
        &self,
        credential: StackCredential,
    ) -> Result<StackCredential, AppError> {
        match credential.state {
            CredentialState::Active => {}
            CredentialState::Refreshing => {
                // Another process holds the refresh slot.
                return Err(AppError::ProviderUnavailable(format!(
                    "refresh already in progress for stack {}",
                    credential.stack_key
                )));
            }
            CredentialState::Inactive => {
                return Err(AppError::Auth(format!(
                    "stack {} requires re-authorization",
                    credential.stack_key
                )));
            }
        }

        let refreshing = credential.mark_refreshing(&self.db).await?;

        match self.token_endpoint.refresh(&refreshing.refresh_token).await {
            Ok(bundle) => {
                let refreshed = refreshing.complete_refresh(&bundle, &self.db).await?;
                info!(stack_key = %refreshed.stack_key, "credential refreshed");
                Ok(refreshed)
            }
            Err(AppError::Auth(reason)) => {
                // The refresh token itself is dead; only a new handshake helps.
                let dead = refreshing.reject_refresh(&self.db).await?;
                warn!(stack_key = %dead.stack_key, %reason, "refresh token rejected; credential deactivated");
                Err(AppError::Auth(format!(
                    "refresh rejected for stack {}: {reason}",
                    dead.stack_key
                )))
            }
            Err(err) => {
                // Transient: release the refresh slot, keep the old tokens.
                refreshing.abort_refresh(&self.db).await?;
                Err(err)
            }
        }
    }

    /// Retry a recently deactivated credential during the sweep's grace
    /// window. Success re-activates it via the normal upsert path.
    pub async fn retry_inactive(&self, credential: &StackCredential) -> Result<(), AppError> {
        match self.token_endpoint.refresh(&credential.refresh_token).await {
            Ok(bundle) => {
                StackCredential::upsert(&self.db, &credential.stack_key, &bundle).await?;
                info!(stack_key = %credential.stack_key, "inactive credential recovered");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn require_credential(&self, stack_key: &str) -> Result<StackCredential, AppError> {
        let credential = StackCredential::find_by_stack_key(&self.db, stack_key)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no credential stored for stack {stack_key}"))
            })?;

        if credential.state == CredentialState::Inactive {
            return Err(AppError::Auth(format!(
                "stack {stack_key} requires re-authorization"
            )));
        }

        Ok(credential)
    }

    fn touch_last_used(&self, stack_key: &str) {
        let db = self.db.clone();
        let key = stack_key.to_owned();
        spawn_best_effort("credential_last_used", async move {
            StackCredential::touch_last_used(&db, &key).await
        });
    }

    async fn lock_for(&self, stack_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(stack_key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
