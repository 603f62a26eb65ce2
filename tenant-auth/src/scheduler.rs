use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use tracing::{error, info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::stack_credential::{
            CredentialState, StackCredential, DEACTIVATION_GRACE_HOURS, INACTIVE_RETENTION_DAYS,
            REFRESH_SAFETY_MARGIN_SECS,
        },
    },
};

use crate::manager::StackCredentialManager;

/// Outcome counts for one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Active credentials refreshed ahead of expiry.
    pub refreshed: usize,
    /// Inactive credentials that came back via a successful retry.
    pub recovered: usize,
    /// Candidates whose refresh attempt failed; retried next sweep.
    pub failed: usize,
}

/// Background refresh loop. Sweeps on a fixed interval until the process
/// shuts down; a failing sweep is logged and the loop keeps going.
pub async fn run_refresh_loop(
    db: Arc<SurrealDbClient>,
    manager: Arc<StackCredentialManager>,
    sweep_interval: Duration,
) {
    info!(interval_secs = sweep_interval.as_secs(), "credential refresh loop started");
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_once(&db, &manager).await {
            Ok(report) => {
                if report.refreshed > 0 || report.recovered > 0 || report.failed > 0 {
                    info!(
                        refreshed = report.refreshed,
                        recovered = report.recovered,
                        failed = report.failed,
                        "credential sweep finished"
                    );
                }
            }
            Err(err) => error!(error = %err, "credential sweep failed"),
        }
    }
}

/// One sweep pass: refresh active credentials inside the safety margin,
/// retry recently deactivated ones still inside the grace window, and purge
/// inactive records past retention. One tenant's failure never blocks the
/// rest.
pub async fn sweep_once(
    db: &SurrealDbClient,
    manager: &StackCredentialManager,
) -> Result<SweepReport, AppError> {
    let now = chrono::Utc::now();
    let candidates = StackCredential::sweep_candidates(
        db,
        now,
        ChronoDuration::seconds(REFRESH_SAFETY_MARGIN_SECS),
        ChronoDuration::hours(DEACTIVATION_GRACE_HOURS),
    )
    .await?;

    let mut report = SweepReport::default();

    for credential in candidates {
        let stack_key = credential.stack_key.clone();
        match credential.state {
            CredentialState::Active => match manager.refresh_credential(credential).await {
                Ok(_) => report.refreshed += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(%stack_key, error = %err, "scheduled refresh failed");
                }
            },
            CredentialState::Inactive => match manager.retry_inactive(&credential).await {
                Ok(()) => report.recovered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(%stack_key, error = %err, "inactive credential retry failed");
                }
            },
            // Mid-refresh elsewhere; leave it for the next sweep.
            CredentialState::Refreshing => {}
        }
    }

    StackCredential::purge_inactive(db, now, ChronoDuration::days(INACTIVE_RETENTION_DAYS)).await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::cms::oauth::{TokenBundle, TokenEndpoint};
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
        sync::Mutex,
    };
    use uuid::Uuid;

    /// Succeeds for every stack except those listed as failing.
    struct SelectiveEndpoint {
        failing_tokens: Mutex<HashSet<String>>,
        refreshes: AtomicUsize,
    }

    impl SelectiveEndpoint {
        fn new(failing_tokens: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing_tokens: Mutex::new(
                    failing_tokens.iter().map(|t| (*t).to_owned()).collect(),
                ),
                refreshes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenEndpoint for SelectiveEndpoint {
        async fn exchange_code(&self, _code: &str) -> Result<TokenBundle, AppError> {
            unreachable!("sweep never exchanges codes")
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, AppError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing_tokens.lock().expect("lock");
            if failing.contains(refresh_token) {
                return Err(AppError::ProviderUnavailable("provider down".into()));
            }
            Ok(TokenBundle {
                access_token: "swept-token".into(),
                refresh_token: "swept-refresh".into(),
                expires_in: 3600,
            })
        }
    }

    async fn memory_db() -> Arc<SurrealDbClient> {
        Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        )
    }

    fn bundle(refresh_token: &str, expires_in: i64) -> TokenBundle {
        TokenBundle {
            access_token: "initial".into(),
            refresh_token: refresh_token.to_owned(),
            expires_in,
        }
    }

    #[tokio::test]
    async fn test_sweep_refreshes_only_near_expiry() {
        let db = memory_db().await;
        let endpoint = SelectiveEndpoint::new(&[]);
        let manager = StackCredentialManager::new(db.clone(), endpoint.clone());

        StackCredential::upsert(&db, "stack-soon", &bundle("rt-soon", 120))
            .await
            .expect("create");
        StackCredential::upsert(&db, "stack-later", &bundle("rt-later", 3600))
            .await
            .expect("create");

        let report = sweep_once(&db, &manager).await.expect("sweep");
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);

        let soon = StackCredential::find_by_stack_key(&db, "stack-soon")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(soon.access_token, "swept-token");
    }

    #[tokio::test]
    async fn test_failing_tenant_does_not_block_others() {
        let db = memory_db().await;
        let endpoint = SelectiveEndpoint::new(&["rt-broken"]);
        let manager = StackCredentialManager::new(db.clone(), endpoint);

        StackCredential::upsert(&db, "stack-broken", &bundle("rt-broken", 60))
            .await
            .expect("create");
        StackCredential::upsert(&db, "stack-fine", &bundle("rt-fine", 60))
            .await
            .expect("create");

        let report = sweep_once(&db, &manager).await.expect("sweep");
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 1);

        // Transient failure keeps the credential active for the next sweep.
        let broken = StackCredential::find_by_stack_key(&db, "stack-broken")
            .await
            .expect("find")
            .expect("exists");
        assert!(broken.is_active());
    }

    #[tokio::test]
    async fn test_sweep_recovers_recently_deactivated_credential() {
        let db = memory_db().await;
        let endpoint = SelectiveEndpoint::new(&[]);
        let manager = StackCredentialManager::new(db.clone(), endpoint);

        StackCredential::upsert(&db, "stack-down", &bundle("rt-down", 3600))
            .await
            .expect("create");
        StackCredential::deactivate_for_stack(&db, "stack-down")
            .await
            .expect("deactivate");

        let report = sweep_once(&db, &manager).await.expect("sweep");
        assert_eq!(report.recovered, 1);

        let revived = StackCredential::find_by_stack_key(&db, "stack-down")
            .await
            .expect("find")
            .expect("exists");
        assert!(revived.is_active());
        assert_eq!(revived.access_token, "swept-token");
    }

    #[tokio::test]
    async fn test_sweep_leaves_unrecoverable_inactive_credential_inactive() {
        let db = memory_db().await;
        let endpoint = SelectiveEndpoint::new(&["rt-dead"]);
        let manager = StackCredentialManager::new(db.clone(), endpoint);

        StackCredential::upsert(&db, "stack-dead", &bundle("rt-dead", 3600))
            .await
            .expect("create");
        StackCredential::deactivate_for_stack(&db, "stack-dead")
            .await
            .expect("deactivate");

        let report = sweep_once(&db, &manager).await.expect("sweep");
        assert_eq!(report.recovered, 0);
        assert_eq!(report.failed, 1);

        let still_down = StackCredential::find_by_stack_key(&db, "stack-dead")
            .await
            .expect("find")
            .expect("exists");
        assert!(!still_down.is_active());
    }
}
