use chrono::Duration as ChronoDuration;
use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{cms::oauth::TokenBundle, error::AppError, storage::db::SurrealDbClient, stored_object};

/// Tokens expiring within this margin are refreshed before being handed out.
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 300;
/// Recently deactivated credentials stay eligible for sweep retries this long.
pub const DEACTIVATION_GRACE_HOURS: i64 = 24;
/// Inactive credentials older than this are removed for good.
pub const INACTIVE_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum CredentialState {
    #[serde(rename = "Active")]
    #[default]
    Active,
    #[serde(rename = "Refreshing")]
    Refreshing,
    #[serde(rename = "Inactive")]
    Inactive,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::Active => "Active",
            CredentialState::Refreshing => "Refreshing",
            CredentialState::Inactive => "Inactive",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CredentialTransition {
    BeginRefresh,
    RefreshOk,
    RefreshRejected,
    RefreshAborted,
    Deactivate,
    Reauthorize,
}

impl CredentialTransition {
    fn as_str(&self) -> &'static str {
        match self {
            CredentialTransition::BeginRefresh => "begin_refresh",
            CredentialTransition::RefreshOk => "refresh_ok",
            CredentialTransition::RefreshRejected => "refresh_rejected",
            CredentialTransition::RefreshAborted => "refresh_aborted",
            CredentialTransition::Deactivate => "deactivate",
            CredentialTransition::Reauthorize => "reauthorize",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: CredentialLifecycleMachine,
        initial: Active,
        states: [Active, Refreshing, Inactive],
        events {
            begin_refresh {
                transition: { from: Active, to: Refreshing }
            }
            refresh_ok {
                transition: { from: Refreshing, to: Active }
            }
            refresh_rejected {
                transition: { from: Refreshing, to: Inactive }
            }
            refresh_aborted {
                transition: { from: Refreshing, to: Active }
            }
            deactivate {
                transition: { from: Active, to: Inactive }
            }
            reauthorize {
                transition: { from: Inactive, to: Active }
            }
        }
    }

    pub(super) fn active() -> CredentialLifecycleMachine<(), Active> {
        CredentialLifecycleMachine::new(())
    }

    pub(super) fn refreshing() -> CredentialLifecycleMachine<(), Refreshing> {
        active()
            .begin_refresh()
            .expect("begin_refresh transition from Active should exist")
    }

    pub(super) fn inactive() -> CredentialLifecycleMachine<(), Inactive> {
        active()
            .deactivate()
            .expect("deactivate transition from Active should exist")
    }
}

fn invalid_transition(state: &CredentialState, event: CredentialTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid credential transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(
    state: &CredentialState,
    event: CredentialTransition,
) -> Result<CredentialState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (CredentialState::Active, CredentialTransition::BeginRefresh) => active()
            .begin_refresh()
            .map(|_| CredentialState::Refreshing)
            .map_err(|_| invalid_transition(state, event)),
        (CredentialState::Refreshing, CredentialTransition::RefreshOk) => refreshing()
            .refresh_ok()
            .map(|_| CredentialState::Active)
            .map_err(|_| invalid_transition(state, event)),
        (CredentialState::Refreshing, CredentialTransition::RefreshRejected) => refreshing()
            .refresh_rejected()
            .map(|_| CredentialState::Inactive)
            .map_err(|_| invalid_transition(state, event)),
        (CredentialState::Refreshing, CredentialTransition::RefreshAborted) => refreshing()
            .refresh_aborted()
            .map(|_| CredentialState::Active)
            .map_err(|_| invalid_transition(state, event)),
        (CredentialState::Active, CredentialTransition::Deactivate) => active()
            .deactivate()
            .map(|_| CredentialState::Inactive)
            .map_err(|_| invalid_transition(state, event)),
        (CredentialState::Inactive, CredentialTransition::Reauthorize) => inactive()
            .reauthorize()
            .map(|_| CredentialState::Active)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(StackCredential, "stack_credential", {
    stack_key: String,
    access_token: String,
    refresh_token: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    expires_at: chrono::DateTime<chrono::Utc>,
    state: CredentialState,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_used_at: Option<chrono::DateTime<chrono::Utc>>
});

impl StackCredential {
    pub fn new(stack_key: String, bundle: &TokenBundle) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            stack_key,
            access_token: bundle.access_token.clone(),
            refresh_token: bundle.refresh_token.clone(),
            expires_at: now + ChronoDuration::seconds(bundle.expires_in),
            state: CredentialState::Active,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == CredentialState::Active
    }

    pub fn expires_within(&self, margin: ChronoDuration, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at <= now + margin
    }

    /// Latest credential record for a stack, regardless of state. Historical
    /// inactive records may coexist; callers only ever see the newest one.
    pub async fn find_by_stack_key(
        db: &SurrealDbClient,
        stack_key: &str,
    ) -> Result<Option<StackCredential>, AppError> {
        let credential: Option<StackCredential> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE stack_key = $stack_key
                 ORDER BY updated_at DESC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("stack_key", stack_key.to_owned()))
            .await?
            .take(0)?;

        Ok(credential)
    }

    /// Upsert by stack key: a fresh authorization handshake or a completed
    /// refresh both land here. Reactivates an inactive record.
    pub async fn upsert(
        db: &SurrealDbClient,
        stack_key: &str,
        bundle: &TokenBundle,
    ) -> Result<StackCredential, AppError> {
        if let Some(existing) = Self::find_by_stack_key(db, stack_key).await? {
            if existing.state == CredentialState::Inactive {
                compute_next_state(&existing.state, CredentialTransition::Reauthorize)?;
            }

            let now = chrono::Utc::now();
            let expires_at = now + ChronoDuration::seconds(bundle.expires_in);
            let updated: Option<StackCredential> = db
                .client
                .query(
                    "UPDATE type::thing($table, $id)
                     SET access_token = $access_token,
                         refresh_token = $refresh_token,
                         expires_at = $expires_at,
                         state = $active,
                         updated_at = $now
                     RETURN *",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", existing.id.clone()))
                .bind(("access_token", bundle.access_token.clone()))
                .bind(("refresh_token", bundle.refresh_token.clone()))
                .bind(("expires_at", SurrealDatetime::from(expires_at)))
                .bind(("active", CredentialState::Active.as_str()))
                .bind(("now", SurrealDatetime::from(now)))
                .await?
                .take(0)?;

            return updated
                .ok_or_else(|| AppError::InternalError("credential upsert lost the record".into()));
        }

        let credential = Self::new(stack_key.to_owned(), bundle);
        let stored = db.store_item(credential).await?;
        stored.ok_or_else(|| AppError::InternalError("credential create returned nothing".into()))
    }

    /// Claim the refresh slot. The guarded update only succeeds from Active,
    /// so a second process observing Refreshing backs off instead of racing.
    pub async fn mark_refreshing(&self, db: &SurrealDbClient) -> Result<StackCredential, AppError> {
        let next = compute_next_state(&self.state, CredentialTransition::BeginRefresh)?;
        debug_assert_eq!(next, CredentialState::Refreshing);

        let now = chrono::Utc::now();
        let updated: Option<StackCredential> = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = $refreshing, updated_at = $now
                 WHERE state = $active
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("refreshing", CredentialState::Refreshing.as_str()))
            .bind(("active", CredentialState::Active.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?
            .take(0)?;

        updated.ok_or_else(|| invalid_transition(&self.state, CredentialTransition::BeginRefresh))
    }

    pub async fn complete_refresh(
        &self,
        bundle: &TokenBundle,
        db: &SurrealDbClient,
    ) -> Result<StackCredential, AppError> {
        let next = compute_next_state(&self.state, CredentialTransition::RefreshOk)?;
        debug_assert_eq!(next, CredentialState::Active);

        let now = chrono::Utc::now();
        let expires_at = now + ChronoDuration::seconds(bundle.expires_in);
        let updated: Option<StackCredential> = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = $active,
                     access_token = $access_token,
                     refresh_token = $refresh_token,
                     expires_at = $expires_at,
                     updated_at = $now
                 WHERE state = $refreshing
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("active", CredentialState::Active.as_str()))
            .bind(("refreshing", CredentialState::Refreshing.as_str()))
            .bind(("access_token", bundle.access_token.clone()))
            .bind(("refresh_token", bundle.refresh_token.clone()))
            .bind(("expires_at", SurrealDatetime::from(expires_at)))
            .bind(("now", SurrealDatetime::from(now)))
            .await?
            .take(0)?;

        updated.ok_or_else(|| invalid_transition(&self.state, CredentialTransition::RefreshOk))
    }

    /// The provider rejected the refresh token: terminal until a fresh
    /// authorization handshake.
    pub async fn reject_refresh(&self, db: &SurrealDbClient) -> Result<StackCredential, AppError> {
        let next = compute_next_state(&self.state, CredentialTransition::RefreshRejected)?;
        debug_assert_eq!(next, CredentialState::Inactive);

        self.set_state_from_refreshing(CredentialState::Inactive, db)
            .await
            .map_err(|_| invalid_transition(&self.state, CredentialTransition::RefreshRejected))
    }

    /// Transient provider failure: release the refresh slot, keep old tokens.
    pub async fn abort_refresh(&self, db: &SurrealDbClient) -> Result<StackCredential, AppError> {
        let next = compute_next_state(&self.state, CredentialTransition::RefreshAborted)?;
        debug_assert_eq!(next, CredentialState::Active);

        self.set_state_from_refreshing(CredentialState::Active, db)
            .await
            .map_err(|_| invalid_transition(&self.state, CredentialTransition::RefreshAborted))
    }

    async fn set_state_from_refreshing(
        &self,
        target: CredentialState,
        db: &SurrealDbClient,
    ) -> Result<StackCredential, AppError> {
        let now = chrono::Utc::now();
        let updated: Option<StackCredential> = db
            .client
            .query(
                "UPDATE type::thing($table, $id)
                 SET state = $target, updated_at = $now
                 WHERE state = $refreshing
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("target", target.as_str()))
            .bind(("refreshing", CredentialState::Refreshing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?
            .take(0)?;

        updated.ok_or_else(|| {
            AppError::Validation(format!(
                "credential {} was not in Refreshing when finishing refresh",
                self.id
            ))
        })
    }

    /// Idempotent: deactivating an already inactive stack is a no-op.
    pub async fn deactivate_for_stack(
        db: &SurrealDbClient,
        stack_key: &str,
    ) -> Result<(), AppError> {
        let now = chrono::Utc::now();
        db.client
            .query(
                "UPDATE type::table($table)
                 SET state = $inactive, updated_at = $now
                 WHERE stack_key = $stack_key AND state != $inactive",
            )
            .bind(("table", Self::table_name()))
            .bind(("inactive", CredentialState::Inactive.as_str()))
            .bind(("stack_key", stack_key.to_owned()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        Ok(())
    }

    pub async fn touch_last_used(db: &SurrealDbClient, stack_key: &str) -> Result<(), AppError> {
        let now = chrono::Utc::now();
        db.client
            .query(
                "UPDATE type::table($table)
                 SET last_used_at = $now
                 WHERE stack_key = $stack_key AND state = $active",
            )
            .bind(("table", Self::table_name()))
            .bind(("stack_key", stack_key.to_owned()))
            .bind(("active", CredentialState::Active.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        Ok(())
    }

    /// Credentials the background sweep should attempt to refresh: active
    /// ones near expiry, plus recently deactivated ones still inside the
    /// grace window (tolerates transient provider outages).
    pub async fn sweep_candidates(
        db: &SurrealDbClient,
        now: chrono::DateTime<chrono::Utc>,
        margin: ChronoDuration,
        grace: ChronoDuration,
    ) -> Result<Vec<StackCredential>, AppError> {
        let horizon = now + margin;
        let grace_floor = now - grace;

        let candidates: Vec<StackCredential> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE (state = $active AND expires_at <= $horizon)
                    OR (state = $inactive AND updated_at >= $grace_floor)
                 ORDER BY expires_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("active", CredentialState::Active.as_str()))
            .bind(("inactive", CredentialState::Inactive.as_str()))
            .bind(("horizon", SurrealDatetime::from(horizon)))
            .bind(("grace_floor", SurrealDatetime::from(grace_floor)))
            .await?
            .take(0)?;

        Ok(candidates)
    }

    pub async fn purge_inactive(
        db: &SurrealDbClient,
        now: chrono::DateTime<chrono::Utc>,
        retention: ChronoDuration,
    ) -> Result<(), AppError> {
        let cutoff = now - retention;
        db.client
            .query(
                "DELETE type::table($table)
                 WHERE state = $inactive AND updated_at <= $cutoff",
            )
            .bind(("table", Self::table_name()))
            .bind(("inactive", CredentialState::Inactive.as_str()))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(access: &str, expires_in: i64) -> TokenBundle {
        TokenBundle {
            access_token: access.to_string(),
            refresh_token: format!("refresh-{access}"),
            expires_in,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn test_transition_table() {
        assert!(matches!(
            compute_next_state(&CredentialState::Active, CredentialTransition::BeginRefresh),
            Ok(CredentialState::Refreshing)
        ));
        assert!(matches!(
            compute_next_state(&CredentialState::Refreshing, CredentialTransition::RefreshOk),
            Ok(CredentialState::Active)
        ));
        assert!(matches!(
            compute_next_state(
                &CredentialState::Refreshing,
                CredentialTransition::RefreshRejected
            ),
            Ok(CredentialState::Inactive)
        ));
        assert!(matches!(
            compute_next_state(&CredentialState::Inactive, CredentialTransition::Reauthorize),
            Ok(CredentialState::Active)
        ));
        // Inactive credentials never refresh directly.
        assert!(
            compute_next_state(&CredentialState::Inactive, CredentialTransition::BeginRefresh)
                .is_err()
        );
        // A credential cannot be refreshed twice concurrently.
        assert!(compute_next_state(
            &CredentialState::Refreshing,
            CredentialTransition::BeginRefresh
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_in_place() {
        let db = memory_db().await;

        let first = StackCredential::upsert(&db, "stack-a", &bundle("tok-1", 3600))
            .await
            .expect("create");
        assert_eq!(first.state, CredentialState::Active);
        assert_eq!(first.access_token, "tok-1");

        let second = StackCredential::upsert(&db, "stack-a", &bundle("tok-2", 3600))
            .await
            .expect("update");
        assert_eq!(second.id, first.id);
        assert_eq!(second.access_token, "tok-2");

        let all = db
            .get_all_stored_items::<StackCredential>()
            .await
            .expect("all");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_cycle() {
        let db = memory_db().await;
        let cred = StackCredential::upsert(&db, "stack-a", &bundle("tok-1", 60))
            .await
            .expect("create");

        let refreshing = cred.mark_refreshing(&db).await.expect("mark refreshing");
        assert_eq!(refreshing.state, CredentialState::Refreshing);

        // Second claim loses: guarded update no longer matches.
        assert!(cred.mark_refreshing(&db).await.is_err());

        let refreshed = refreshing
            .complete_refresh(&bundle("tok-2", 3600), &db)
            .await
            .expect("complete");
        assert_eq!(refreshed.state, CredentialState::Active);
        assert_eq!(refreshed.access_token, "tok-2");
    }

    #[tokio::test]
    async fn test_rejected_refresh_deactivates_until_reauthorized() {
        let db = memory_db().await;
        let cred = StackCredential::upsert(&db, "stack-a", &bundle("tok-1", 60))
            .await
            .expect("create");

        let refreshing = cred.mark_refreshing(&db).await.expect("mark refreshing");
        let dead = refreshing.reject_refresh(&db).await.expect("reject");
        assert_eq!(dead.state, CredentialState::Inactive);

        // Only a fresh handshake brings it back.
        let revived = StackCredential::upsert(&db, "stack-a", &bundle("tok-3", 3600))
            .await
            .expect("reauthorize");
        assert_eq!(revived.state, CredentialState::Active);
        assert_eq!(revived.id, cred.id);
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let db = memory_db().await;
        StackCredential::upsert(&db, "stack-a", &bundle("tok-1", 3600))
            .await
            .expect("create");

        StackCredential::deactivate_for_stack(&db, "stack-a")
            .await
            .expect("deactivate once");
        StackCredential::deactivate_for_stack(&db, "stack-a")
            .await
            .expect("deactivate twice");

        let cred = StackCredential::find_by_stack_key(&db, "stack-a")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(cred.state, CredentialState::Inactive);
    }

    #[tokio::test]
    async fn test_sweep_candidates_selection() {
        let db = memory_db().await;
        let now = chrono::Utc::now();

        // Near expiry: selected.
        StackCredential::upsert(&db, "stack-soon", &bundle("tok-a", 120))
            .await
            .expect("create");
        // Far from expiry: not selected.
        StackCredential::upsert(&db, "stack-later", &bundle("tok-b", 3600))
            .await
            .expect("create");
        // Recently deactivated: selected within grace.
        StackCredential::upsert(&db, "stack-down", &bundle("tok-c", 120))
            .await
            .expect("create");
        StackCredential::deactivate_for_stack(&db, "stack-down")
            .await
            .expect("deactivate");

        let candidates = StackCredential::sweep_candidates(
            &db,
            now,
            ChronoDuration::seconds(REFRESH_SAFETY_MARGIN_SECS),
            ChronoDuration::hours(DEACTIVATION_GRACE_HOURS),
        )
        .await
        .expect("sweep");

        let keys: Vec<&str> = candidates.iter().map(|c| c.stack_key.as_str()).collect();
        assert!(keys.contains(&"stack-soon"));
        assert!(keys.contains(&"stack-down"));
        assert!(!keys.contains(&"stack-later"));
    }

    #[tokio::test]
    async fn test_expires_within_margin() {
        let now = chrono::Utc::now();
        let mut cred = StackCredential::new("stack-a".into(), &bundle("tok", 120));
        assert!(cred.expires_within(ChronoDuration::seconds(REFRESH_SAFETY_MARGIN_SECS), now));

        cred.expires_at = now + ChronoDuration::hours(1);
        assert!(!cred.expires_within(ChronoDuration::seconds(REFRESH_SAFETY_MARGIN_SECS), now));
    }
}
