#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

use api_state::ApiState;
use axum::{
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};
use middleware_stack_key::require_stack_key;
use routes::{
    indexing::{remove_entry, reset_index, trigger_index},
    liveness::live,
    oauth::oauth_callback,
    readiness::ready,
    search::{search, search_hybrid, search_image},
    webhook::receive_webhook,
};

pub mod api_state;
pub mod error;
mod middleware_stack_key;
mod routes;

pub use middleware_stack_key::StackKey;

/// Router for API functionality, version 1
pub fn api_routes_v1(app_state: &ApiState) -> Router {
    // Public endpoints: probes and the OAuth redirect target.
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/oauth/callback", get(oauth_callback));

    // Tenant endpoints: every route runs on behalf of one stack key.
    let protected = Router::new()
        .route("/search", post(search))
        .route("/search/image", post(search_image))
        .route("/search/hybrid", post(search_hybrid))
        .route("/index", post(trigger_index))
        .route("/index/reset", post(reset_index))
        .route("/entries/{content_type}/{entry_id}", delete(remove_entry))
        .route("/webhook", post(receive_webhook))
        .route_layer(from_fn(require_stack_key));

    public.merge(protected).with_state(app_state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::{
        cms::oauth::{TokenBundle, TokenEndpoint},
        cms::testing::InMemoryContentApi,
        cms::{CmsEntry, DynContentApi},
        error::AppError,
        storage::db::SurrealDbClient,
        utils::config::AppConfig,
        utils::embedding::{DynEmbedder, EmbeddingProvider},
        vector::{memory::InMemoryVectorStore, routing::IndexRouter, DynVectorStore, VectorStore},
    };
    use indexing_pipeline::{IndexingConfig, IndexingPipeline};
    use retrieval_pipeline::RetrievalPipeline;
    use serde_json::{json, Value};
    use std::{sync::Arc, time::Duration};
    use tenant_auth::StackCredentialManager;
    use tower::ServiceExt;

    struct StaticEndpoint;

    #[async_trait]
    impl TokenEndpoint for StaticEndpoint {
        async fn exchange_code(&self, code: &str) -> Result<TokenBundle, AppError> {
            if code == "bad-code" {
                return Err(AppError::Auth("rejected grant".into()));
            }
            Ok(bundle())
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenBundle, AppError> {
            Ok(bundle())
        }
    }

    fn bundle() -> TokenBundle {
        TokenBundle {
            access_token: "token".into(),
            refresh_token: "refresh".into(),
            expires_in: 3600,
        }
    }

    struct Harness {
        router: Router,
        content: Arc<InMemoryContentApi>,
        store: DynVectorStore,
        db: Arc<SurrealDbClient>,
    }

    async fn harness() -> Harness {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let credentials = Arc::new(StackCredentialManager::new(
            db.clone(),
            Arc::new(StaticEndpoint),
        ));
        credentials
            .save_or_update("stack-a", &bundle())
            .await
            .expect("seed credential");

        let content = Arc::new(InMemoryContentApi::new());
        let content_dyn: DynContentApi = content.clone();
        let store: DynVectorStore = Arc::new(InMemoryVectorStore::new());
        let router = Arc::new(IndexRouter::new(store.clone(), Duration::from_secs(1)));
        let embedder: DynEmbedder = Arc::new(EmbeddingProvider::new_hashed(8));

        let indexing = Arc::new(IndexingPipeline::new(
            credentials.clone(),
            content_dyn.clone(),
            embedder.clone(),
            router.clone(),
            IndexingConfig {
                batch_size: 50,
                batch_pause: Duration::from_millis(0),
            },
        ));
        let retrieval = Arc::new(RetrievalPipeline::new(
            db.clone(),
            credentials.clone(),
            content_dyn,
            embedder,
            router,
            None,
        ));

        let state = ApiState::new(
            db.clone(),
            AppConfig::default(),
            credentials,
            indexing,
            retrieval,
        );

        Harness {
            router: api_routes_v1(&state),
            content,
            store,
            db,
        }
    }

    fn entry(id: &str, title: &str) -> CmsEntry {
        CmsEntry {
            id: id.into(),
            content_type: "article".into(),
            locale: None,
            version: None,
            updated_at: None,
            fields: json!({ "title": title }),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_json(uri: &str, stack_key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = stack_key {
            builder = builder.header("X-Stack-Key", key);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    #[tokio::test]
    async fn test_live_and_ready() {
        let h = harness().await;

        let live = h
            .router
            .clone()
            .oneshot(Request::get("/live").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(live.status(), StatusCode::OK);

        let ready = h
            .router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(ready.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_search_requires_stack_key() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(post_json("/search", None, json!({ "query": "anything" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(post_json("/search", Some("stack-a"), json!({ "query": "  " })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_empty_index_returns_empty_hits() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(post_json(
                "/search",
                Some("stack-a"),
                json!({ "query": "alpine hiking" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["hits"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_stack_maps_to_not_found() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(post_json(
                "/search",
                Some("never-authorized"),
                json!({ "query": "anything" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_run_is_accepted_and_runs() {
        let h = harness().await;
        h.content.put_entry("stack-a", entry("e1", "An indexable article"));

        let response = h
            .router
            .clone()
            .oneshot(post_json("/index", Some("stack-a"), json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert!(body["run_id"].as_str().is_some_and(|id| !id.is_empty()));

        // The spawned run finishes shortly after the acknowledgement.
        let mut indexed = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let names = h.store.list_indexes().await.expect("list");
            if let Some(name) = names.first() {
                indexed = h.store.describe_stats(name).await.expect("stats").vector_count;
                if indexed > 0 {
                    break;
                }
            }
        }
        assert_eq!(indexed, 1);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_immediately() {
        let h = harness().await;
        h.content.put_entry("stack-a", entry("e1", "Webhook article"));

        let response = h
            .router
            .clone()
            .oneshot(post_json(
                "/webhook",
                Some("stack-a"),
                json!({ "action": "publish", "content_type": "article", "entry_id": "e1" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_oauth_callback_persists_credential() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(
                Request::get("/oauth/callback?code=good-code&state=stack-new")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let stored =
            common::storage::types::stack_credential::StackCredential::find_by_stack_key(
                &h.db, "stack-new",
            )
            .await
            .expect("find")
            .expect("persisted");
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_oauth_callback_rejected_code_is_unauthorized() {
        let h = harness().await;

        let response = h
            .router
            .clone()
            .oneshot(
                Request::get("/oauth/callback?code=bad-code&state=stack-new")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_entry_route_is_idempotent() {
        let h = harness().await;

        let request = Request::builder()
            .method("DELETE")
            .uri("/entries/article/never-indexed")
            .header("X-Stack-Key", "stack-a")
            .body(Body::empty())
            .expect("request");
        let response = h.router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
