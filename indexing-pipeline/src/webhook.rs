use common::error::AppError;
use serde::Deserialize;
use tracing::{info, warn};

use crate::pipeline::IndexingPipeline;

/// CMS lifecycle notification, delivered over the webhook receiver.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Publish,
    Update,
    Delete,
    Unpublish,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WebhookEvent {
    pub action: WebhookAction,
    pub content_type: String,
    pub entry_id: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "production".to_owned()
}

impl IndexingPipeline {
    /// Apply one webhook event to the tenant's index. Publish and update
    /// re-fetch the live entry before indexing; delete and unpublish remove
    /// the vector. An entry already gone from the CMS at fetch time is
    /// treated as removed rather than failed.
    pub async fn process_webhook_event(
        &self,
        stack_key: &str,
        event: &WebhookEvent,
    ) -> Result<(), AppError> {
        match event.action {
            WebhookAction::Publish | WebhookAction::Update => {
                let access_token = self.credentials().get_valid_access_token(stack_key).await?;
                let entry = self
                    .content_api()
                    .get_entry(
                        stack_key,
                        &access_token,
                        &event.content_type,
                        &event.entry_id,
                        &event.environment,
                    )
                    .await?;

                match entry {
                    Some(entry) => {
                        let indexed = self.index_entry(stack_key, &entry).await?;
                        info!(%stack_key, entry_id = %event.entry_id, indexed, "webhook entry processed");
                    }
                    None => {
                        warn!(%stack_key, entry_id = %event.entry_id, "webhook entry vanished; removing");
                        self.remove_entry(stack_key, &event.entry_id).await?;
                    }
                }
                Ok(())
            }
            WebhookAction::Delete | WebhookAction::Unpublish => {
                self.remove_entry(stack_key, &event.entry_id).await?;
                info!(%stack_key, entry_id = %event.entry_id, "webhook entry removed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        cms::oauth::{TokenBundle, TokenEndpoint},
        cms::testing::InMemoryContentApi,
        cms::{CmsEntry, DynContentApi},
        utils::embedding::{DynEmbedder, EmbeddingProvider},
        vector::{
            memory::InMemoryVectorStore,
            routing::{index_name_for, IndexRouter},
            DynVectorStore, VectorStore,
        },
    };
    use serde_json::json;
    use std::{sync::Arc, time::Duration};
    use tenant_auth::StackCredentialManager;

    struct StaticEndpoint;

    #[async_trait]
    impl TokenEndpoint for StaticEndpoint {
        async fn exchange_code(&self, _code: &str) -> Result<TokenBundle, AppError> {
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

    fn entry(id: &str) -> CmsEntry {
        CmsEntry {
            id: id.into(),
            content_type: "article".into(),
            locale: None,
            version: None,
            updated_at: None,
            fields: json!({ "title": "Webhook driven article" }),
        }
    }

    struct Harness {
        pipeline: IndexingPipeline,
        content: Arc<InMemoryContentApi>,
        store: DynVectorStore,
    }

    async fn harness() -> Harness {
        let db = Arc::new(
            common::storage::db::SurrealDbClient::memory(
                "test_ns",
                &uuid::Uuid::new_v4().to_string(),
            )
            .await
            .expect("in-memory surrealdb"),
        );
        let credentials = Arc::new(StackCredentialManager::new(db, Arc::new(StaticEndpoint)));
        credentials
            .save_or_update("stack-a", &bundle())
            .await
            .expect("seed");

        let content = Arc::new(InMemoryContentApi::new());
        let content_dyn: DynContentApi = content.clone();
        let store: DynVectorStore = Arc::new(InMemoryVectorStore::new());
        let router = Arc::new(IndexRouter::new(store.clone(), Duration::from_secs(1)));
        let embedder: DynEmbedder = Arc::new(EmbeddingProvider::new_hashed(16));

        let pipeline = IndexingPipeline::new(
            credentials,
            content_dyn,
            embedder,
            router,
            Default::default(),
        );

        Harness {
            pipeline,
            content,
            store,
        }
    }

    async fn vector_count(store: &DynVectorStore) -> usize {
        store
            .describe_stats(&index_name_for("stack-a"))
            .await
            .expect("stats")
            .vector_count
    }

    #[tokio::test]
    async fn test_publish_event_indexes_entry() {
        let h = harness().await;
        h.content.put_entry("stack-a", entry("e1"));

        let event = WebhookEvent {
            action: WebhookAction::Publish,
            content_type: "article".into(),
            entry_id: "e1".into(),
            environment: "production".into(),
        };
        h.pipeline
            .process_webhook_event("stack-a", &event)
            .await
            .expect("process");

        assert_eq!(vector_count(&h.store).await, 1);
    }

    #[tokio::test]
    async fn test_delete_event_removes_entry() {
        let h = harness().await;
        h.content.put_entry("stack-a", entry("e1"));
        h.pipeline
            .index_entry("stack-a", &entry("e1"))
            .await
            .expect("index");

        let event = WebhookEvent {
            action: WebhookAction::Delete,
            content_type: "article".into(),
            entry_id: "e1".into(),
            environment: "production".into(),
        };
        h.pipeline
            .process_webhook_event("stack-a", &event)
            .await
            .expect("process");

        assert_eq!(vector_count(&h.store).await, 0);
    }

    #[tokio::test]
    async fn test_update_for_vanished_entry_removes_vector() {
        let h = harness().await;
        h.pipeline
            .index_entry("stack-a", &entry("e1"))
            .await
            .expect("index");

        // Entry no longer exists in the CMS.
        let event = WebhookEvent {
            action: WebhookAction::Update,
            content_type: "article".into(),
            entry_id: "e1".into(),
            environment: "production".into(),
        };
        h.pipeline
            .process_webhook_event("stack-a", &event)
            .await
            .expect("process");

        assert_eq!(vector_count(&h.store).await, 0);
    }

    #[test]
    fn test_event_deserializes_with_default_environment() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{ "action": "publish", "content_type": "article", "entry_id": "e1" }"#,
        )
        .expect("parse");
        assert_eq!(event.action, WebhookAction::Publish);
        assert_eq!(event.environment, "production");
    }
}
