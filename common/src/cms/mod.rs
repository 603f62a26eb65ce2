pub mod oauth;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One raw entry as delivered by the CMS: schema-less fields plus the system
/// envelope the normalizer needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsEntry {
    pub id: String,
    pub content_type: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsAsset {
    pub id: String,
    pub url: String,
    pub content_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Seam for the CMS content/asset API. Every call is made on behalf of one
/// stack with a resolved access token; nothing here caches credentials.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn list_content_types(
        &self,
        stack_key: &str,
        access_token: &str,
        environment: &str,
    ) -> Result<Vec<String>, AppError>;

    async fn list_entries(
        &self,
        stack_key: &str,
        access_token: &str,
        content_type: &str,
        environment: &str,
    ) -> Result<Vec<CmsEntry>, AppError>;

    async fn get_entry(
        &self,
        stack_key: &str,
        access_token: &str,
        content_type: &str,
        entry_id: &str,
        environment: &str,
    ) -> Result<Option<CmsEntry>, AppError>;

    async fn list_assets(
        &self,
        stack_key: &str,
        access_token: &str,
        environment: &str,
    ) -> Result<Vec<CmsAsset>, AppError>;
}

pub type DynContentApi = std::sync::Arc<dyn ContentApi>;

/// HTTP client for the hosted CMS API.
pub struct CmsHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl CmsHttpClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        stack_key: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("api_key", stack_key)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::from_status(status, &format!("cms GET {path}")));
        }

        Ok(response.json::<T>().await?)
    }
}

fn classify_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() {
        AppError::ProviderUnavailable(err.to_string())
    } else {
        AppError::Reqwest(err)
    }
}

#[derive(Deserialize)]
struct ContentTypesEnvelope {
    content_types: Vec<ContentTypeRef>,
}

#[derive(Deserialize)]
struct ContentTypeRef {
    uid: String,
}

#[derive(Deserialize)]
struct EntriesEnvelope {
    entries: Vec<CmsEntry>,
}

#[derive(Deserialize)]
struct EntryEnvelope {
    entry: CmsEntry,
}

#[derive(Deserialize)]
struct AssetsEnvelope {
    assets: Vec<CmsAsset>,
}

#[async_trait]
impl ContentApi for CmsHttpClient {
    async fn list_content_types(
        &self,
        stack_key: &str,
        access_token: &str,
        environment: &str,
    ) -> Result<Vec<String>, AppError> {
        let envelope: ContentTypesEnvelope = self
            .get_json(
                "/v3/content_types",
                stack_key,
                access_token,
                &[("environment", environment)],
            )
            .await?;

        Ok(envelope.content_types.into_iter().map(|c| c.uid).collect())
    }

    async fn list_entries(
        &self,
        stack_key: &str,
        access_token: &str,
        content_type: &str,
        environment: &str,
    ) -> Result<Vec<CmsEntry>, AppError> {
        let path = format!("/v3/content_types/{content_type}/entries");
        let envelope: EntriesEnvelope = self
            .get_json(
                &path,
                stack_key,
                access_token,
                &[("environment", environment)],
            )
            .await?;

        Ok(envelope.entries)
    }

    async fn get_entry(
        &self,
        stack_key: &str,
        access_token: &str,
        content_type: &str,
        entry_id: &str,
        environment: &str,
    ) -> Result<Option<CmsEntry>, AppError> {
        let path = format!("/v3/content_types/{content_type}/entries/{entry_id}");
        match self
            .get_json::<EntryEnvelope>(
                &path,
                stack_key,
                access_token,
                &[("environment", environment)],
            )
            .await
        {
            Ok(envelope) => Ok(Some(envelope.entry)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_assets(
        &self,
        stack_key: &str,
        access_token: &str,
        environment: &str,
    ) -> Result<Vec<CmsAsset>, AppError> {
        let envelope: AssetsEnvelope = self
            .get_json(
                "/v3/assets",
                stack_key,
                access_token,
                &[("environment", environment)],
            )
            .await?;

        Ok(envelope.assets)
    }
}

/// In-memory content source for tests: entries keyed per stack.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryContentApi {
        entries: Mutex<HashMap<String, Vec<CmsEntry>>>,
        assets: Mutex<HashMap<String, Vec<CmsAsset>>>,
    }

    impl InMemoryContentApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_entry(&self, stack_key: &str, entry: CmsEntry) {
            let mut guard = self.entries.lock().expect("lock");
            let list = guard.entry(stack_key.to_owned()).or_default();
            list.retain(|e| e.id != entry.id || e.content_type != entry.content_type);
            list.push(entry);
        }

        pub fn remove_entry(&self, stack_key: &str, entry_id: &str) {
            let mut guard = self.entries.lock().expect("lock");
            if let Some(list) = guard.get_mut(stack_key) {
                list.retain(|e| e.id != entry_id);
            }
        }

        pub fn put_asset(&self, stack_key: &str, asset: CmsAsset) {
            self.assets
                .lock()
                .expect("lock")
                .entry(stack_key.to_owned())
                .or_default()
                .push(asset);
        }
    }

    #[async_trait]
    impl ContentApi for InMemoryContentApi {
        async fn list_content_types(
            &self,
            stack_key: &str,
            _access_token: &str,
            _environment: &str,
        ) -> Result<Vec<String>, AppError> {
            let guard = self.entries.lock().expect("lock");
            let mut types: Vec<String> = guard
                .get(stack_key)
                .map(|list| list.iter().map(|e| e.content_type.clone()).collect())
                .unwrap_or_default();
            types.sort();
            types.dedup();
            Ok(types)
        }

        async fn list_entries(
            &self,
            stack_key: &str,
            _access_token: &str,
            content_type: &str,
            _environment: &str,
        ) -> Result<Vec<CmsEntry>, AppError> {
            let guard = self.entries.lock().expect("lock");
            Ok(guard
                .get(stack_key)
                .map(|list| {
                    list.iter()
                        .filter(|e| e.content_type == content_type)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn get_entry(
            &self,
            stack_key: &str,
            _access_token: &str,
            content_type: &str,
            entry_id: &str,
            _environment: &str,
        ) -> Result<Option<CmsEntry>, AppError> {
            let guard = self.entries.lock().expect("lock");
            Ok(guard.get(stack_key).and_then(|list| {
                list.iter()
                    .find(|e| e.content_type == content_type && e.id == entry_id)
                    .cloned()
            }))
        }

        async fn list_assets(
            &self,
            stack_key: &str,
            _access_token: &str,
            _environment: &str,
        ) -> Result<Vec<CmsAsset>, AppError> {
            let guard = self.assets.lock().expect("lock");
            Ok(guard.get(stack_key).cloned().unwrap_or_default())
        }
    }
}
