use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;

use super::{
    DistanceMetric, IndexDescription, IndexStats, MetadataFilter, VectorMatch, VectorRecord,
    VectorStore,
};

/// HTTP client for the hosted vector database provider.
pub struct VectorHttpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VectorHttpClient {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, AppError> {
        let response = request
            .header("Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    AppError::ProviderUnavailable(err.to_string())
                } else {
                    AppError::Reqwest(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::from_status(status, context));
        }
        Ok(response)
    }
}

#[derive(Deserialize)]
struct ListIndexesResponse {
    indexes: Vec<IndexDescription>,
}

#[derive(Deserialize)]
struct QueryResponse {
    matches: Vec<VectorMatch>,
}

#[async_trait]
impl VectorStore for VectorHttpClient {
    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), AppError> {
        let body = json!({
            "name": name,
            "dimension": dimension,
            "metric": metric.as_str(),
        });
        self.send(
            self.http.post(self.url("/indexes")).json(&body),
            "vector create_index",
        )
        .await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        let response = self
            .send(self.http.get(self.url("/indexes")), "vector list_indexes")
            .await?;
        let parsed: ListIndexesResponse = response.json().await?;
        Ok(parsed.indexes.into_iter().map(|i| i.name).collect())
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>, AppError> {
        let result = self
            .send(
                self.http.get(self.url(&format!("/indexes/{name}"))),
                "vector describe_index",
            )
            .await;

        match result {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn delete_index(&self, name: &str) -> Result<(), AppError> {
        match self
            .send(
                self.http.delete(self.url(&format!("/indexes/{name}"))),
                "vector delete_index",
            )
            .await
        {
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn upsert(&self, index: &str, record: VectorRecord) -> Result<(), AppError> {
        let body = json!({ "vectors": [record] });
        self.send(
            self.http
                .post(self.url(&format!("/indexes/{index}/vectors/upsert")))
                .json(&body),
            "vector upsert",
        )
        .await?;
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
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(filter) = filter {
            body["filter"] = json!(filter);
        }

        let response = self
            .send(
                self.http
                    .post(self.url(&format!("/indexes/{index}/query")))
                    .json(&body),
                "vector query",
            )
            .await?;

        let parsed: QueryResponse = response.json().await?;
        let mut matches = parsed.matches;
        if let Some(floor) = score_floor {
            matches.retain(|m| m.score >= floor);
        }
        Ok(matches)
    }

    async fn delete_one(&self, index: &str, id: &str) -> Result<(), AppError> {
        let body = json!({ "ids": [id] });
        match self
            .send(
                self.http
                    .post(self.url(&format!("/indexes/{index}/vectors/delete")))
                    .json(&body),
                "vector delete_one",
            )
            .await
        {
            // Provider treats unknown ids as deleted; mirror that here.
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn describe_stats(&self, index: &str) -> Result<IndexStats, AppError> {
        let response = self
            .send(
                self.http.get(self.url(&format!("/indexes/{index}/stats"))),
                "vector describe_stats",
            )
            .await?;
        Ok(response.json().await?)
    }
}
