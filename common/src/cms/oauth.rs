use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Token pair returned by the OAuth endpoint on exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Seam for the CMS OAuth token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Authorization-code exchange during the install handshake.
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, AppError>;

    /// Refresh-token exchange. A rejected refresh token surfaces as
    /// `AppError::Auth` so the caller can deactivate the credential;
    /// transport problems surface as retriable errors.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, AppError>;
}

pub type DynTokenEndpoint = std::sync::Arc<dyn TokenEndpoint>;

pub struct OAuthHttpClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthHttpClient {
    pub fn new(
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        request_timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            token_url: token_url.to_owned(),
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenBundle, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
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
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            // invalid_grant and friends: the token itself is no good.
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!("token endpoint rejected grant: {body}")));
        }
        if !status.is_success() {
            return Err(AppError::from_status(status, "oauth token endpoint"));
        }

        Ok(response.json::<TokenBundle>().await?)
    }
}

#[async_trait]
impl TokenEndpoint for OAuthHttpClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenBundle, AppError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, AppError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }
}
