use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::store::Token;
use super::OAuthSettings;
use crate::mixcloud::http::{HttpClient, HttpRequest};

/// Provider token endpoint
///
/// Errors are returned raw; the transport classifier recognises rejected
/// grants and network conditions from their messages.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for a token
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Token>;

    /// Obtains a new token from a refresh credential
    async fn refresh(&self, refresh_token: &str) -> Result<Token>;
}

/// Response from the token endpoint
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> Token {
        Token {
            access_token: self.access_token,
            // Keep the old refresh credential when the provider doesn't rotate it
            refresh_token: self
                .refresh_token
                .filter(|r| !r.is_empty())
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: self
                .expires_in
                .filter(|s| *s > 0)
                .map(|s| Utc::now() + Duration::seconds(s)),
        }
    }
}

/// Token endpoint over the provider's HTTP API
pub struct ProviderTokenEndpoint<H: HttpClient> {
    http: H,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl<H: HttpClient> ProviderTokenEndpoint<H> {
    /// Creates a token endpoint for the configured application
    pub fn new(http: H, settings: &OAuthSettings) -> Self {
        Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token_url: settings.token_url.clone(),
        }
    }

    async fn request_token(
        &self,
        grant: &str,
        mut fields: Vec<(String, String)>,
    ) -> Result<TokenResponse> {
        fields.push(("grant_type".to_string(), grant.to_string()));
        fields.push(("client_id".to_string(), self.client_id.clone()));
        fields.push(("client_secret".to_string(), self.client_secret.clone()));

        let response = self
            .http
            .execute(HttpRequest::post_form(&self.token_url, fields))
            .await
            .with_context(|| format!("Token request ({}) failed", grant))?;

        if !response.is_success() {
            anyhow::bail!(
                "Token request ({}) failed: {} - {}",
                grant,
                response.status,
                response.body
            );
        }

        response
            .json()
            .context("Failed to parse token response")
    }
}

#[async_trait]
impl<H: HttpClient> TokenEndpoint for ProviderTokenEndpoint<H> {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Token> {
        let fields = vec![
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
        ];

        let response = self.request_token("authorization_code", fields).await?;
        tracing::info!("Authorization code exchanged");
        Ok(response.into_token(None))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let fields = vec![("refresh_token".to_string(), refresh_token.to_string())];

        let response = self.request_token("refresh_token", fields).await?;
        tracing::info!("Access token refreshed");
        Ok(response.into_token(Some(refresh_token)))
    }
}
