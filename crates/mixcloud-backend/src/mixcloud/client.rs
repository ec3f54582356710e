use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
use super::transport::{AuthorizedTransport, RefreshInterceptingTransport, RefreshingTokenSource};
use super::types::{Show, ShowKey};
use crate::auth::{OAuthSettings, ProviderTokenEndpoint, Token, TokenEndpoint, TokenStore};
use crate::error::{classify_response, ApiError, OAuthError};
use crate::retry::{is_cancelled, sleep_or_cancel, RetryPolicy};

pub const API_BASE_URL: &str = "https://api.mixcloud.com";

/// Longest description Mixcloud accepts, in characters
pub const DESCRIPTION_LIMIT: usize = 1000;

/// Runtime settings for [`MixcloudClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base: String,
    pub retry: RetryPolicy,
    pub description_limit: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: API_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            description_limit: DESCRIPTION_LIMIT,
        }
    }
}

/// Body of an edit response
#[derive(Debug, Default, Deserialize)]
struct EditResponse {
    #[serde(default)]
    result: Option<EditResult>,
}

#[derive(Debug, Deserialize)]
struct EditResult {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: String,
}

fn default_success() -> bool {
    true
}

/// Mixcloud API client
///
/// Generic over the HTTP client implementation for testability. The current
/// transport is swapped as a whole on every [`save_token`](Self::save_token);
/// each request works on the snapshot it started with.
pub struct MixcloudClient<H: HttpClient + Clone = ReqwestClient> {
    http: H,
    settings: ClientSettings,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<TokenStore>,
    transport: RwLock<Arc<RefreshInterceptingTransport<H>>>,
    cancel: watch::Receiver<bool>,
}

impl MixcloudClient<ReqwestClient> {
    /// Creates a client with the default HTTP implementation
    pub fn new(
        settings: ClientSettings,
        oauth: &OAuthSettings,
        store: Arc<TokenStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let http = ReqwestClient::new();
        let endpoint = Arc::new(ProviderTokenEndpoint::new(http.clone(), oauth));
        Self::with_http_client(http, settings, endpoint, store, cancel)
    }
}

impl<H: HttpClient + Clone + 'static> MixcloudClient<H> {
    /// Creates a client with a custom HTTP implementation
    ///
    /// A store without a token leaves the client unauthenticated: public
    /// reads work, authenticated operations fail fast.
    pub fn with_http_client(
        http: H,
        settings: ClientSettings,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<TokenStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let transport = Arc::new(build_transport(
            &http,
            &settings,
            &endpoint,
            &store,
            &cancel,
            store.load(),
        ));

        Self {
            http,
            settings,
            endpoint,
            store,
            transport: RwLock::new(transport),
            cancel,
        }
    }

    /// Returns the current token, if any
    pub fn load_token(&self) -> Option<Token> {
        self.store.load()
    }

    /// Replaces the token, rebuilds the transport around it and persists it
    ///
    /// A failed write still leaves the client using the new token; the
    /// `ConfigWriteFailure` is returned so the caller can report it.
    /// Concurrent saves are serialized, so the stored token and the one the
    /// transport sends always match.
    pub async fn save_token(&self, token: Token) -> Result<(), OAuthError> {
        let mut current = self.transport.write().await;
        let persisted = self.store.persist(token.clone()).await;

        *current = Arc::new(build_transport(
            &self.http,
            &self.settings,
            &self.endpoint,
            &self.store,
            &self.cancel,
            Some(token),
        ));
        tracing::debug!("Transport rebuilt for new token");

        persisted
    }

    /// Advisory check: a token is held and its known expiry has not passed
    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    async fn transport(&self) -> Arc<RefreshInterceptingTransport<H>> {
        self.transport.read().await.clone()
    }

    /// Sends a request, retrying the whole request on rate-limit responses
    ///
    /// Returns the last 429 response once retries are exhausted.
    async fn send(
        &self,
        request: &HttpRequest,
        authenticated: bool,
    ) -> Result<HttpResponse, ApiError> {
        let policy = &self.settings.retry;
        let mut cancel = self.cancel.clone();
        let mut attempt: u32 = 0;

        loop {
            if is_cancelled(&cancel) {
                return Err(OAuthError::cancelled().into());
            }

            let response = self
                .transport()
                .await
                .execute(request.clone(), authenticated)
                .await?;

            if !response.is_rate_limited() {
                return Ok(response);
            }

            let throttled = OAuthError::rate_limited(response.retry_after());
            if !policy.should_retry(&throttled, attempt + 1) {
                tracing::warn!(
                    attempts = attempt + 1,
                    "Mixcloud is still rate limiting, giving up"
                );
                return Ok(response);
            }

            let delay = policy.next_delay(attempt, throttled.retry_after());
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Rate limited by Mixcloud, backing off"
            );
            sleep_or_cancel(delay, &mut cancel).await?;
            attempt += 1;
        }
    }

    /// Maps a non-success response onto a classified error
    fn status_error(&self, response: &HttpResponse, key: &ShowKey, idempotent: bool) -> ApiError {
        if response.is_not_found() {
            return OAuthError::show_not_found(key).into();
        }

        if response.is_unauthorized() {
            let expired = self
                .store
                .load()
                .is_some_and(|t| t.is_expired() && !t.can_refresh());
            if expired {
                return OAuthError::token_expired().with_status(401).into();
            }
        }

        classify_response(
            response.status,
            &response.body,
            response.retry_after(),
            idempotent,
        )
        .unwrap_or_else(|| {
            OAuthError::api_request_failed(response.status, &response.body, idempotent)
        })
        .into()
    }
}

// Show operations
impl<H: HttpClient + Clone + 'static> MixcloudClient<H> {
    /// Fetches a show by its public URL
    ///
    /// The URL is validated before any request is made.
    pub async fn fetch_show(&self, url: &str) -> Result<Show, ApiError> {
        let key = ShowKey::from_url(url)?;
        let request = HttpRequest::get(format!(
            "{}{}",
            self.settings.api_base.trim_end_matches('/'),
            key.path()
        ));

        let response = self.send(&request, false).await?;

        if response.status != 200 {
            return Err(self.status_error(&response, &key, true));
        }

        let show: Show = response
            .json()
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if !show.has_required_fields() {
            return Err(ApiError::Decode(format!(
                "show {} is missing its key or name",
                key
            )));
        }

        tracing::debug!("Fetched show {}", show.key);
        Ok(show)
    }

    /// Replaces the description of a show the user owns
    pub async fn update_description(&self, url: &str, text: &str) -> Result<(), ApiError> {
        let length = text.chars().count();
        if length > self.settings.description_limit {
            let limit = self.settings.description_limit;
            return Err(OAuthError::description_too_long(length, limit).into());
        }

        if self.store.access_token().is_none() {
            return Err(OAuthError::authentication_failed(
                "Not signed in to Mixcloud",
            )
            .into());
        }

        let key = ShowKey::from_url(url)?;
        let request = HttpRequest::post_multipart(
            format!(
                "{}/upload{}edit/",
                self.settings.api_base.trim_end_matches('/'),
                key.path()
            ),
            vec![("description".to_string(), text.to_string())],
        );

        let response = self.send(&request, true).await?;

        if !matches!(response.status, 200..=202) {
            return Err(self.status_error(&response, &key, false));
        }

        // Mixcloud can report a failed edit inside a 200 body
        let body: EditResponse = response.json().unwrap_or_default();
        if let Some(result) = body.result.filter(|r| !r.success) {
            return Err(
                OAuthError::api_request_failed(response.status, &result.message, false).into(),
            );
        }

        tracing::info!("Updated description of {}", key);
        Ok(())
    }
}

fn build_transport<H: HttpClient + Clone>(
    http: &H,
    settings: &ClientSettings,
    endpoint: &Arc<dyn TokenEndpoint>,
    store: &Arc<TokenStore>,
    cancel: &watch::Receiver<bool>,
    token: Option<Token>,
) -> RefreshInterceptingTransport<H> {
    let source = Arc::new(RefreshingTokenSource::new(token, endpoint.clone()));
    let inner = AuthorizedTransport::new(
        http.clone(),
        source,
        settings.retry.clone(),
        cancel.clone(),
    );
    RefreshInterceptingTransport::new(inner, store.clone())
}
