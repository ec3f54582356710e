use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Mutex};

use super::http::{HttpClient, HttpRequest, HttpResponse};
use crate::auth::{Token, TokenEndpoint, TokenStore};
use crate::error::{classify, classify_response, classify_transport, ApiError, OAuthError};
use crate::retry::{is_cancelled, sleep_or_cancel, RetryPolicy};

/// Query parameter Mixcloud reads the access credential from
const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Token holder that refreshes an expired token on demand
///
/// Refreshes are serialized; a caller that waited on another caller's
/// refresh reuses its result.
pub struct RefreshingTokenSource {
    token: RwLock<Option<Token>>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_lock: Mutex<()>,
}

impl RefreshingTokenSource {
    pub fn new(token: Option<Token>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            token: RwLock::new(token),
            endpoint,
            refresh_lock: Mutex::new(()),
        }
    }

    /// The token currently held, without refreshing
    pub fn current(&self) -> Option<Token> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a token for the next request, refreshing it first if expired
    ///
    /// An expired token without a refresh credential is still returned;
    /// Mixcloud expiries are advisory.
    pub async fn token(&self) -> Result<Token, ApiError> {
        let held = self
            .current()
            .filter(Token::is_usable)
            .ok_or_else(|| OAuthError::authentication_failed("No access token is held"))?;

        if !held.is_expired() || !held.can_refresh() {
            return Ok(held);
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(latest) = self.current() {
            if latest.access_token != held.access_token && latest.is_valid() {
                return Ok(latest);
            }
        }

        let refresh_token = held.refresh_token.clone().unwrap_or_default();
        tracing::info!("Access token expired, refreshing");
        let fresh = self
            .endpoint
            .refresh(&refresh_token)
            .await
            .map_err(ApiError::Other)?;

        if !fresh.is_usable() {
            return Err(OAuthError::invalid_refresh_token(
                "Refresh returned an empty access token",
            )
            .into());
        }

        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Executes requests with the held credential and retries transient faults
///
/// Network failures and transient 5xx statuses are retried here. Rate-limit
/// responses are returned to the caller, which decides whether the whole
/// operation can be repeated.
pub struct AuthorizedTransport<H: HttpClient> {
    http: H,
    source: Arc<RefreshingTokenSource>,
    policy: RetryPolicy,
    cancel: watch::Receiver<bool>,
}

impl<H: HttpClient> AuthorizedTransport<H> {
    pub fn new(
        http: H,
        source: Arc<RefreshingTokenSource>,
        policy: RetryPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            http,
            source,
            policy,
            cancel,
        }
    }

    pub fn source(&self) -> &Arc<RefreshingTokenSource> {
        &self.source
    }

    /// Sends `request`, attaching the access credential when `authenticated`
    ///
    /// Returns the last response once retries on its status are exhausted.
    pub async fn execute(
        &self,
        request: HttpRequest,
        authenticated: bool,
    ) -> Result<HttpResponse, ApiError> {
        let mut cancel = self.cancel.clone();
        let idempotent = request.is_idempotent();
        let mut attempt: u32 = 0;

        loop {
            if is_cancelled(&cancel) {
                return Err(OAuthError::cancelled().into());
            }

            let prepared = if authenticated {
                let token = self.source.token().await?;
                request.with_query_param(ACCESS_TOKEN_PARAM, &token.access_token)
            } else {
                request.clone()
            };

            let hint = match self.http.execute(prepared).await {
                Ok(response) => {
                    let transient = classify_response(
                        response.status,
                        &response.body,
                        response.retry_after(),
                        idempotent,
                    )
                    .filter(|e| e.status() != Some(429));

                    match transient {
                        Some(error) if self.policy.should_retry(&error, attempt + 1) => {
                            tracing::warn!(
                                attempt = attempt + 1,
                                status = response.status,
                                "{} {} failed with a transient status",
                                request.method,
                                request.url
                            );
                            error.retry_after()
                        }
                        _ => return Ok(response),
                    }
                }
                Err(err) => {
                    let classified = classify_transport(err);
                    if !classified.is_retryable() {
                        return Err(classified);
                    }
                    if !self.policy.should_retry_api(&classified, attempt + 1) {
                        tracing::error!(
                            attempts = attempt + 1,
                            "{} {} failed: {}",
                            request.method,
                            request.url,
                            classified
                        );
                        return Err(OAuthError::retry_exhausted(attempt + 1, classified).into());
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        "{} {} failed: {}",
                        request.method,
                        request.url,
                        classified
                    );
                    None
                }
            };

            let delay = self.policy.next_delay(attempt, hint);
            tracing::debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying");
            sleep_or_cancel(delay, &mut cancel).await?;
            attempt += 1;
        }
    }
}

/// Persists tokens refreshed underneath a request
///
/// Compares the held access credential before and after each call and hands
/// a changed token to [`TokenStore::persist_if_current`], which never
/// rebuilds this transport and never overwrites a token saved in the
/// meantime. Errors are classified before they are returned.
pub struct RefreshInterceptingTransport<H: HttpClient> {
    inner: AuthorizedTransport<H>,
    store: Arc<TokenStore>,
}

impl<H: HttpClient> RefreshInterceptingTransport<H> {
    pub fn new(inner: AuthorizedTransport<H>, store: Arc<TokenStore>) -> Self {
        Self { inner, store }
    }

    pub async fn execute(
        &self,
        request: HttpRequest,
        authenticated: bool,
    ) -> Result<HttpResponse, ApiError> {
        let source = self.inner.source();
        let before = source.current().map(|t| t.access_token);

        let result = self.inner.execute(request, authenticated).await;

        if let Some(after) = source.current() {
            if before.as_deref() != Some(after.access_token.as_str()) {
                tracing::info!("Token was refreshed during the request, saving it");
                // The request's own outcome stands regardless
                match self.store.persist_if_current(before.as_deref(), after).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Stored token changed during the request, not overwriting");
                    }
                    Err(e) => tracing::warn!("Refreshed token could not be saved: {}", e),
                }
            }
        }

        result.map_err(classify)
    }
}
