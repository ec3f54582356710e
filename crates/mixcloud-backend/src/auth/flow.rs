//! Browser-based authorization code flow

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::callback::{CallbackHandler, CallbackParams, CallbackReply, CallbackServer};
use super::endpoint::TokenEndpoint;
use super::store::Token;
use super::OAuthSettings;
use crate::retry::wait_for_cancel;

const STATE_LENGTH: usize = 32;

/// Terminal outcome of one authorization attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationResult {
    Success(Token),
    ProviderError { code: String, description: String },
    Timeout,
    Cancelled,
    /// The listener or the code exchange failed
    TransportError(String),
}

impl AuthorizationResult {
    fn provider_error(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::ProviderError {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    fn final_state(&self) -> FlowState {
        match self {
            Self::Success(_) => FlowState::Success,
            Self::ProviderError { .. } => FlowState::ProviderError,
            Self::Timeout => FlowState::Timeout,
            Self::Cancelled => FlowState::Cancelled,
            Self::TransportError(_) => FlowState::Failed,
        }
    }
}

impl std::fmt::Display for AuthorizationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(_) => write!(f, "authorization succeeded"),
            Self::ProviderError { code, description } if description.is_empty() => {
                write!(f, "provider rejected authorization: {}", code)
            }
            Self::ProviderError { code, description } => {
                write!(f, "provider rejected authorization: {} ({})", code, description)
            }
            Self::Timeout => write!(f, "timed out waiting for authorization"),
            Self::Cancelled => write!(f, "authorization cancelled"),
            Self::TransportError(message) => write!(f, "authorization failed: {}", message),
        }
    }
}

/// Progress of an authorization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ListenerStarted,
    AwaitingCallback,
    Exchanging,
    Success,
    ProviderError,
    Timeout,
    Cancelled,
    Failed,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::ProviderError | Self::Timeout | Self::Cancelled | Self::Failed
        )
    }
}

/// Shared view of a flow's state, readable while the flow runs
#[derive(Debug)]
pub struct FlowProgress {
    state: RwLock<FlowState>,
    listener_shutdowns: AtomicUsize,
}

impl FlowProgress {
    fn new() -> Self {
        Self {
            state: RwLock::new(FlowState::Idle),
            listener_shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> FlowState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times the callback listener was shut down
    pub fn listener_shutdowns(&self) -> usize {
        self.listener_shutdowns.load(Ordering::SeqCst)
    }

    fn set(&self, next: FlowState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Terminal states are sticky
        if !state.is_terminal() {
            tracing::debug!("Authorization flow: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// Drives the authorization code flow against the provider
pub struct AuthorizationFlow {
    settings: OAuthSettings,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl AuthorizationFlow {
    pub fn new(settings: OAuthSettings, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self { settings, endpoint }
    }

    /// Starts the callback listener and prepares the authorization URL
    ///
    /// The browser is not opened; use [`authorize`](Self::authorize) for the
    /// interactive flow.
    pub async fn start(&self) -> std::io::Result<PendingAuthorization> {
        let progress = Arc::new(FlowProgress::new());

        let server = CallbackServer::bind(self.settings.redirect_port).await?;
        let port = server.port();
        progress.set(FlowState::ListenerStarted);

        let redirect_uri = OAuthSettings::redirect_uri(port);
        let state = generate_state();
        let authorization_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&state={}",
            self.settings.authorize_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&state),
        );

        let (result_tx, result_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handler = Arc::new(FlowCallback {
            endpoint: self.endpoint.clone(),
            redirect_uri: redirect_uri.clone(),
            expected_state: state.clone(),
            completed: AtomicBool::new(false),
            result_tx,
            error_tx,
            progress: progress.clone(),
        });
        let listener_task = server.spawn(handler, shutdown_rx);
        progress.set(FlowState::AwaitingCallback);

        tracing::info!("Waiting for authorization callback on port {}", port);

        Ok(PendingAuthorization {
            port,
            redirect_uri,
            authorization_url,
            state,
            progress,
            result_rx,
            error_rx,
            shutdown_tx: Some(shutdown_tx),
            listener_task: Some(listener_task),
        })
    }

    /// Runs the full flow: listener, browser, callback, exchange
    pub async fn authorize(
        &self,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> AuthorizationResult {
        let pending = match self.start().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Failed to start callback listener: {}", e);
                return AuthorizationResult::TransportError(format!(
                    "Failed to start callback listener on port {}: {}",
                    self.settings.redirect_port, e
                ));
            }
        };

        if let Err(e) = open::that(pending.authorization_url()) {
            tracing::warn!("Failed to open browser: {}", e);
        }
        tracing::info!(
            "If the browser did not open, visit: {}",
            pending.authorization_url()
        );

        pending.wait(timeout, cancel).await
    }
}

/// An authorization whose listener is running
///
/// Dropping it stops the listener.
pub struct PendingAuthorization {
    port: u16,
    redirect_uri: String,
    authorization_url: String,
    state: String,
    progress: Arc<FlowProgress>,
    result_rx: mpsc::Receiver<Token>,
    error_rx: mpsc::Receiver<AuthorizationResult>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    listener_task: Option<JoinHandle<()>>,
}

impl PendingAuthorization {
    /// Port the listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// URL the user must visit to grant access
    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    /// Anti-forgery value the callback must echo back
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn progress(&self) -> Arc<FlowProgress> {
        self.progress.clone()
    }

    /// Waits for the first of: token, error, timeout, cancellation
    ///
    /// The listener is shut down before this returns, whichever way the wait
    /// resolved.
    pub async fn wait(
        mut self,
        timeout: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> AuthorizationResult {
        let result = tokio::select! {
            biased;
            () = wait_for_cancel(&mut cancel) => AuthorizationResult::Cancelled,
            Some(token) = self.result_rx.recv() => AuthorizationResult::Success(token),
            Some(outcome) = self.error_rx.recv() => outcome,
            () = tokio::time::sleep(timeout) => AuthorizationResult::Timeout,
        };

        self.shutdown().await;
        self.progress.set(result.final_state());

        match &result {
            AuthorizationResult::Success(_) => tracing::info!("Authorization completed"),
            other => tracing::warn!("Authorization ended: {}", other),
        }
        result
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            if let Some(task) = self.listener_task.take() {
                if let Err(e) = task.await {
                    tracing::warn!("Callback listener task failed: {}", e);
                }
            }
            self.progress.listener_shutdowns.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Callback listener on port {} shut down", self.port);
        }
    }
}

impl Drop for PendingAuthorization {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.progress.listener_shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Handles the provider redirect for one flow
///
/// Only the first callback produces an outcome; later ones get an
/// already-completed page.
struct FlowCallback {
    endpoint: Arc<dyn TokenEndpoint>,
    redirect_uri: String,
    expected_state: String,
    completed: AtomicBool,
    result_tx: mpsc::Sender<Token>,
    error_tx: mpsc::Sender<AuthorizationResult>,
    progress: Arc<FlowProgress>,
}

impl FlowCallback {
    fn fail(&self, outcome: AuthorizationResult) -> CallbackReply {
        let message = outcome.to_string();
        if self.error_tx.try_send(outcome).is_err() {
            tracing::debug!("Authorization outcome dropped; flow already finished");
        }
        CallbackReply::Failure(message)
    }
}

#[async_trait]
impl CallbackHandler for FlowCallback {
    async fn handle(&self, params: CallbackParams) -> CallbackReply {
        if self.completed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Ignoring duplicate authorization callback");
            return CallbackReply::AlreadyCompleted;
        }

        if let Some(code) = params.error {
            tracing::warn!("Provider returned error: {}", code);
            return self.fail(AuthorizationResult::provider_error(
                code,
                params.error_description.unwrap_or_default(),
            ));
        }

        if params.state.as_deref() != Some(self.expected_state.as_str()) {
            tracing::warn!("Authorization callback state mismatch");
            return self.fail(AuthorizationResult::provider_error(
                "state_mismatch",
                "The callback did not carry the expected state",
            ));
        }

        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            return self.fail(AuthorizationResult::provider_error(
                "missing_code",
                "The callback did not carry an authorization code",
            ));
        };

        self.progress.set(FlowState::Exchanging);
        match self.endpoint.exchange_code(&code, &self.redirect_uri).await {
            Ok(token) if token.is_usable() => {
                if self.result_tx.try_send(token).is_err() {
                    tracing::debug!("Authorization token dropped; flow already finished");
                }
                CallbackReply::Success
            }
            Ok(_) => self.fail(AuthorizationResult::provider_error(
                "empty_token",
                "The provider returned an empty access token",
            )),
            Err(e) => {
                tracing::error!("Authorization code exchange failed: {:#}", e);
                self.fail(AuthorizationResult::TransportError(format!("{:#}", e)))
            }
        }
    }
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}
