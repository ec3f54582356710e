//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::Method;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mixcloud_backend::auth::{Token, TokenEndpoint, TokenStore};
use mixcloud_backend::mixcloud::{
    ClientSettings, HttpClient, HttpRequest, HttpResponse, MixcloudClient, TransportError,
};
use mixcloud_backend::retry::never_cancelled;

pub const SHOW_URL: &str = "https://www.mixcloud.com/dj/mix/";
pub const API_SHOW: &str = "https://api.mixcloud.com/dj/mix/";

/// Edit endpoint for the test show, authorized with `access_token`
pub fn edit_url(access_token: &str) -> String {
    format!(
        "https://api.mixcloud.com/upload/dj/mix/edit/?access_token={}",
        access_token
    )
}

/// HTTP client answering from a per-route script
///
/// The last scripted response for a route repeats.
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
    routes: Arc<Mutex<HashMap<String, VecDeque<HttpResponse>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, method: Method, url: &str, status: u16, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{} {}", method, url))
            .or_default()
            .push_back(HttpResponse::new(status, body));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = format!("{} {}", request.method, request.url);
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let script = routes
            .get_mut(&key)
            .ok_or_else(|| TransportError::Request(format!("no route for {}", key)))?;
        let response = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        response.ok_or_else(|| TransportError::Request(format!("empty script for {}", key)))
    }
}

/// Token endpoint that hands out fixed tokens and counts calls
pub struct FixedTokenEndpoint {
    exchanged: Token,
    refreshed: Token,
    refresh_calls: AtomicUsize,
}

impl FixedTokenEndpoint {
    pub fn new(exchanged: Token, refreshed: Token) -> Self {
        Self {
            exchanged,
            refreshed,
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for FixedTokenEndpoint {
    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> anyhow::Result<Token> {
        if code.is_empty() {
            anyhow::bail!("empty code");
        }
        Ok(self.exchanged.clone())
    }

    async fn refresh(&self, _refresh_token: &str) -> anyhow::Result<Token> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers could race
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(self.refreshed.clone())
    }
}

/// Token A: expired, refreshable
pub fn token_a() -> Token {
    Token::new("access-a")
        .with_refresh_token("refresh-a")
        .with_expires_at(Utc::now() - Duration::minutes(10))
}

/// Token B: what refreshing token A yields
///
/// The expiry is fixed so separately built copies compare equal.
pub fn token_b() -> Token {
    let expires_at = Utc
        .with_ymd_and_hms(2099, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    Token::new("access-b")
        .with_refresh_token("refresh-b")
        .with_expires_at(expires_at)
}

pub fn client(
    http: ScriptedHttpClient,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<TokenStore>,
) -> MixcloudClient<ScriptedHttpClient> {
    MixcloudClient::with_http_client(
        http,
        ClientSettings::default(),
        endpoint,
        store,
        never_cancelled(),
    )
}
