//! HTTP client abstraction for the Mixcloud API
//!
//! This module provides a trait-based HTTP client that can be easily mocked for testing.
//! Requests carry fully buffered bodies so a retry always resends identical bytes.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::retry::parse_retry_after;

/// Raw failure of the underlying HTTP stack
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Request body, buffered so it can be replayed on retry
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields
    Form(Vec<(String, String)>),
    /// `multipart/form-data` text fields
    Multipart(Vec<(String, String)>),
}

/// A single HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Creates a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Creates a POST request with a urlencoded form body
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Form(fields),
        }
    }

    /// Creates a POST request with a multipart body
    pub fn post_multipart(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Multipart(fields),
        }
    }

    /// Returns true for methods that can be repeated without side effects
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        )
    }

    /// Returns a copy of the request with a query parameter appended
    pub fn with_query_param(&self, name: &str, value: &str) -> Self {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut request = self.clone();
        request.url = format!(
            "{}{}{}={}",
            self.url,
            separator,
            name,
            urlencoding::encode(value)
        );
        request
    }
}

/// Trait for making HTTP requests
///
/// This abstraction allows easy mocking of HTTP calls in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Executes a request and returns the raw response for status handling
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Response from an HTTP request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    /// Creates a response without headers
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns true if status is in 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if status is 404
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Returns true if status is 401
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Returns true if status is 429
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// Server-supplied retry hint from the `Retry-After` header
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, chrono::Utc::now()))
    }

    /// Deserializes the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Production HTTP client using reqwest
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new reqwest-based HTTP client
    pub fn new() -> Self {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("mixcloud-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { inner }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .inner
            .request(request.method, &request.url)
            .headers(request.headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(fields) => {
                // A fresh form per attempt; the buffered fields are the source of truth
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                        form.text(name, value)
                    });
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
