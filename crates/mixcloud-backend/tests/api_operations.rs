//! Show operations through the public client API

mod common;

use reqwest::Method;
use std::sync::Arc;

use common::{client, edit_url, token_b, FixedTokenEndpoint, ScriptedHttpClient, API_SHOW, SHOW_URL};
use mixcloud_backend::auth::{Token, TokenStore};
use mixcloud_backend::error::ErrorKind;
use mixcloud_backend::mixcloud::{MixcloudClient, DESCRIPTION_LIMIT};

fn authorized(http: ScriptedHttpClient) -> MixcloudClient<ScriptedHttpClient> {
    let store = Arc::new(TokenStore::new(Some(token_b()), None));
    client(
        http,
        Arc::new(FixedTokenEndpoint::new(token_b(), token_b())),
        store,
    )
}

#[tokio::test]
async fn foreign_host_is_rejected_without_network() {
    let http = ScriptedHttpClient::new();
    let client = authorized(http.clone());

    let err = client
        .fetch_show("https://www.example.com/dj/mix/")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::InvalidShowUrl));
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn fetch_show_returns_show() {
    let body = r#"{"key": "/dj/mix/", "name": "Sunday Session", "description": "old", "url": "https://www.mixcloud.com/dj/mix/"}"#;
    let http = ScriptedHttpClient::new().respond(Method::GET, API_SHOW, 200, body);
    let client = authorized(http);

    let show = client.fetch_show(SHOW_URL).await.unwrap();

    assert_eq!(show.name, "Sunday Session");
    assert_eq!(show.description, "old");
}

#[tokio::test]
async fn description_at_limit_is_sent() {
    let http = ScriptedHttpClient::new().respond(Method::POST, &edit_url("access-b"), 200, "{}");
    let client = authorized(http.clone());

    tokio_test::assert_ok!(
        client
            .update_description(SHOW_URL, &"x".repeat(DESCRIPTION_LIMIT))
            .await
    );
    assert_eq!(http.request_count(), 1);
}

#[tokio::test]
async fn description_over_limit_is_rejected_locally() {
    let http = ScriptedHttpClient::new();
    let client = authorized(http.clone());

    let err = client
        .update_description(SHOW_URL, &"x".repeat(DESCRIPTION_LIMIT + 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::DescriptionTooLong));
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn unauthenticated_client_reads_but_cannot_write() {
    let body = r#"{"key": "/dj/mix/", "name": "Mix"}"#;
    let http = ScriptedHttpClient::new().respond(Method::GET, API_SHOW, 200, body);
    let store = Arc::new(TokenStore::new(None, None));
    let client = client(
        http.clone(),
        Arc::new(FixedTokenEndpoint::new(Token::new("x"), Token::new("y"))),
        store,
    );

    assert!(client.fetch_show(SHOW_URL).await.is_ok());
    let err = client.update_description(SHOW_URL, "text").await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::AuthenticationFailed));
    assert!(err.as_oauth().unwrap().user_hint().unwrap().contains("mixcloud-updater auth"));
    assert_eq!(http.request_count(), 1);
}
