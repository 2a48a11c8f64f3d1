// HTTP key set source against a mock issuer

use crate::common::TokenMinter;
use mockito::Server;
use sentinel_auth::api::KeySetSource;
use sentinel_auth::core::errors::UpstreamError;
use sentinel_auth::infra::jwks::HttpKeySetSource;
use serde_json::json;
use std::time::Duration;
use url::Url;

const JWKS_PATH: &str = "/auth/v1/.well-known/jwks.json";

fn source(server: &Server) -> HttpKeySetSource {
    let url = Url::parse(&format!("{}{}", server.url(), JWKS_PATH)).unwrap();
    HttpKeySetSource::new(url, Duration::from_secs(2))
}

#[tokio::test]
async fn test_fetches_published_keys() {
    let minter = TokenMinter::new("kid-1");
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", JWKS_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "keys": [minter.jwk()] }).to_string())
        .create_async()
        .await;

    let jwks = source(&server).fetch_key_set().await.unwrap();
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].common.key_id.as_deref(), Some("kid-1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let mut server = Server::new_async().await;
    server.mock("GET", JWKS_PATH).with_status(502).create_async().await;

    assert!(matches!(
        source(&server).fetch_key_set().await,
        Err(UpstreamError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_garbage_document_is_invalid_response() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", JWKS_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    assert!(matches!(
        source(&server).fetch_key_set().await,
        Err(UpstreamError::InvalidResponse(_))
    ));
}
