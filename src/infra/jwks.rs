// Published signing keys fetched over HTTP

use crate::api::KeySetSource;
use crate::core::errors::UpstreamError;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Reads the issuer's JWKS document. Caching and single-flight live in
/// `SigningKeyCache`; this type only performs one fetch per call.
pub struct HttpKeySetSource {
    client: Client,
    url: Url,
}

impl HttpKeySetSource {
    pub fn new(url: Url, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, url }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch_key_set(&self) -> Result<JwkSet, UpstreamError> {
        debug!(url = %self.url, "Fetching signing key set");

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(format!("key set request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %self.url, status = %status, "Key set endpoint returned an error");
            return Err(UpstreamError::Unavailable(format!("key set HTTP error: {}", status)));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("key set document: {}", e)))
    }
}
