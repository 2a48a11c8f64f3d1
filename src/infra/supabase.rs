// Supabase PostgREST client guarded by a circuit breaker

use crate::core::errors::UpstreamError;
use crate::core::resilience::{create_circuit_breaker, execute_with_cb, UpstreamCircuitBreaker};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Thin PostgREST client authenticated with the service role key
pub struct SupabaseClient {
    client: Client,
    project_url: String,
    service_role_key: Secret<String>,
    breaker: UpstreamCircuitBreaker,
    timeout: Duration,
}

impl SupabaseClient {
    pub fn new(project_url: &str, service_role_key: Secret<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            project_url: project_url.trim_end_matches('/').to_string(),
            service_role_key,
            breaker: create_circuit_breaker(),
            timeout,
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.project_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.service_role_key.expose_secret();
        builder
            .header("apikey", key)
            .header("Authorization", format!("Bearer {}", key))
    }

    /// `GET /rest/v1/<table>?<filters>`
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, UpstreamError> {
        let url = self.rest_url(table);
        execute_with_cb(&self.breaker, self.timeout, || async {
            let response = self
                .authorized(self.client.get(&url))
                .query(filters)
                .send()
                .await
                .map_err(transport_error)?;
            let response = check_status(table, response).await?;
            response
                .json::<Vec<T>>()
                .await
                .map_err(|e| UpstreamError::InvalidResponse(format!("{} rows: {}", table, e)))
        })
        .await
    }

    /// `POST /rest/v1/<table>`; a unique violation yields `Conflict`
    pub async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<(), UpstreamError> {
        let url = self.rest_url(table);
        execute_with_cb(&self.breaker, self.timeout, || async {
            let response = self
                .authorized(self.client.post(&url))
                .header("Prefer", "return=minimal")
                .json(row)
                .send()
                .await
                .map_err(transport_error)?;
            check_status(table, response).await.map(|_| ())
        })
        .await
    }

    /// `PATCH /rest/v1/<table>?<filters>`, returning the number of rows changed
    pub async fn update<T: Serialize + Sync>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        patch: &T,
    ) -> Result<usize, UpstreamError> {
        let url = self.rest_url(table);
        execute_with_cb(&self.breaker, self.timeout, || async {
            let response = self
                .authorized(self.client.patch(&url))
                .query(filters)
                .header("Prefer", "return=representation")
                .json(patch)
                .send()
                .await
                .map_err(transport_error)?;
            let response = check_status(table, response).await?;
            let rows = response
                .json::<Vec<serde_json::Value>>()
                .await
                .map_err(|e| UpstreamError::InvalidResponse(format!("{} rows: {}", table, e)))?;
            Ok(rows.len())
        })
        .await
    }

    /// `POST /rest/v1/rpc/<function>`
    pub async fn rpc<T: Serialize + Sync>(&self, function: &str, args: &T) -> Result<(), UpstreamError> {
        let url = self.rest_url(&format!("rpc/{}", function));
        execute_with_cb(&self.breaker, self.timeout, || async {
            let response = self
                .authorized(self.client.post(&url))
                .json(args)
                .send()
                .await
                .map_err(transport_error)?;
            check_status(function, response).await.map(|_| ())
        })
        .await
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Unavailable(format!("Supabase request failed: {}", err))
    }
}

async fn check_status(resource: &str, response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::CONFLICT {
        debug!(resource = %resource, "Supabase reported a unique violation");
        return Err(UpstreamError::Conflict);
    }

    let text = response.text().await.unwrap_or_default();
    error!(resource = %resource, status = %status, body = %text, "Supabase error");
    Err(UpstreamError::Unavailable(format!("Supabase HTTP error: {}", status)))
}
