// Supabase-backed API key repository and principal directory

use crate::api::{ApiKeyRepository, PrincipalDirectory};
use crate::core::errors::UpstreamError;
use crate::core::models::{ApiKeyRecord, Tier};
use crate::infra::supabase::SupabaseClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const API_KEYS_TABLE: &str = "api_keys";
const PROFILES_TABLE: &str = "profiles";
const RECORD_USAGE_FN: &str = "record_api_key_usage";

#[derive(Deserialize)]
struct ProfileRow {
    #[serde(default)]
    tier: Option<String>,
}

/// Key records in `api_keys`, tiers in `profiles`.
///
/// The usage bump goes through an RPC so the increment happens atomically in
/// the database.
pub struct SupabaseStore {
    client: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    async fn select_keys(&self, filters: &[(&str, String)]) -> Result<Vec<ApiKeyRecord>, UpstreamError> {
        self.client.select(API_KEYS_TABLE, filters).await
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl ApiKeyRepository for SupabaseStore {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), UpstreamError> {
        self.client.insert(API_KEYS_TABLE, record).await
    }

    async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, UpstreamError> {
        let rows = self
            .select_keys(&[("id", eq(key_id)), ("select", "*".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError> {
        self.select_keys(&[("prefix", eq(prefix)), ("select", "*".to_string())])
            .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError> {
        self.select_keys(&[
            ("owner_id", eq(owner_id)),
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }

    async fn mark_revoked(&self, key_id: &str, at: DateTime<Utc>) -> Result<bool, UpstreamError> {
        // revoked_at=is.null keeps the first revocation timestamp; only the
        // request that flipped the row gets it back
        let updated = self
            .client
            .update(
                API_KEYS_TABLE,
                &[
                    ("id", eq(key_id)),
                    ("revoked_at", "is.null".to_string()),
                    ("select", "id".to_string()),
                ],
                &json!({ "revoked_at": at }),
            )
            .await?;
        Ok(updated > 0)
    }

    async fn record_usage(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), UpstreamError> {
        self.client
            .rpc(RECORD_USAGE_FN, &json!({ "key_id": key_id, "used_at": at }))
            .await
    }
}

#[async_trait]
impl PrincipalDirectory for SupabaseStore {
    async fn tier_for(&self, owner_id: &str) -> Result<Option<Tier>, UpstreamError> {
        let rows: Vec<ProfileRow> = self
            .client
            .select(PROFILES_TABLE, &[("id", eq(owner_id)), ("select", "tier".to_string())])
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        match row.tier.as_deref().map(str::parse::<Tier>) {
            Some(Ok(tier)) => Ok(Some(tier)),
            Some(Err(e)) => {
                warn!(owner_id = %owner_id, error = %e, "Unrecognized tier in profile");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
