// Process-local persistence for development and tests

use crate::api::{ApiKeyRepository, PrincipalDirectory};
use crate::core::errors::UpstreamError;
use crate::core::models::{ApiKeyRecord, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory implementation of both persistence seams.
///
/// Used when no Supabase project is configured. Records live as long as the
/// process.
#[derive(Default)]
pub struct InMemoryStore {
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
    tiers: RwLock<HashMap<String, Tier>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_tier(&self, owner_id: &str, tier: Tier) {
        self.tiers.write().await.insert(owner_id.to_string(), tier);
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryStore {
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), UpstreamError> {
        let mut keys = self.keys.write().await;
        let duplicate = keys.contains_key(&record.id)
            || keys.values().any(|r| r.hashed_secret == record.hashed_secret);
        if duplicate {
            return Err(UpstreamError::Conflict);
        }
        keys.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, UpstreamError> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .filter(|r| r.prefix == prefix)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn mark_revoked(&self, key_id: &str, at: DateTime<Utc>) -> Result<bool, UpstreamError> {
        match self.keys.write().await.get_mut(key_id) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_usage(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), UpstreamError> {
        if let Some(record) = self.keys.write().await.get_mut(key_id) {
            record.usage_count += 1;
            record.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryStore {
    async fn tier_for(&self, owner_id: &str) -> Result<Option<Tier>, UpstreamError> {
        Ok(self.tiers.read().await.get(owner_id).copied())
    }
}
