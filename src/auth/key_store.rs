// API key issuance, validation, revocation and rotation

use crate::api::ApiKeyRepository;
use crate::auth::api_key::ApiKey;
use crate::core::errors::{AuthError, UpstreamError};
use crate::core::models::{ApiKeyMetadata, ApiKeyRecord, Principal, PrincipalKind};
use crate::core::resilience::with_timeout;
use crate::core::scope::canonicalize_scopes;
use crate::state::tier_cache::TierCache;
use chrono::{DateTime, SubsecRound, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Regeneration attempts when a fresh key collides with an existing record
const MAX_ISSUE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct KeyStoreSettings {
    /// Canonical scopes granted when issuance names none
    pub default_scopes: Vec<String>,
    /// Lifetime applied when issuance names none
    pub default_ttl: chrono::Duration,
    /// Deadline for each persistence call
    pub operation_timeout: Duration,
}

impl Default for KeyStoreSettings {
    fn default() -> Self {
        Self {
            default_scopes: vec!["chat:*".to_string(), "conversations:*".to_string()],
            default_ttl: chrono::Duration::days(365),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

/// Long-lived API keys backed by the persistence collaborator.
///
/// Only the SHA-256 digest and a short lookup prefix are stored; plaintext
/// leaves this type exactly once, from `issue` or `rotate`.
pub struct KeyStore {
    repository: Arc<dyn ApiKeyRepository>,
    tiers: Arc<TierCache>,
    settings: KeyStoreSettings,
}

impl KeyStore {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, tiers: Arc<TierCache>, settings: KeyStoreSettings) -> Self {
        Self {
            repository,
            tiers,
            settings,
        }
    }

    pub fn default_scopes(&self) -> &[String] {
        &self.settings.default_scopes
    }

    /// Fresh random key with the identifying prefix
    pub fn generate() -> ApiKey {
        ApiKey::generate()
    }

    /// Issue a key for `owner_id`. Omitted scopes or lifetime fall back to
    /// the configured defaults; a non-positive lifetime counts as omitted.
    pub async fn issue(
        &self,
        owner_id: &str,
        name: &str,
        scopes: Option<Vec<String>>,
        ttl: Option<chrono::Duration>,
    ) -> Result<(ApiKeyRecord, ApiKey), AuthError> {
        let scopes = match scopes {
            Some(requested) => {
                let canonical = canonicalize_scopes(&requested)?;
                if canonical.is_empty() {
                    return Err(AuthError::InvalidScope("empty scope list".to_string()));
                }
                canonical
            }
            None => canonicalize_scopes(&self.settings.default_scopes)?,
        };
        let ttl = ttl
            .filter(|t| *t > chrono::Duration::zero())
            .unwrap_or(self.settings.default_ttl);
        let name = match name.trim() {
            "" => "default",
            trimmed => trimmed,
        };

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let plaintext = Self::generate();
            let prefix = plaintext
                .lookup_prefix()
                .ok_or_else(|| AuthError::Internal("generated key failed format check".to_string()))?
                .to_string();
            let now = Utc::now();
            let expires_at = now.checked_add_signed(ttl).ok_or(AuthError::InvalidTtl)?;
            let record = ApiKeyRecord {
                id: Uuid::new_v4().to_string(),
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                hashed_secret: plaintext.hash().as_str().to_string(),
                prefix,
                scopes: scopes.clone(),
                created_at: now,
                expires_at,
                revoked_at: None,
                last_used_at: None,
                usage_count: 0,
            };

            match self.timed(self.repository.insert(&record)).await {
                Ok(()) => {
                    info!(
                        key_id = %record.id,
                        owner_id = %owner_id,
                        prefix = %record.prefix,
                        "API key issued"
                    );
                    return Ok((record, plaintext));
                }
                Err(UpstreamError::Conflict) => {
                    warn!(attempt, "Generated API key collided with an existing record, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(owner_id = %owner_id, "API key generation kept colliding");
        Err(AuthError::Internal("key generation failed".to_string()))
    }

    /// Resolve a presented key into a service principal.
    ///
    /// Checks run cheapest first: format, hash, lookup, then revocation
    /// before expiry. The usage bump runs detached and cannot fail the caller.
    pub async fn validate(&self, presented: &ApiKey) -> Result<Principal, AuthError> {
        let prefix = presented.lookup_prefix().ok_or(AuthError::InvalidApiKeyFormat)?;
        let hash = presented.hash();

        let candidates = self.timed(self.repository.find_by_prefix(prefix)).await?;
        let record = candidates
            .into_iter()
            .find(|r| hash.matches(&r.hashed_secret))
            .ok_or(AuthError::ApiKeyNotFound)?;

        record.check_usable_at(Utc::now())?;

        let tier = self.tiers.tier_for(&record.owner_id).await;
        self.record_usage_detached(record.id.clone());

        Ok(Principal {
            id: record.owner_id,
            kind: PrincipalKind::Service,
            scopes: record.scopes.into_iter().collect(),
            tier,
        })
    }

    /// Soft-revoke. Revoking an already revoked key is a no-op.
    pub async fn revoke(&self, key_id: &str, owner_id: &str) -> Result<(), AuthError> {
        let record = self.owned_record(key_id, owner_id).await?;
        if record.is_revoked() {
            debug!(key_id = %key_id, "API key already revoked");
            return Ok(());
        }

        self.timed(self.repository.mark_revoked(key_id, Utc::now())).await?;
        info!(key_id = %key_id, owner_id = %owner_id, "API key revoked");
        Ok(())
    }

    /// Replace a key with a fresh one carrying the same name, scopes and
    /// lifetime length.
    ///
    /// The replacement is stored before the original is revoked. Only the
    /// call whose revoke actually sets the original's `revoked_at` keeps its
    /// replacement; any other outcome revokes the replacement again, so a
    /// rotation never leaves two valid keys behind.
    pub async fn rotate(&self, key_id: &str, owner_id: &str) -> Result<(ApiKeyRecord, ApiKey), AuthError> {
        let old = self.owned_record(key_id, owner_id).await?;
        if old.is_revoked() {
            return Err(AuthError::ApiKeyRevoked);
        }

        let lifetime = old.expires_at - old.created_at;
        let (replacement, plaintext) = self
            .issue(owner_id, &old.name, Some(old.scopes.clone()), Some(lifetime))
            .await?;

        // microsecond precision survives a round trip through timestamptz
        let revoked_at = Utc::now().trunc_subsecs(6);
        let outcome = match self.timed(self.repository.mark_revoked(&old.id, revoked_at)).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(key_id = %old.id, "Key was revoked by a concurrent request during rotation");
                Err(AuthError::ApiKeyRevoked)
            }
            Err(e) => {
                if self.revocation_landed(&old.id, revoked_at).await {
                    warn!(key_id = %old.id, error = %e, "Revocation reported an error but was applied");
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        };

        if let Err(e) = outcome {
            error!(key_id = %old.id, error = %e, "Rotation could not revoke original key, reverting");
            if let Err(revert) = self
                .timed(self.repository.mark_revoked(&replacement.id, Utc::now()))
                .await
            {
                error!(key_id = %replacement.id, error = %revert, "Failed to revert rotated key");
            }
            return Err(e);
        }

        info!(old_key_id = %old.id, new_key_id = %replacement.id, "API key rotated");
        Ok((replacement, plaintext))
    }

    /// Whether the stored `revoked_at` of `key_id` is exactly `revoked_at`
    async fn revocation_landed(&self, key_id: &str, revoked_at: DateTime<Utc>) -> bool {
        match self.timed(self.repository.get(key_id)).await {
            Ok(Some(record)) => record.revoked_at == Some(revoked_at),
            _ => false,
        }
    }

    /// Metadata of every key of `owner_id`, newest first
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyMetadata>, AuthError> {
        let mut records = self.timed(self.repository.list_by_owner(owner_id)).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.iter().map(ApiKeyMetadata::from).collect())
    }

    async fn owned_record(&self, key_id: &str, owner_id: &str) -> Result<ApiKeyRecord, AuthError> {
        let record = self
            .timed(self.repository.get(key_id))
            .await?
            .ok_or(AuthError::UnknownKeyId)?;
        if record.owner_id != owner_id {
            warn!(key_id = %key_id, "Key management attempted by non-owner");
            return Err(AuthError::OwnerMismatch);
        }
        Ok(record)
    }

    fn record_usage_detached(&self, key_id: String) {
        let repository = Arc::clone(&self.repository);
        let timeout = self.settings.operation_timeout;
        tokio::spawn(async move {
            if let Err(e) = with_timeout(timeout, repository.record_usage(&key_id, Utc::now())).await {
                warn!(key_id = %key_id, error = %e, "Failed to record API key usage");
            }
        });
    }

    async fn timed<T, F>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        with_timeout(self.settings.operation_timeout, operation).await
    }
}
