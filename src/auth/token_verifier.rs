// Bearer token verification against the issuer's published signing keys

use crate::core::errors::AuthError;
use crate::core::models::{Principal, PrincipalKind, Tier};
use crate::core::scope::normalize_scope;
use crate::state::key_set_cache::SigningKeyCache;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Signature algorithms accepted from the issuer. Symmetric algorithms are
/// never accepted: the verification key is public.
pub const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::EdDSA, Algorithm::RS256, Algorithm::ES256];

#[derive(Debug, Clone)]
pub struct TokenVerifierSettings {
    /// Expected `iss`, checked when set
    pub issuer: Option<String>,
    /// Expected `aud`, checked when set
    pub audience: Option<String>,
    /// Tolerance applied to `exp` and `nbf`
    pub clock_skew: Duration,
}

impl Default for TokenVerifierSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            clock_skew: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    /// Space-delimited scope list
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    tier: Option<String>,
}

/// Verifies bearer tokens and resolves them into user principals
pub struct TokenVerifier {
    keys: SigningKeyCache,
    settings: TokenVerifierSettings,
}

impl TokenVerifier {
    pub fn new(keys: SigningKeyCache, settings: TokenVerifierSettings) -> Self {
        Self { keys, settings }
    }

    /// Whether a signing key set has been fetched at least once
    pub fn keys_loaded(&self) -> bool {
        self.keys.snapshot().is_some()
    }

    /// Verify `token` and build the principal it asserts.
    ///
    /// The header is read untrusted to pick the key; claims are only trusted
    /// after the signature checks out. Only an unknown `kid` can trigger a
    /// key set refresh, and at most one.
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Rejecting bearer token with malformed header");
            AuthError::InvalidToken
        })?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            warn!(alg = ?header.alg, "Rejecting bearer token with disallowed algorithm");
            return Err(AuthError::InvalidToken);
        }

        let kid = header.kid.ok_or_else(|| {
            debug!("Rejecting bearer token without kid");
            AuthError::InvalidToken
        })?;

        let key = self.keys.resolve(&kid).await?.ok_or_else(|| {
            warn!(kid = %kid, "Bearer token signed with unknown key");
            AuthError::InvalidToken
        })?;

        let validation = self.validation_for(header.alg);
        let data = decode::<TokenClaims>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            other => {
                debug!(kid = %kid, reason = ?other, "Bearer token failed validation");
                AuthError::InvalidToken
            }
        })?;

        principal_from_claims(data.claims)
    }

    fn validation_for(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.settings.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let mut required = vec!["exp", "sub"];
        if let Some(issuer) = &self.settings.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match &self.settings.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);
        validation
    }
}

fn principal_from_claims(claims: TokenClaims) -> Result<Principal, AuthError> {
    if claims.sub.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }

    let scopes: BTreeSet<String> = claims
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|raw| {
            let scope = normalize_scope(raw);
            if scope.is_none() {
                debug!(scope = %raw, "Ignoring malformed scope claim");
            }
            scope
        })
        .collect();

    let tier = claims
        .tier
        .as_deref()
        .and_then(|t| t.parse::<Tier>().ok())
        .unwrap_or_default();

    Ok(Principal {
        id: claims.sub,
        kind: PrincipalKind::User,
        scopes,
        tier,
    })
}
