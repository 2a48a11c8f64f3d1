// Hierarchical scope matching over colon-delimited capability paths

use crate::core::errors::AuthError;
use std::collections::{BTreeSet, HashSet};

/// Bare wildcard grant covering every scope
pub const WILDCARD: &str = "*";

/// Membership test over a collection of granted scopes.
///
/// Lets the matcher work with whatever container a caller holds.
pub trait ScopeGrants {
    fn grants(&self, scope: &str) -> bool;
}

impl ScopeGrants for BTreeSet<String> {
    fn grants(&self, scope: &str) -> bool {
        self.contains(scope)
    }
}

impl ScopeGrants for HashSet<String> {
    fn grants(&self, scope: &str) -> bool {
        self.contains(scope)
    }
}

impl<S: AsRef<str>> ScopeGrants for [S] {
    fn grants(&self, scope: &str) -> bool {
        self.iter().any(|s| s.as_ref() == scope)
    }
}

impl<S: AsRef<str>> ScopeGrants for Vec<S> {
    fn grants(&self, scope: &str) -> bool {
        self.as_slice().grants(scope)
    }
}

/// Pure, deterministic scope matcher
pub struct ScopeMatcher;

impl ScopeMatcher {
    /// Check whether `granted` covers `required`.
    ///
    /// Exact match and the bare `*` grant always succeed. Otherwise each
    /// proper prefix of `required` is tested in `<prefix>:*` form, from the
    /// most specific to the root. An unwildcarded grant never covers a more
    /// specific requirement: `chat:send` does not cover `chat:send:stream`.
    pub fn is_allowed<G: ScopeGrants + ?Sized>(granted: &G, required: &str) -> bool {
        if granted.grants(required) || granted.grants(WILDCARD) {
            return true;
        }

        let mut candidate = String::with_capacity(required.len() + 2);
        let mut end = required.len();
        while let Some(idx) = required[..end].rfind(':') {
            candidate.clear();
            candidate.push_str(&required[..idx]);
            candidate.push_str(":*");
            if granted.grants(&candidate) {
                return true;
            }
            end = idx;
        }

        false
    }

    /// Return the first required scope not covered by `granted`
    pub fn first_missing<'a, G, I>(granted: &G, required: I) -> Option<&'a str>
    where
        G: ScopeGrants + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        required
            .into_iter()
            .find(|scope| !Self::is_allowed(granted, scope))
    }
}

/// Canonicalize scopes at issuance: trim, lowercase, deduplicate, sort.
///
/// Rejects empty segments (`a::b`, `a:`), embedded whitespace, and `*`
/// anywhere but as a whole segment at the end.
pub fn canonicalize_scopes<I, S>(scopes: I) -> Result<Vec<String>, AuthError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut canonical = BTreeSet::new();
    for raw in scopes {
        let scope = raw.as_ref().trim().to_ascii_lowercase();
        if scope.is_empty() {
            continue;
        }
        validate_scope(&scope)?;
        canonical.insert(scope);
    }
    Ok(canonical.into_iter().collect())
}

/// Trimmed, lowercased form of `raw` when it is a well-formed scope
pub fn normalize_scope(raw: &str) -> Option<String> {
    let scope = raw.trim().to_ascii_lowercase();
    (!scope.is_empty() && validate_scope(&scope).is_ok()).then_some(scope)
}

fn validate_scope(scope: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::InvalidScope(scope.to_string());

    if scope.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let segments: Vec<&str> = scope.split(':').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(invalid());
        }
        if segment.contains('*') && (*segment != WILDCARD || i != last) {
            return Err(invalid());
        }
    }
    Ok(())
}
