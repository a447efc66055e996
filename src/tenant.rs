//! Tenant identifiers.
//!
//! A [`TenantId`] can only be obtained through [`TenantId::parse`], so every
//! value that reaches the path resolver or the pool has already been
//! validated. Nothing downstream ever builds a path from raw request input.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Error;

/// Maximum length of a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 63;

static TENANT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("tenant id pattern"));

/// A validated tenant identifier: lowercase alphanumerics and hyphens,
/// starting with an alphanumeric, at most [`MAX_TENANT_ID_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Validate `raw` and wrap it.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::BadRequest("tenantId is required".to_string()));
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(Error::BadRequest(format!(
                "tenantId must be at most {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if !TENANT_ID_PATTERN.is_match(raw) {
            return Err(Error::BadRequest(format!(
                "Invalid tenantId '{}': use lowercase letters, digits and '-'",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple_ids() {
        for id in ["acme", "acme-corp", "t1", "0", "a-b-c-1-2-3"] {
            let tenant = TenantId::parse(id).unwrap();
            assert_eq!(tenant.as_str(), id);
        }
    }

    #[test]
    fn test_rejects_empty() {
        let err = TenantId::parse("").unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_rejects_path_traversal() {
        for id in ["..", "../etc", "a/b", "a\\b", ".hidden", "a.b"] {
            assert!(TenantId::parse(id).is_err(), "{id} should be rejected");
        }
    }

    #[test]
    fn test_rejects_uppercase_and_leading_hyphen() {
        assert!(TenantId::parse("Acme").is_err());
        assert!(TenantId::parse("-acme").is_err());
        assert!(TenantId::parse("acme corp").is_err());
    }

    #[test]
    fn test_length_bound() {
        let max = "a".repeat(MAX_TENANT_ID_LEN);
        assert!(TenantId::parse(&max).is_ok());

        let too_long = "a".repeat(MAX_TENANT_ID_LEN + 1);
        let err = TenantId::parse(&too_long).unwrap_err();
        assert!(err.to_string().contains("at most"));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let tenant = TenantId::parse("acme").unwrap();
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"acme\"");
    }
}
