// ABOUTME: Worker identity and launch spec types shared by the source, launcher and registry.
// ABOUTME: A LaunchSpec is what the config source returns for one desired worker.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Number of characters of an identity shown in forwarded worker output.
pub const SHORT_IDENTITY_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("worker identity must not be blank")]
    Blank,
}

/// Opaque key for one logical worker (an agent ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Create an identity, trimming surrounding whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Blank);
        }
        if trimmed.len() == id.len() {
            Ok(Self(id))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form used to prefix forwarded output lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_IDENTITY_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for WorkerIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkerIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for WorkerIdentity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerIdentity> for String {
    fn from(id: WorkerIdentity) -> Self {
        id.0
    }
}

/// Identity plus the auxiliary parameters a worker needs (e.g. its client ID).
///
/// Only presence of the identity drives reconciliation. A changed parameter
/// for a running identity is not applied until that worker is restarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub identity: WorkerIdentity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_identity_rejects_blank() {
        assert_eq!(WorkerIdentity::new(""), Err(IdentityError::Blank));
        assert_eq!(WorkerIdentity::new("   "), Err(IdentityError::Blank));
    }

    #[test]
    fn test_identity_trims_whitespace() {
        let id = WorkerIdentity::new("  agent-1 \n").unwrap();
        assert_eq!(id.as_str(), "agent-1");
    }

    #[test]
    fn test_short_identity_truncates() {
        let id = WorkerIdentity::new("0123456789abcdef").unwrap();
        assert_eq!(id.short(), "01234567");

        let short = WorkerIdentity::new("abc").unwrap();
        assert_eq!(short.short(), "abc");
    }

    #[test]
    fn test_short_identity_respects_char_boundaries() {
        let id = WorkerIdentity::new("ééééééééééé").unwrap();
        assert_eq!(id.short().chars().count(), SHORT_IDENTITY_LEN);
    }

    #[test]
    fn test_identity_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(WorkerIdentity::new("a").unwrap(), 1);
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn test_launch_spec_deserialize() {
        let spec: LaunchSpec =
            serde_json::from_str(r#"{"identity":"agent-1","params":{"client_id":"42"}}"#).unwrap();
        assert_eq!(spec.identity.as_str(), "agent-1");
        assert_eq!(spec.param("client_id"), Some("42"));
    }

    #[test]
    fn test_launch_spec_rejects_blank_identity() {
        let result: Result<LaunchSpec, _> = serde_json::from_str(r#"{"identity":" "}"#);
        assert!(result.is_err());
    }
}
