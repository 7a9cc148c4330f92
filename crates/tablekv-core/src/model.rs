//! Data models for tablekv
//!
//! A [`Record`] is one stored value plus the metadata the table service
//! assigns to it. Records are only ever built from a successful backend
//! response, so the version token and timestamp always come from the
//! service.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::TableEntity;

/// Opaque revision marker (ETag) of a stored record
///
/// Tokens are only compared for equality. The text form exists so an API
/// layer can hand a token to a client and accept it back unchanged; it
/// carries no meaning that callers may rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub(crate) fn from_etag(etag: String) -> Self {
        Self(etag)
    }

    pub(crate) fn as_etag(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts a token previously handed out by [`Display`](fmt::Display) or serde
impl FromStr for VersionToken {
    type Err = InvalidVersionToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(InvalidVersionToken);
        }
        Ok(Self(s.to_string()))
    }
}

/// Returned when parsing an empty version token
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Version token must not be empty")]
pub struct InvalidVersionToken;

/// One stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    collection_id: String,
    key: String,
    data: String,
    #[serde(rename = "eTag")]
    version: VersionToken,
    timestamp: DateTime<Utc>,
}

impl Record {
    /// Build a record from a written or retrieved entity
    ///
    /// Returns `None` when the service did not report an ETag or timestamp.
    pub(crate) fn from_entity(entity: TableEntity) -> Option<Self> {
        let etag = entity.etag.filter(|e| !e.is_empty())?;
        let timestamp = entity.timestamp?;
        Some(Self {
            collection_id: entity.partition_key,
            key: entity.row_key,
            data: entity.data,
            version: VersionToken::from_etag(etag),
            timestamp,
        })
    }

    /// Partition the record belongs to
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Take the payload, dropping the metadata
    pub fn into_data(self) -> String {
        self.data
    }

    pub fn version(&self) -> &VersionToken {
        &self.version
    }

    /// Time of the last successful write
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub is_healthy: bool,
    pub message: String,
}

impl StatusResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            is_healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            message: message.into(),
        }
    }
}
