//! Flat record shape exchanged with the remote ledger service.
//!
//! The remote ledger stores one row per record with every field as a scalar:
//! tags are joined into a single comma-delimited string and timestamps are
//! RFC 3339 text. [`FlatRecord`] is that row; conversions to and from
//! [`Record`] live here so the client and the reference server agree on them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordId, SyncStatus};

/// Delimiter used to join tags on the wire.
pub const TAG_DELIMITER: char = ',';

/// Errors raised when a flat row cannot be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlatRecordError {
    /// The row has an empty id.
    #[error("record id is empty")]
    EmptyId,
    /// A timestamp column is not valid RFC 3339.
    #[error("invalid {field} timestamp {value:?}: {reason}")]
    BadTimestamp {
        /// Column name.
        field: &'static str,
        /// Raw column value.
        value: String,
        /// Parser message.
        reason: String,
    },
    /// The amount is NaN or infinite.
    #[error("amount is not a finite number")]
    NonFiniteAmount,
}

/// One record as the remote ledger stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    /// Record id.
    pub id: String,
    /// Record name.
    pub name: String,
    /// Signed amount. The remote column is called `price`.
    pub price: f64,
    /// Description, empty when absent.
    #[serde(default)]
    pub description: String,
    /// Comma-joined tags, empty when there are none.
    #[serde(default)]
    pub tags: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 last-modified time.
    pub updated_at: String,
}

impl FlatRecord {
    /// Flattens a record for the wire. The sync status is dropped.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.as_str().to_string(),
            name: record.name.clone(),
            price: record.amount,
            description: record.description.clone().unwrap_or_default(),
            tags: join_tags(&record.tags),
            created_at: format_timestamp(&record.created_at),
            updated_at: format_timestamp(&record.updated_at),
        }
    }

    /// Rebuilds a record from a remote row, tagging it with `status`.
    ///
    /// # Errors
    ///
    /// Returns [`FlatRecordError`] if the id is empty, the amount is not
    /// finite, or either timestamp fails to parse.
    pub fn into_record(self, status: SyncStatus) -> Result<Record, FlatRecordError> {
        if self.id.is_empty() {
            return Err(FlatRecordError::EmptyId);
        }
        if !self.price.is_finite() {
            return Err(FlatRecordError::NonFiniteAmount);
        }
        let created_at = parse_timestamp("created_at", &self.created_at)?;
        let updated_at = parse_timestamp("updated_at", &self.updated_at)?;
        Ok(Record {
            id: RecordId::from_string(self.id),
            name: self.name,
            amount: self.price,
            tags: split_tags(&self.tags),
            description: if self.description.is_empty() {
                None
            } else {
                Some(self.description)
            },
            created_at,
            updated_at,
            sync_status: status,
        })
    }
}

/// Payload of a remote delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Id of the record to delete.
    pub id: String,
}

/// Joins tags with [`TAG_DELIMITER`]. No tags yields an empty string.
#[must_use]
pub fn join_tags(tags: &[String]) -> String {
    let mut joined = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            joined.push(TAG_DELIMITER);
        }
        joined.push_str(tag);
    }
    joined
}

/// Brings tags into the form they take after a [`join_tags`] and
/// [`split_tags`] pass: a tag holding [`TAG_DELIMITER`] becomes several,
/// each is trimmed and empty ones are dropped.
#[must_use]
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    if tags.iter().all(|t| is_clean_tag(t)) {
        return tags;
    }
    tags.iter().flat_map(|t| split_tags(t)).collect()
}

fn is_clean_tag(tag: &str) -> bool {
    !tag.is_empty() && !tag.contains(TAG_DELIMITER) && tag.trim() == tag
}

/// Splits a delimited tag string. Segments are trimmed and empty segments
/// dropped, so `""` yields no tags.
#[must_use]
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(TAG_DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Formats a timestamp the way the remote ledger stores it.
#[must_use]
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, FlatRecordError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FlatRecordError::BadTimestamp {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
