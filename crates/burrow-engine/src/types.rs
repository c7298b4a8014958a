//! Record and log-operation types

use crate::compare::Comparator;
use burrow_core::Pattern;
use serde::{Deserialize, Serialize};

/// Current time as unix milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single versioned record
///
/// Records are immutable once created; overwriting a key produces a new
/// `Record` and the old version stays reachable from older snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Primary key
    pub key: String,
    /// Raw value bytes
    pub value: Vec<u8>,
    /// Expiration time (unix millis); `None` means no TTL
    pub expires_at: Option<u64>,
}

impl Record {
    /// Create a record with no TTL
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: None,
        }
    }

    /// Check whether the record is past its TTL at `now` (unix millis)
    ///
    /// An expired record is treated as absent by every read path even if
    /// it has not yet been physically swept.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Definition of a secondary index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Unique index name
    pub name: String,
    /// Glob pattern restricting which keys participate
    pub pattern: Pattern,
    /// Ordering function over record values
    pub comparator: Comparator,
}

/// A committed mutation, as persisted in the append-only log
///
/// Index definitions are logged alongside data mutations so that secondary
/// indexes are rebuilt by sequential replay on open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or overwrite a key
    Set {
        key: String,
        value: Vec<u8>,
        expires_at: Option<u64>,
    },
    /// Remove a key
    Delete { key: String },
    /// Create a secondary index
    CreateIndex { def: IndexDef },
    /// Drop a secondary index
    DropIndex { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_expiry() {
        let mut rec = Record::new("k", b"v".to_vec());
        assert!(!rec.is_expired(u64::MAX));

        rec.expires_at = Some(1000);
        assert!(!rec.is_expired(999));
        assert!(rec.is_expired(1000));
        assert!(rec.is_expired(1001));
    }

    #[test]
    fn test_log_op_roundtrip() {
        let op = LogOp::Set {
            key: "user:1".into(),
            value: b"alice".to_vec(),
            expires_at: Some(42),
        };
        let bytes = bincode::serialize(&op).unwrap();
        let parsed: LogOp = bincode::deserialize(&bytes).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_index_def_roundtrip() {
        let def = IndexDef {
            name: "ages".into(),
            pattern: Pattern::new("user:*"),
            comparator: Comparator::Json {
                path: "age".into(),
            },
        };
        let bytes = bincode::serialize(&def).unwrap();
        let parsed: IndexDef = bincode::deserialize(&bytes).unwrap();
        assert_eq!(parsed, def);
    }
}
