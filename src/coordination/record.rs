//! Persisted partition record.
//!
//! This is the only shape the store knows about. Typed partitions live in
//! [`partition`](super::partition) and are rebuilt from records by a
//! [`PartitionFactory`](super::partition::PartitionFactory).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a leased partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionStatus {
    Unassigned,
    Assigned,
    Closed,
    Completed,
}

impl PartitionStatus {
    /// `COMPLETED` is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PartitionStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Unassigned => "UNASSIGNED",
            PartitionStatus::Assigned => "ASSIGNED",
            PartitionStatus::Closed => "CLOSED",
            PartitionStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coordinated unit of work as stored.
///
/// `status` is `None` for global state records, which are never leased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRecord {
    pub source_identifier: String,
    pub partition_type: String,
    pub partition_key: String,
    #[serde(default)]
    pub status: Option<PartitionStatus>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub lease_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reopen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_count: u64,
    #[serde(default)]
    pub progress_state: Option<String>,
    /// Incremented by the store on every successful write.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_only: bool,
}

impl PartitionRecord {
    /// A fresh, unassigned leased partition.
    pub fn unassigned(
        source_identifier: impl Into<String>,
        partition_type: impl Into<String>,
        partition_key: impl Into<String>,
        progress_state: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            partition_type: partition_type.into(),
            partition_key: partition_key.into(),
            status: Some(PartitionStatus::Unassigned),
            owner_id: None,
            lease_expiry: None,
            reopen_at: None,
            closed_count: 0,
            progress_state,
            version: 0,
            created_at,
            completed_at: None,
            read_only: false,
        }
    }

    /// A global state record: no status, no lease.
    pub fn global_state(
        source_identifier: impl Into<String>,
        partition_type: impl Into<String>,
        partition_key: impl Into<String>,
        progress_state: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: None,
            read_only: true,
            ..Self::unassigned(
                source_identifier,
                partition_type,
                partition_key,
                progress_state,
                created_at,
            )
        }
    }

    /// Whether another owner may claim this record at `now`.
    ///
    /// Order of preference among acquirable records is given by
    /// [`acquire_rank`](Self::acquire_rank).
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        self.acquire_rank(now).is_some()
    }

    /// Acquisition group for this record, lower first: expired leases, then
    /// unassigned, then closed records whose reopen time has passed.
    pub fn acquire_rank(&self, now: DateTime<Utc>) -> Option<u8> {
        use super::clock::has_elapsed;

        match self.status? {
            PartitionStatus::Assigned => match self.lease_expiry {
                Some(expiry) if has_elapsed(expiry, now) => Some(0),
                // An assigned record without an expiry was never leased
                // properly and is treated as expired.
                None => Some(0),
                Some(_) => None,
            },
            PartitionStatus::Unassigned => Some(1),
            PartitionStatus::Closed => match self.reopen_at {
                Some(reopen) if has_elapsed(reopen, now) => Some(2),
                None => Some(2),
                Some(_) => None,
            },
            PartitionStatus::Completed => None,
        }
    }

    /// Mark as assigned to `owner_id` until `lease_expiry`.
    pub fn assign(&mut self, owner_id: &str, lease_expiry: DateTime<Utc>) {
        self.status = Some(PartitionStatus::Assigned);
        self.owner_id = Some(owner_id.to_string());
        self.lease_expiry = Some(lease_expiry);
        self.reopen_at = None;
    }

    pub fn clear_lease(&mut self) {
        self.owner_id = None;
        self.lease_expiry = None;
    }
}
