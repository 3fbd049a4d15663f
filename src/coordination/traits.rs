//! Store contract for partition coordination.
//!
//! The whole protocol rests on this trait. A backend only has to offer
//! single-record conditional writes; there is no multi-record transaction,
//! no lock service and no node-to-node messaging.
//!
//! # Available Implementations
//!
//! - [`InMemoryPartitionStore`](super::InMemoryPartitionStore): single process,
//!   every mutation under one write lock
//! - [`ObjectStorePartitionStore`](super::ObjectStorePartitionStore): one JSON
//!   object per record, guarded by `object_store` conditional puts
//!
//! # Atomicity
//!
//! [`PartitionStore::try_acquire_available`] must claim a record such that
//! two concurrent callers never both receive the same record with an
//! unexpired lease. The in-memory backend gets this from its lock. The object
//! store backend scans candidates and claims each with a conditional update;
//! losing that update moves on to the next candidate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::CoordinationResult;
use super::record::{PartitionRecord, PartitionStatus};

/// Persistent store of partition records.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Prepare the backend. Called once before use; must be idempotent.
    async fn initialize(&self) -> CoordinationResult<()> {
        Ok(())
    }

    // ========================================================================
    // Point Operations
    // ========================================================================

    /// Look up a single record.
    async fn get(
        &self,
        source_identifier: &str,
        partition_type: &str,
        partition_key: &str,
    ) -> CoordinationResult<Option<PartitionRecord>>;

    /// Create `record` if no record with the same identity exists.
    ///
    /// Returns `Ok(false)` when the record already exists. The existing
    /// record is left untouched.
    async fn try_create(&self, record: PartitionRecord) -> CoordinationResult<bool>;

    /// Write `record` if the stored version still equals `record.version`.
    ///
    /// On success `record.version` is advanced to the stored version. On a
    /// version mismatch (or a deleted record) returns
    /// [`ConditionalWriteLost`](super::CoordinationError::ConditionalWriteLost).
    async fn try_update(&self, record: &mut PartitionRecord) -> CoordinationResult<()>;

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Claim one available record of `partition_type` for `owner_id`.
    ///
    /// Candidates are, in order: assigned records whose lease has expired,
    /// unassigned records, closed records whose reopen time has passed.
    /// Oldest record first within each group. The claimed record is returned
    /// as `ASSIGNED` with `lease_expiry = now + lease_duration`.
    async fn try_acquire_available(
        &self,
        source_identifier: &str,
        partition_type: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> CoordinationResult<Option<PartitionRecord>>;

    // ========================================================================
    // Queries
    // ========================================================================

    /// Records of a type with the given status.
    ///
    /// When `completed_since` is set only records completed at or after that
    /// time are returned.
    async fn query_by_status(
        &self,
        source_identifier: &str,
        partition_type: &str,
        status: PartitionStatus,
        completed_since: Option<DateTime<Utc>>,
    ) -> CoordinationResult<Vec<PartitionRecord>>;

    /// Every record of a type, oldest first.
    async fn query_all(
        &self,
        source_identifier: &str,
        partition_type: &str,
    ) -> CoordinationResult<Vec<PartitionRecord>>;
}

/// Pick the preferred acquisition candidate indexes from `records`.
///
/// Shared by backends so that every store orders candidates the same way.
pub(crate) fn rank_candidates<'a, I>(records: I, now: DateTime<Utc>) -> Vec<&'a PartitionRecord>
where
    I: IntoIterator<Item = &'a PartitionRecord>,
{
    let mut ranked: Vec<(u8, &PartitionRecord)> = records
        .into_iter()
        .filter_map(|r| r.acquire_rank(now).map(|rank| (rank, r)))
        .collect();
    ranked.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.partition_key.cmp(&b.partition_key))
    });
    ranked.into_iter().map(|(_, r)| r).collect()
}

/// Whether a record matches a status query.
pub(crate) fn matches_status(
    record: &PartitionRecord,
    status: PartitionStatus,
    completed_since: Option<DateTime<Utc>>,
) -> bool {
    if record.status != Some(status) {
        return false;
    }
    match completed_since {
        Some(since) => record.completed_at.is_some_and(|at| at >= since),
        None => true,
    }
}
