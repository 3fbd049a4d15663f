//! In-memory partition store.
//!
//! Holds every record in one `RwLock`-guarded map. Acquisition and
//! conditional updates happen under the write lock, so they are atomic for
//! every coordinator sharing the same store instance. Clones share state,
//! which lets a test stand up several "nodes" against one store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::clock::{SharedClock, SystemClock, after};
use super::error::{CoordinationError, CoordinationResult};
use super::record::{PartitionRecord, PartitionStatus};
use super::traits::{PartitionStore, matches_status, rank_candidates};

/// Record identity: (source identifier, partition type, partition key).
pub type RecordKey = (String, String, String);

fn key_of(record: &PartitionRecord) -> RecordKey {
    (
        record.source_identifier.clone(),
        record.partition_type.clone(),
        record.partition_key.clone(),
    )
}

#[derive(Debug, Clone)]
pub struct InMemoryPartitionStore {
    records: Arc<RwLock<HashMap<RecordKey, PartitionRecord>>>,
    clock: SharedClock,
}

impl Default for InMemoryPartitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPartitionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of stored records across all sources and types.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Expire every live lease (for simulating a crashed owner).
    pub async fn expire_all_leases(&self) {
        let expired = self.clock.now() - chrono::TimeDelta::seconds(1);
        let mut records = self.records.write().await;
        for record in records.values_mut() {
            if record.status == Some(PartitionStatus::Assigned) {
                record.lease_expiry = Some(expired);
            }
        }
    }
}

#[async_trait]
impl PartitionStore for InMemoryPartitionStore {
    async fn get(
        &self,
        source_identifier: &str,
        partition_type: &str,
        partition_key: &str,
    ) -> CoordinationResult<Option<PartitionRecord>> {
        let key = (
            source_identifier.to_string(),
            partition_type.to_string(),
            partition_key.to_string(),
        );
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn try_create(&self, mut record: PartitionRecord) -> CoordinationResult<bool> {
        let mut records = self.records.write().await;
        let key = key_of(&record);
        if records.contains_key(&key) {
            return Ok(false);
        }
        record.version = 1;
        records.insert(key, record);
        Ok(true)
    }

    async fn try_update(&self, record: &mut PartitionRecord) -> CoordinationResult<()> {
        let mut records = self.records.write().await;
        let key = key_of(record);

        match records.get_mut(&key) {
            Some(stored) if stored.version == record.version => {
                record.version += 1;
                *stored = record.clone();
                Ok(())
            }
            _ => Err(CoordinationError::write_lost(record)),
        }
    }

    async fn try_acquire_available(
        &self,
        source_identifier: &str,
        partition_type: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> CoordinationResult<Option<PartitionRecord>> {
        let mut records = self.records.write().await;
        let now = self.clock.now();

        let candidate = rank_candidates(
            records.values().filter(|r| {
                r.source_identifier == source_identifier && r.partition_type == partition_type
            }),
            now,
        )
        .first()
        .map(|r| key_of(r));

        let Some(key) = candidate else {
            return Ok(None);
        };
        let Some(stored) = records.get_mut(&key) else {
            return Ok(None);
        };

        stored.assign(owner_id, after(now, lease_duration));
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn query_by_status(
        &self,
        source_identifier: &str,
        partition_type: &str,
        status: PartitionStatus,
        completed_since: Option<DateTime<Utc>>,
    ) -> CoordinationResult<Vec<PartitionRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| {
                r.source_identifier == source_identifier
                    && r.partition_type == partition_type
                    && matches_status(r, status, completed_since)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn query_all(
        &self,
        source_identifier: &str,
        partition_type: &str,
    ) -> CoordinationResult<Vec<PartitionRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.source_identifier == source_identifier && r.partition_type == partition_type)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::clock::ManualClock;

    fn store() -> (InMemoryPartitionStore, ManualClock) {
        let clock = ManualClock::new();
        (
            InMemoryPartitionStore::with_clock(Arc::new(clock.clone())),
            clock,
        )
    }

    fn record(clock: &ManualClock, key: &str) -> PartitionRecord {
        use crate::coordination::clock::Clock;
        PartitionRecord::unassigned("src", "STREAM", key, None, clock.now())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (store, clock) = store();
        assert!(store.try_create(record(&clock, "a")).await.unwrap());

        let mut dup = record(&clock, "a");
        dup.progress_state = Some("{\"other\":true}".to_string());
        assert!(!store.try_create(dup).await.unwrap());

        let stored = store.get("src", "STREAM", "a").await.unwrap().unwrap();
        assert_eq!(stored.progress_state, None);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let (store, clock) = store();
        store.try_create(record(&clock, "a")).await.unwrap();

        let mut first = store.get("src", "STREAM", "a").await.unwrap().unwrap();
        let mut stale = first.clone();

        first.closed_count = 1;
        store.try_update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        stale.closed_count = 5;
        let err = store.try_update(&mut stale).await.unwrap_err();
        assert!(err.is_conditional_write_lost());

        let stored = store.get("src", "STREAM", "a").await.unwrap().unwrap();
        assert_eq!(stored.closed_count, 1);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_lost_write() {
        let (store, clock) = store();
        let mut rec = record(&clock, "ghost");
        let err = store.try_update(&mut rec).await.unwrap_err();
        assert!(err.is_conditional_write_lost());
    }

    #[tokio::test]
    async fn test_acquire_respects_lease() {
        let (store, clock) = store();
        store.try_create(record(&clock, "a")).await.unwrap();
        let lease = Duration::from_secs(60);

        let got = store
            .try_acquire_available("src", "STREAM", "node-a", lease)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.owner_id.as_deref(), Some("node-a"));
        assert_eq!(got.status, Some(PartitionStatus::Assigned));

        assert!(
            store
                .try_acquire_available("src", "STREAM", "node-b", lease)
                .await
                .unwrap()
                .is_none()
        );

        clock.advance(Duration::from_secs(61));
        let stolen = store
            .try_acquire_available("src", "STREAM", "node-b", lease)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stolen.owner_id.as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn test_acquire_scoped_to_source_and_type() {
        let (store, clock) = store();
        store.try_create(record(&clock, "a")).await.unwrap();
        let lease = Duration::from_secs(60);

        assert!(
            store
                .try_acquire_available("other", "STREAM", "n", lease)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .try_acquire_available("src", "EXPORT", "n", lease)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_expire_all_leases() {
        let (store, clock) = store();
        store.try_create(record(&clock, "a")).await.unwrap();
        let lease = Duration::from_secs(600);
        store
            .try_acquire_available("src", "STREAM", "node-a", lease)
            .await
            .unwrap();

        store.expire_all_leases().await;

        let got = store
            .try_acquire_available("src", "STREAM", "node-b", lease)
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_query_all_oldest_first() {
        let (store, clock) = store();
        store.try_create(record(&clock, "b")).await.unwrap();
        clock.advance(Duration::from_secs(1));
        store.try_create(record(&clock, "a")).await.unwrap();

        let keys: Vec<_> = store
            .query_all("src", "STREAM")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.partition_key)
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
