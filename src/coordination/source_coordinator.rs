//! Per-node facade over the partition store.
//!
//! A [`SourceCoordinator`] is scoped to one effective source identifier and
//! one owner id. It turns typed partitions into record transitions:
//!
//! ```text
//! UNASSIGNED --acquire--> ASSIGNED --complete--> COMPLETED
//! ASSIGNED --close(reopen_after)--> CLOSED --reopen time passes--> acquirable
//! ASSIGNED --lease expires--> acquirable
//! ASSIGNED --give_up--> UNASSIGNED
//! ASSIGNED --close, closed count reaches limit--> COMPLETED
//! ```
//!
//! Every write is conditional on the record version the caller last saw.
//! A lost race surfaces as
//! [`ConditionalWriteLost`](super::CoordinationError::ConditionalWriteLost)
//! and is never retried here; the caller must stop working on the partition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::clock::{SharedClock, SystemClock, after};
use super::config::CoordinationConfig;
use super::error::{CoordinationError, CoordinationResult};
use super::partition::{
    CoordinatedPartition, DefaultPartitionFactory, GlobalState, PartitionFactory, SourcePartition,
};
use super::record::{PartitionRecord, PartitionStatus};
use super::traits::PartitionStore;
use crate::constants::GLOBAL_STATE_PARTITION_TYPE;

pub struct SourceCoordinator<F: PartitionFactory = DefaultPartitionFactory> {
    store: Arc<dyn PartitionStore>,
    factory: F,
    source_identifier: String,
    owner_id: String,
    lease_timeout: Duration,
    clock: SharedClock,
}

impl SourceCoordinator<DefaultPartitionFactory> {
    /// Coordinator for the built-in partition kinds.
    pub fn new(store: Arc<dyn PartitionStore>, source: &str, config: &CoordinationConfig) -> Self {
        Self::with_factory(store, DefaultPartitionFactory, source, config)
    }
}

impl<F: PartitionFactory> SourceCoordinator<F> {
    pub fn with_factory(
        store: Arc<dyn PartitionStore>,
        factory: F,
        source: &str,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            store,
            factory,
            source_identifier: config.source_identifier(source),
            owner_id: config.owner_id.clone(),
            lease_timeout: config.lease_timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for lease arithmetic. Should be the store's clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Effective source identifier (prefix applied).
    pub fn source_identifier(&self) -> &str {
        &self.source_identifier
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn initialize(&self) -> CoordinationResult<()> {
        self.store.initialize().await
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create one record per key, all sharing `initial_progress_state`.
    ///
    /// A key that already exists is left untouched and counts as success.
    /// Records of the global state type are created without a status.
    pub async fn create_partitions<I, S>(
        &self,
        keys: I,
        partition_type: &str,
        initial_progress_state: Option<&str>,
    ) -> CoordinationResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let record = self.new_record(
                partition_type,
                key.as_ref(),
                initial_progress_state.map(str::to_string),
                partition_type != GLOBAL_STATE_PARTITION_TYPE,
            );
            self.create_record(record).await?;
        }
        Ok(())
    }

    /// Create a typed partition. Returns `false` if it already existed.
    pub async fn create_partition<P: SourcePartition>(&self, partition: &P) -> CoordinationResult<bool> {
        let record = self.new_record(
            P::PARTITION_TYPE,
            &partition.partition_key(),
            partition.serialized_progress()?,
            P::LEASED,
        );
        self.create_record(record).await
    }

    fn new_record(
        &self,
        partition_type: &str,
        partition_key: &str,
        progress_state: Option<String>,
        leased: bool,
    ) -> PartitionRecord {
        let now = self.clock.now();
        if leased {
            PartitionRecord::unassigned(
                &self.source_identifier,
                partition_type,
                partition_key,
                progress_state,
                now,
            )
        } else {
            PartitionRecord::global_state(
                &self.source_identifier,
                partition_type,
                partition_key,
                progress_state,
                now,
            )
        }
    }

    async fn create_record(&self, record: PartitionRecord) -> CoordinationResult<bool> {
        let (partition_type, partition_key) =
            (record.partition_type.clone(), record.partition_key.clone());
        let created = self.store.try_create(record).await?;
        if created {
            debug!(partition_type = %partition_type, partition_key = %partition_key, "Created partition");
        } else {
            debug!(
                partition_type = %partition_type,
                partition_key = %partition_key,
                "Partition already exists"
            );
        }
        Ok(created)
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Claim one available partition of `partition_type`.
    ///
    /// `lease` defaults to the configured lease timeout. Global state cannot
    /// be acquired.
    pub async fn acquire_available_partition(
        &self,
        partition_type: &str,
        lease: Option<Duration>,
    ) -> CoordinationResult<Option<F::Output>> {
        if partition_type == GLOBAL_STATE_PARTITION_TYPE {
            return Err(CoordinationError::NotLeasable(partition_type.to_string()));
        }
        match self.acquire_record(partition_type, lease).await? {
            Some(record) => self.factory.build(record).map(Some),
            None => Ok(None),
        }
    }

    /// Typed shortcut for [`acquire_available_partition`](Self::acquire_available_partition).
    pub async fn acquire<P: SourcePartition>(&self, lease: Option<Duration>) -> CoordinationResult<Option<P>> {
        if !P::LEASED {
            return Err(CoordinationError::NotLeasable(P::PARTITION_TYPE.to_string()));
        }
        match self.acquire_record(P::PARTITION_TYPE, lease).await? {
            Some(record) => P::from_record(record).map(Some),
            None => Ok(None),
        }
    }

    async fn acquire_record(
        &self,
        partition_type: &str,
        lease: Option<Duration>,
    ) -> CoordinationResult<Option<PartitionRecord>> {
        let lease = lease.unwrap_or(self.lease_timeout);
        let acquired = self
            .store
            .try_acquire_available(&self.source_identifier, partition_type, &self.owner_id, lease)
            .await?;

        if let Some(record) = &acquired {
            debug!(
                partition_type,
                partition_key = %record.partition_key,
                owner_id = %self.owner_id,
                lease_secs = lease.as_secs(),
                closed_count = record.closed_count,
                "Acquired partition"
            );
        }
        Ok(acquired)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Persist the partition's current progress.
    ///
    /// For leased partitions the lease is also extended to
    /// `now + lease_extension` (default: the configured lease timeout).
    pub async fn save_progress<P>(&self, partition: &mut P, lease_extension: Option<Duration>) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        let extension = lease_extension.unwrap_or(self.lease_timeout);
        let now = self.clock.now();
        self.transition(partition, |record| {
            if record.status.is_some() {
                record.lease_expiry = Some(after(now, extension));
            }
        })
        .await
    }

    /// Mark the partition done for good.
    pub async fn complete_partition<P>(&self, partition: &mut P) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        self.ensure_leased(partition)?;
        let now = self.clock.now();
        self.transition(partition, |record| {
            record.status = Some(PartitionStatus::Completed);
            record.clear_lease();
            record.reopen_at = None;
            record.completed_at = Some(now);
        })
        .await?;

        debug!(
            partition_type = %partition.partition_type(),
            partition_key = %partition.partition_key(),
            "Completed partition"
        );
        Ok(())
    }

    /// Release the partition until `reopen_after` has passed.
    pub async fn close_partition<P>(&self, partition: &mut P, reopen_after: Duration) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        self.close(partition, reopen_after, None).await
    }

    /// Like [`close_partition`](Self::close_partition), but completes the
    /// partition once it has been closed `max_closed_count` times.
    pub async fn close_partition_with_limit<P>(
        &self,
        partition: &mut P,
        reopen_after: Duration,
        max_closed_count: u64,
    ) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        self.close(partition, reopen_after, Some(max_closed_count)).await
    }

    async fn close<P>(
        &self,
        partition: &mut P,
        reopen_after: Duration,
        max_closed_count: Option<u64>,
    ) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        self.ensure_leased(partition)?;
        let now = self.clock.now();
        self.transition(partition, |record| {
            record.closed_count += 1;
            record.clear_lease();
            if max_closed_count.is_some_and(|max| record.closed_count >= max) {
                record.status = Some(PartitionStatus::Completed);
                record.reopen_at = None;
                record.completed_at = Some(now);
            } else {
                record.status = Some(PartitionStatus::Closed);
                record.reopen_at = Some(after(now, reopen_after));
            }
        })
        .await?;

        let record = partition.record();
        debug!(
            partition_type = %partition.partition_type(),
            partition_key = %partition.partition_key(),
            status = ?record.and_then(|r| r.status),
            closed_count = record.map(|r| r.closed_count).unwrap_or_default(),
            "Closed partition"
        );
        Ok(())
    }

    /// Hand the partition back so any node may acquire it immediately.
    ///
    /// Current progress is saved along with the release.
    pub async fn give_up_partition<P>(&self, partition: &mut P) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        self.ensure_leased(partition)?;
        self.transition(partition, |record| {
            record.status = Some(PartitionStatus::Unassigned);
            record.clear_lease();
        })
        .await?;

        info!(
            partition_type = %partition.partition_type(),
            partition_key = %partition.partition_key(),
            owner_id = %self.owner_id,
            "Gave up partition"
        );
        Ok(())
    }

    fn ensure_leased<P>(&self, partition: &P) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
    {
        if partition.is_leased() {
            Ok(())
        } else {
            Err(CoordinationError::NotLeasable(partition.partition_type().to_string()))
        }
    }

    /// Apply `change` to a copy of the backing record along with the current
    /// progress, write it conditionally, and adopt it on success.
    ///
    /// On failure the partition's record is left as it was.
    async fn transition<P, C>(&self, partition: &mut P, change: C) -> CoordinationResult<()>
    where
        P: CoordinatedPartition + ?Sized,
        C: FnOnce(&mut PartitionRecord),
    {
        let progress = partition.serialized_progress()?;
        let partition_type = partition.partition_type().to_string();
        let partition_key = partition.partition_key();

        let Some(record) = partition.record_mut() else {
            return Err(CoordinationError::MissingStoreItem {
                partition_type,
                partition_key,
            });
        };

        let mut next = record.clone();
        next.progress_state = progress;
        change(&mut next);

        if let Err(e) = self.store.try_update(&mut next).await {
            if e.is_conditional_write_lost() {
                warn!(
                    partition_type = %partition_type,
                    partition_key = %partition_key,
                    owner_id = %self.owner_id,
                    "Lost conditional write, ownership is no longer held"
                );
            }
            return Err(e);
        }

        *record = next;
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Look up a global state record through the factory.
    pub async fn get_partition(&self, partition_key: &str) -> CoordinationResult<Option<F::Output>> {
        self.store
            .get(&self.source_identifier, GLOBAL_STATE_PARTITION_TYPE, partition_key)
            .await?
            .map(|record| self.factory.build(record))
            .transpose()
    }

    pub async fn get_global_state(&self, partition_key: &str) -> CoordinationResult<Option<GlobalState>> {
        self.store
            .get(&self.source_identifier, GLOBAL_STATE_PARTITION_TYPE, partition_key)
            .await?
            .map(GlobalState::from_record)
            .transpose()
    }

    /// Partitions of a type completed at or after `since`.
    pub async fn query_completed_partitions(
        &self,
        partition_type: &str,
        since: DateTime<Utc>,
    ) -> CoordinationResult<Vec<F::Output>> {
        self.store
            .query_by_status(
                &self.source_identifier,
                partition_type,
                PartitionStatus::Completed,
                Some(since),
            )
            .await?
            .into_iter()
            .map(|record| self.factory.build(record))
            .collect()
    }

    /// Every partition of a type, oldest first.
    pub async fn query_all_partitions(&self, partition_type: &str) -> CoordinationResult<Vec<F::Output>> {
        self.store
            .query_all(&self.source_identifier, partition_type)
            .await?
            .into_iter()
            .map(|record| self.factory.build(record))
            .collect()
    }
}
