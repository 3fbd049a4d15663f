//! Partition store over `object_store`.
//!
//! Each record is one JSON object at
//! `{root}/{sourceIdentifier}/{partitionType}/{partitionKey}.json`.
//!
//! - Create uses `PutMode::Create`, which fails if the object exists.
//! - Update and acquire use `PutMode::Update` with the e-tag/version read
//!   alongside the record, so a concurrent writer makes the put fail with a
//!   precondition error.
//!
//! Exclusivity is exactly what the underlying store's conditional put
//! guarantees. S3 and the in-memory store support it; the local filesystem
//! supports create but rejects every update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutPayload, UpdateVersion};
use tracing::{debug, info};

use super::clock::{SharedClock, SystemClock, after};
use super::config::{CoordinationConfig, StoreType};
use super::error::{CoordinationError, CoordinationResult};
use super::memory_store::InMemoryPartitionStore;
use super::record::{PartitionRecord, PartitionStatus};
use super::traits::{PartitionStore, matches_status, rank_candidates};

/// Create an object store from configuration.
///
/// [`StoreType::Memory`] yields an `object_store` in-memory store; callers
/// wanting the lock-based [`InMemoryPartitionStore`] should use
/// [`create_partition_store`] instead.
pub fn create_object_store(config: &CoordinationConfig) -> CoordinationResult<Arc<dyn ObjectStore>> {
    match &config.store {
        StoreType::Memory => Ok(Arc::new(InMemory::new())),
        StoreType::Local { path } => {
            std::fs::create_dir_all(path).map_err(|e| {
                CoordinationError::Config(format!("Failed to create data directory: {}", e))
            })?;

            let store = LocalFileSystem::new_with_prefix(path)?;
            info!(path = %path, "Using local filesystem object store");
            Ok(Arc::new(store))
        }
        StoreType::S3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
        } => {
            use object_store::aws::{AmazonS3Builder, S3ConditionalPut};

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(region)
                .with_conditional_put(S3ConditionalPut::ETagMatch);

            if let Some(ep) = endpoint {
                builder = builder.with_endpoint(ep).with_allow_http(true);
            }

            if let (Some(key), Some(secret)) = (access_key_id, secret_access_key) {
                builder = builder
                    .with_access_key_id(key)
                    .with_secret_access_key(secret);
            }

            let store = builder.build().map_err(|e| {
                CoordinationError::Config(format!("Failed to create S3 object store: {}", e))
            })?;

            info!(bucket = %bucket, region = %region, "Using S3 object store");
            Ok(Arc::new(store))
        }
    }
}

/// Build the partition store selected by `config`.
pub fn create_partition_store(
    config: &CoordinationConfig,
    clock: SharedClock,
) -> CoordinationResult<Arc<dyn PartitionStore>> {
    match config.store {
        StoreType::Memory => Ok(Arc::new(InMemoryPartitionStore::with_clock(clock))),
        _ => {
            let store = create_object_store(config)?;
            Ok(Arc::new(
                ObjectStorePartitionStore::new(store, &config.store_root).with_clock(clock),
            ))
        }
    }
}

/// A record together with the object version it was read at.
struct Versioned {
    record: PartitionRecord,
    version: UpdateVersion,
}

#[derive(Debug, Clone)]
pub struct ObjectStorePartitionStore {
    store: Arc<dyn ObjectStore>,
    root: Path,
    clock: SharedClock,
}

impl ObjectStorePartitionStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: &str) -> Self {
        Self {
            store,
            root: Path::from(root),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn type_prefix(&self, source_identifier: &str, partition_type: &str) -> Path {
        self.root.child(source_identifier).child(partition_type)
    }

    fn record_path(&self, source_identifier: &str, partition_type: &str, partition_key: &str) -> Path {
        self.type_prefix(source_identifier, partition_type)
            .child(format!("{partition_key}.json"))
    }

    fn path_of(&self, record: &PartitionRecord) -> Path {
        self.record_path(
            &record.source_identifier,
            &record.partition_type,
            &record.partition_key,
        )
    }

    async fn read(&self, path: &Path) -> CoordinationResult<Option<Versioned>> {
        match self.store.get(path).await {
            Ok(result) => {
                let version = UpdateVersion {
                    e_tag: result.meta.e_tag.clone(),
                    version: result.meta.version.clone(),
                };
                let bytes = result.bytes().await?;
                let record = serde_json::from_slice(&bytes)?;
                Ok(Some(Versioned { record, version }))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every record of a type with the object version it was read at.
    async fn read_all(
        &self,
        source_identifier: &str,
        partition_type: &str,
    ) -> CoordinationResult<Vec<Versioned>> {
        let prefix = self.type_prefix(source_identifier, partition_type);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut found = Vec::with_capacity(metas.len());
        for meta in metas {
            // Deleted between list and get.
            if let Some(versioned) = self.read(&meta.location).await?
                && versioned.record.source_identifier == source_identifier
                && versioned.record.partition_type == partition_type
            {
                found.push(versioned);
            }
        }
        found.sort_by(|a, b| a.record.created_at.cmp(&b.record.created_at));
        Ok(found)
    }

    /// Conditionally overwrite the object. `Ok(false)` means another writer
    /// got there first.
    async fn put_if_unchanged(
        &self,
        record: &PartitionRecord,
        version: UpdateVersion,
    ) -> CoordinationResult<bool> {
        let payload = PutPayload::from(serde_json::to_vec(record)?);
        match self
            .store
            .put_opts(&self.path_of(record), payload, PutMode::Update(version).into())
            .await
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PartitionStore for ObjectStorePartitionStore {
    async fn initialize(&self) -> CoordinationResult<()> {
        // Surfaces credential and connectivity problems before the first lease.
        let mut listing = self.store.list(Some(&self.root));
        listing.try_next().await?;
        debug!(root = %self.root, "Object store partition store initialized");
        Ok(())
    }

    async fn get(
        &self,
        source_identifier: &str,
        partition_type: &str,
        partition_key: &str,
    ) -> CoordinationResult<Option<PartitionRecord>> {
        let path = self.record_path(source_identifier, partition_type, partition_key);
        Ok(self.read(&path).await?.map(|v| v.record))
    }

    async fn try_create(&self, mut record: PartitionRecord) -> CoordinationResult<bool> {
        record.version = 1;
        let payload = PutPayload::from(serde_json::to_vec(&record)?);
        match self
            .store
            .put_opts(&self.path_of(&record), payload, PutMode::Create.into())
            .await
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_update(&self, record: &mut PartitionRecord) -> CoordinationResult<()> {
        let Some(current) = self.read(&self.path_of(record)).await? else {
            return Err(CoordinationError::write_lost(record));
        };
        if current.record.version != record.version {
            return Err(CoordinationError::write_lost(record));
        }

        let mut next = record.clone();
        next.version += 1;
        if !self.put_if_unchanged(&next, current.version).await? {
            return Err(CoordinationError::write_lost(record));
        }
        *record = next;
        Ok(())
    }

    async fn try_acquire_available(
        &self,
        source_identifier: &str,
        partition_type: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> CoordinationResult<Option<PartitionRecord>> {
        let all = self.read_all(source_identifier, partition_type).await?;
        let now = self.clock.now();

        let ranked = rank_candidates(all.iter().map(|v| &v.record), now);
        for candidate in ranked {
            let Some(versioned) = all
                .iter()
                .find(|v| v.record.partition_key == candidate.partition_key)
            else {
                continue;
            };

            let mut claimed = candidate.clone();
            claimed.assign(owner_id, after(now, lease_duration));
            claimed.version += 1;

            if self
                .put_if_unchanged(&claimed, versioned.version.clone())
                .await?
            {
                return Ok(Some(claimed));
            }
            debug!(
                partition_type,
                partition_key = %candidate.partition_key,
                "Lost acquire race, trying next candidate"
            );
        }
        Ok(None)
    }

    async fn query_by_status(
        &self,
        source_identifier: &str,
        partition_type: &str,
        status: PartitionStatus,
        completed_since: Option<DateTime<Utc>>,
    ) -> CoordinationResult<Vec<PartitionRecord>> {
        Ok(self
            .read_all(source_identifier, partition_type)
            .await?
            .into_iter()
            .map(|v| v.record)
            .filter(|r| matches_status(r, status, completed_since))
            .collect())
    }

    async fn query_all(
        &self,
        source_identifier: &str,
        partition_type: &str,
    ) -> CoordinationResult<Vec<PartitionRecord>> {
        Ok(self
            .read_all(source_identifier, partition_type)
            .await?
            .into_iter()
            .map(|v| v.record)
            .collect())
    }
}
