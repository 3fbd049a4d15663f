//! Export fan-out and the shared load-status counters.
//!
//! The leader creates one [`ExportPartition`] per collection. Whoever acquires
//! it runs the [`ExportScheduler`]: it pages through query identifiers from an
//! [`ExportPartitionSupplier`], creates one [`DataQueryPartition`] per
//! identifier and records the running total on the `EXPORT-{collection}`
//! [`GlobalState`](super::partition::GlobalState). Data query workers report back through [`record_loaded`].
//!
//! Counter updates are read-modify-write on a record any node may touch, so
//! they retry lost conditional writes with
//! [`with_conditional_update_policy`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::error::{CoordinationError, CoordinationResult};
use super::partition::{
    DataQueryPartition, ExportPartition, PartitionFactory, SourcePartition,
};
use super::retry::with_conditional_update_policy;
use super::source_coordinator::SourceCoordinator;
use super::worker::{PartitionOutcome, PartitionProcessor};
use crate::constants::EXPORT_STATUS_KEY_PREFIX;

/// Key of the load-status record for `collection`.
pub fn export_status_key(collection: &str) -> String {
    format!("{EXPORT_STATUS_KEY_PREFIX}{collection}")
}

/// Progress of one collection's export, stored as a global state map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadStatus {
    pub total_partitions: u64,
    pub loaded_partitions: u64,
    pub loaded_records: u64,
    /// Epoch millis of the last counter change.
    pub last_update_timestamp: i64,
    /// Set once the scheduler has seen the last identifier batch.
    pub total_partitions_complete: bool,
}

impl LoadStatus {
    /// Zeroed counters stamped with `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_update_timestamp: now.timestamp_millis(),
            ..Default::default()
        }
    }

    pub fn to_map(&self) -> CoordinationResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CoordinationError::Storage(format!(
                "load status serialized to a non-object: {other}"
            ))),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> CoordinationResult<Self> {
        Ok(serde_json::from_value(Value::Object(map.clone()))?)
    }

    /// True once every planned data query partition has been loaded.
    pub fn is_fully_loaded(&self) -> bool {
        self.total_partitions_complete && self.loaded_partitions >= self.total_partitions
    }
}

/// One page of query identifiers for an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionIdentifierBatch {
    pub identifiers: Vec<String>,
    pub is_last_batch: bool,
    /// Cursor to pass back for the next page.
    pub end_doc_id: Option<String>,
}

/// Connector hook that splits an export into query identifiers.
///
/// Each identifier becomes the key of a [`DataQueryPartition`] and must
/// start with `{collection}|`.
#[async_trait]
pub trait ExportPartitionSupplier: Send + Sync {
    async fn next_batch(
        &self,
        partition: &ExportPartition,
        start_after: Option<&str>,
    ) -> CoordinationResult<PartitionIdentifierBatch>;
}

/// Processes acquired [`ExportPartition`]s into data query partitions.
pub struct ExportScheduler<S> {
    supplier: S,
}

impl<S: ExportPartitionSupplier> ExportScheduler<S> {
    pub fn new(supplier: S) -> Self {
        Self { supplier }
    }

    pub fn supplier(&self) -> &S {
        &self.supplier
    }

    async fn create_data_queries<F: PartitionFactory>(
        &self,
        coordinator: &SourceCoordinator<F>,
        collection: &str,
        identifiers: &[String],
    ) -> CoordinationResult<u64> {
        let mut created = 0;
        let start_time = coordinator.now();
        for identifier in identifiers {
            let query = identifier
                .strip_prefix(collection)
                .and_then(|rest| rest.strip_prefix('|'))
                .unwrap_or(identifier);
            let partition = DataQueryPartition::new(collection, query).with_start_time(start_time);
            if coordinator.create_partition(&partition).await? {
                created += 1;
            }
        }
        Ok(created)
    }
}

#[async_trait]
impl<S, F> PartitionProcessor<ExportPartition, F> for ExportScheduler<S>
where
    S: ExportPartitionSupplier,
    F: PartitionFactory,
{
    async fn process(
        &self,
        partition: &mut ExportPartition,
        coordinator: &SourceCoordinator<F>,
    ) -> CoordinationResult<PartitionOutcome> {
        let collection = partition.collection().to_string();
        let mut cursor: Option<String> = None;

        loop {
            let batch = self.supplier.next_batch(partition, cursor.as_deref()).await?;
            let created = self
                .create_data_queries(coordinator, &collection, &batch.identifiers)
                .await?;

            // No cursor means the supplier cannot page further.
            let finished = batch.is_last_batch || batch.end_doc_id.is_none();
            if finished && !batch.is_last_batch {
                warn!(
                    collection = %collection,
                    "Supplier returned no cursor before the last batch, ending export"
                );
            }

            update_load_status(coordinator, &collection, |status| {
                status.total_partitions += created;
                if finished {
                    status.total_partitions_complete = true;
                }
            })
            .await?;

            coordinator.save_progress(partition, None).await?;

            debug!(
                collection = %collection,
                created,
                is_last_batch = batch.is_last_batch,
                "Created data query partitions"
            );

            if finished {
                break;
            }
            cursor = batch.end_doc_id;
        }

        info!(collection = %collection, "Export partition planning finished");
        Ok(PartitionOutcome::Completed)
    }
}

/// Count one finished data query partition and its records.
pub async fn record_loaded<F: PartitionFactory>(
    coordinator: &SourceCoordinator<F>,
    collection: &str,
    records: u64,
) -> CoordinationResult<()> {
    update_load_status(coordinator, collection, |status| {
        status.loaded_partitions += 1;
        status.loaded_records += records;
    })
    .await
}

/// Read-modify-write on the load-status record, retrying lost writes.
///
/// A missing record is logged and skipped.
async fn update_load_status<F, C>(
    coordinator: &SourceCoordinator<F>,
    collection: &str,
    change: C,
) -> CoordinationResult<()>
where
    F: PartitionFactory,
    C: Fn(&mut LoadStatus),
{
    let key = &export_status_key(collection);
    let change = &change;
    with_conditional_update_policy(|| async move {
        let key = key.as_str();
        let Some(mut state) = coordinator.get_global_state(key).await? else {
            error!(partition_key = %key, "Load status record not found, skipping counter update");
            return Ok::<(), CoordinationError>(());
        };

        let mut status = LoadStatus::from_map(&state.values())?;
        change(&mut status);
        status.last_update_timestamp = coordinator.now().timestamp_millis();
        state.set_progress(status.to_map()?);
        coordinator.save_progress(&mut state, None).await?;
        debug!(partition_key = %key, ?status, "Updated load status");
        Ok(())
    })
    .await
}
