//! Singleton leader election and one-time partition bootstrap.
//!
//! Every node runs a [`LeaderScheduler`] per source. They all compete for the
//! single `LEADER` partition; the winner creates the per-collection
//! partitions once and then keeps its lease alive by saving progress with an
//! extension longer than its poll interval. Losers just poll.
//!
//! Leadership is advisory. If the leader's renewal loses a conditional write
//! it drops leadership locally and goes back to competing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::background_tasks::{BackgroundTaskRegistry, ShutdownSignal};
use super::config::LeaderSchedulerConfig;
use super::error::{CoordinationError, CoordinationResult};
use super::export::{LoadStatus, export_status_key};
use super::partition::{
    DefaultPartitionFactory, ExportPartition, GlobalState, LeaderPartition, PartitionFactory,
    StreamPartition, StreamProgressState,
};
use super::source_coordinator::SourceCoordinator;

/// Export settings for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    /// Documents per data query partition.
    pub partition_size: u64,
}

/// What the leader bootstraps for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    /// `{database}.{collection}`.
    pub collection: String,
    #[serde(default)]
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub stream: bool,
}

impl CollectionConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            export: None,
            stream: false,
        }
    }

    pub fn with_export(mut self, partition_size: u64) -> Self {
        self.export = Some(ExportConfig { partition_size });
        self
    }

    pub fn with_stream(mut self) -> Self {
        self.stream = true;
        self
    }

    fn to_map(&self) -> CoordinationResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CoordinationError::Config(format!(
                "collection config serialized to a non-object: {other}"
            ))),
        }
    }
}

/// Field of the collection config record holding the pinned snapshot time.
const SNAPSHOT_TIME_FIELD: &str = "snapshotTime";

/// Keys carry export times in millis; drop anything finer.
fn truncate_to_millis(time: DateTime<Utc>) -> CoordinationResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).ok_or_else(|| {
        CoordinationError::Config(format!("snapshot time {time} is out of range"))
    })
}

pub struct LeaderScheduler<F: PartitionFactory = DefaultPartitionFactory> {
    coordinator: Arc<SourceCoordinator<F>>,
    collections: Vec<CollectionConfig>,
    config: LeaderSchedulerConfig,
    leader: Option<LeaderPartition>,
    leader_created: bool,
}

impl<F: PartitionFactory> LeaderScheduler<F> {
    pub fn new(
        coordinator: Arc<SourceCoordinator<F>>,
        collections: Vec<CollectionConfig>,
        config: LeaderSchedulerConfig,
    ) -> Self {
        Self {
            coordinator,
            collections,
            config,
            leader: None,
            leader_created: false,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_some()
    }

    pub fn leader_partition(&self) -> Option<&LeaderPartition> {
        self.leader.as_ref()
    }

    /// One scheduling pass without the trailing sleep.
    ///
    /// Acquisition and bootstrap errors are logged and swallowed. A held
    /// lease is renewed even when bootstrap failed.
    pub async fn run_once(&mut self) {
        if let Err(e) = self.lead().await {
            error!(
                owner_id = %self.coordinator.owner_id(),
                error = %e,
                "Leader scheduling pass failed"
            );
        }
        self.renew().await;
    }

    /// Loop until `shutdown` fires, then give up leadership if held.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        debug!(owner_id = %self.coordinator.owner_id(), "Leader scheduler started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            self.run_once().await;
            if !shutdown.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!(owner_id = %self.coordinator.owner_id(), "Quitting leader scheduler");
        self.step_down().await;
    }

    /// Give up the leader partition if this node holds it.
    pub async fn step_down(&mut self) {
        let Some(mut leader) = self.leader.take() else {
            return;
        };
        if let Err(e) = self.coordinator.give_up_partition(&mut leader).await {
            warn!(
                owner_id = %self.coordinator.owner_id(),
                error = %e,
                "Failed to give up leader partition"
            );
        }
    }

    async fn lead(&mut self) -> CoordinationResult<()> {
        if !self.leader_created {
            self.coordinator.create_partition(&LeaderPartition::new()).await?;
            self.leader_created = true;
        }

        if self.leader.is_none()
            && let Some(leader) = self.coordinator.acquire::<LeaderPartition>(None).await?
        {
            info!(owner_id = %self.coordinator.owner_id(), "Running as leader");
            self.leader = Some(leader);
        }

        let needs_init = self.leader.as_ref().is_some_and(|l| !l.is_initialized());
        if needs_init {
            self.initialize_partitions().await?;
            if let Some(leader) = self.leader.as_mut() {
                leader.mark_initialized();
            }
        }
        Ok(())
    }

    /// Create every collection's partitions. Safe to repeat: existing
    /// records are left untouched and the snapshot time recorded by the
    /// first attempt is reused.
    async fn initialize_partitions(&self) -> CoordinationResult<()> {
        let candidate = truncate_to_millis(self.coordinator.now())?;

        for collection in &self.collections {
            let name = collection.collection.as_str();
            let snapshot = self.pin_snapshot(collection, candidate).await?;

            if let Some(export) = collection.export {
                self.coordinator
                    .create_partition(&ExportPartition::new(name, export.partition_size, snapshot))
                    .await?;
                self.coordinator
                    .create_partition(&GlobalState::new(
                        export_status_key(name),
                        LoadStatus::new(snapshot).to_map()?,
                    ))
                    .await?;
            }

            if collection.stream {
                let progress = StreamProgressState {
                    start_time: snapshot.timestamp_millis(),
                    resume_token: None,
                    checkpoint: None,
                    wait_for_export: collection.export.is_some(),
                };
                self.coordinator
                    .create_partition(&StreamPartition::new(name, progress))
                    .await?;
            }

            debug!(
                collection = %name,
                snapshot_millis = snapshot.timestamp_millis(),
                export = collection.export.is_some(),
                stream = collection.stream,
                "Initialized collection partitions"
            );
        }

        info!(collections = self.collections.len(), "Leader initialization complete");
        Ok(())
    }

    /// Create the collection's config record carrying `candidate` as its
    /// snapshot time, or read back the snapshot an earlier attempt stored.
    async fn pin_snapshot(
        &self,
        collection: &CollectionConfig,
        candidate: DateTime<Utc>,
    ) -> CoordinationResult<DateTime<Utc>> {
        let name = collection.collection.as_str();
        let mut config = collection.to_map()?;
        config.insert(
            SNAPSHOT_TIME_FIELD.to_string(),
            Value::from(candidate.timestamp_millis()),
        );

        if self
            .coordinator
            .create_partition(&GlobalState::new(name, config))
            .await?
        {
            return Ok(candidate);
        }

        let stored = self
            .coordinator
            .get_global_state(name)
            .await?
            .and_then(|state| state.get(SNAPSHOT_TIME_FIELD).and_then(Value::as_i64));
        match stored.and_then(DateTime::from_timestamp_millis) {
            Some(snapshot) => Ok(snapshot),
            None => {
                warn!(collection = %name, "Collection config has no snapshot time, using now");
                Ok(candidate)
            }
        }
    }

    async fn renew(&mut self) {
        let Some(leader) = self.leader.as_mut() else {
            return;
        };

        match self
            .coordinator
            .save_progress(leader, Some(self.config.lease_extension))
            .await
        {
            Ok(()) => {
                debug!(
                    owner_id = %self.coordinator.owner_id(),
                    extension_secs = self.config.lease_extension.as_secs(),
                    "Renewed leader lease"
                );
            }
            Err(e) if e.is_conditional_write_lost() => {
                warn!(owner_id = %self.coordinator.owner_id(), "Lost leadership");
                self.leader = None;
            }
            Err(e) => {
                error!(
                    owner_id = %self.coordinator.owner_id(),
                    error = %e,
                    "Failed to renew leader lease"
                );
            }
        }
    }
}

impl<F: PartitionFactory + 'static> LeaderScheduler<F> {
    /// Run this scheduler as a named task on `registry`.
    pub fn spawn_on(self, registry: &mut BackgroundTaskRegistry, name: &'static str) {
        registry.spawn(name, move |shutdown| self.run(shutdown));
    }
}
