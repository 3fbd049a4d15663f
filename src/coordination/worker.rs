//! Generic acquire-process-release loop for one partition kind.
//!
//! A [`PartitionWorker`] owns no partition between iterations. Each pass
//! acquires at most one partition of `P`, hands it to a
//! [`PartitionProcessor`] and applies the returned [`PartitionOutcome`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::background_tasks::{BackgroundTaskRegistry, ShutdownSignal};
use super::config::WorkerConfig;
use super::error::CoordinationResult;
use super::partition::{CoordinatedPartition, DefaultPartitionFactory, PartitionFactory, SourcePartition};
use super::source_coordinator::SourceCoordinator;

/// What to do with a partition once processing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Finished for good.
    Completed,
    /// Nothing more to do for now; reopen after the delay.
    Closed { reopen_after: Duration },
    /// Hand it back immediately.
    Released,
}

/// Connector logic for one partition kind.
///
/// Long-running processors should call
/// [`SourceCoordinator::save_progress`] often enough to keep the lease alive.
/// A lost conditional write means another node owns the partition and the
/// processor must stop.
#[async_trait]
pub trait PartitionProcessor<P, F = DefaultPartitionFactory>: Send + Sync
where
    P: SourcePartition,
    F: PartitionFactory,
{
    async fn process(
        &self,
        partition: &mut P,
        coordinator: &SourceCoordinator<F>,
    ) -> CoordinationResult<PartitionOutcome>;
}

pub struct PartitionWorker<P, R, F: PartitionFactory = DefaultPartitionFactory> {
    coordinator: Arc<SourceCoordinator<F>>,
    processor: R,
    config: WorkerConfig,
    _partition: PhantomData<fn() -> P>,
}

impl<P, R, F> PartitionWorker<P, R, F>
where
    P: SourcePartition,
    R: PartitionProcessor<P, F>,
    F: PartitionFactory,
{
    pub fn new(coordinator: Arc<SourceCoordinator<F>>, processor: R, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            processor,
            config,
            _partition: PhantomData,
        }
    }

    pub fn processor(&self) -> &R {
        &self.processor
    }

    /// Acquire and process at most one partition.
    ///
    /// Returns `Ok(false)` when nothing was available. A processor error
    /// gives the partition up and is then returned.
    pub async fn run_once(&self) -> CoordinationResult<bool> {
        let Some(mut partition) = self.coordinator.acquire::<P>(self.config.lease_duration).await? else {
            return Ok(false);
        };

        let partition_key = partition.partition_key();
        match self.processor.process(&mut partition, &self.coordinator).await {
            Ok(outcome) => {
                self.apply(&mut partition, outcome).await?;
                debug!(
                    partition_type = P::PARTITION_TYPE,
                    partition_key = %partition_key,
                    ?outcome,
                    "Processed partition"
                );
                Ok(true)
            }
            Err(e) if e.is_conditional_write_lost() => {
                warn!(
                    partition_type = P::PARTITION_TYPE,
                    partition_key = %partition_key,
                    "Partition taken over during processing"
                );
                Ok(true)
            }
            Err(e) => {
                if let Err(give_up_err) = self.coordinator.give_up_partition(&mut partition).await {
                    warn!(
                        partition_type = P::PARTITION_TYPE,
                        partition_key = %partition_key,
                        error = %give_up_err,
                        "Failed to give up partition after processing error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, partition: &mut P, outcome: PartitionOutcome) -> CoordinationResult<()> {
        match outcome {
            PartitionOutcome::Completed => self.coordinator.complete_partition(partition).await,
            PartitionOutcome::Closed { reopen_after } => match self.config.max_closed_count {
                Some(max) => {
                    self.coordinator
                        .close_partition_with_limit(partition, reopen_after, max)
                        .await
                }
                None => self.coordinator.close_partition(partition, reopen_after).await,
            },
            PartitionOutcome::Released => self.coordinator.give_up_partition(partition).await,
        }
    }

    /// Loop until `shutdown` fires.
    ///
    /// After a pass that found work the next pass starts right away;
    /// otherwise the worker sleeps for the jittered poll interval.
    pub async fn run(self, shutdown: ShutdownSignal) {
        debug!(
            partition_type = P::PARTITION_TYPE,
            owner_id = %self.coordinator.owner_id(),
            "Partition worker started"
        );

        while !shutdown.is_shutdown() {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if e.is_fatal() => {
                    error!(partition_type = P::PARTITION_TYPE, error = %e, "Partition worker iteration failed");
                }
                Err(e) => {
                    warn!(partition_type = P::PARTITION_TYPE, error = %e, "Partition worker iteration failed");
                }
            }

            if !shutdown.sleep(self.config.jittered_poll_interval()).await {
                break;
            }
        }

        debug!(partition_type = P::PARTITION_TYPE, "Partition worker stopped");
    }
}

impl<P, R, F> PartitionWorker<P, R, F>
where
    P: SourcePartition + 'static,
    R: PartitionProcessor<P, F> + 'static,
    F: PartitionFactory + 'static,
{
    /// Run this worker as a named task on `registry`.
    pub fn spawn_on(self, registry: &mut BackgroundTaskRegistry, name: &'static str) {
        registry.spawn(name, move |shutdown| self.run(shutdown));
    }
}
