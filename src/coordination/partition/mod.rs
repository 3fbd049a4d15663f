//! Typed partitions.
//!
//! A typed partition is a store record plus its deserialized progress state.
//! Two traits describe them:
//!
//! - [`SourcePartition`]: implemented by each concrete kind. Fixes the type
//!   tag, the progress schema and how the key is derived.
//! - [`CoordinatedPartition`]: the object-safe view the coordinator works
//!   with. Blanket-implemented for every `SourcePartition` and implemented by
//!   [`AnyPartition`] through delegation.
//!
//! Connectors add their own kinds by implementing `SourcePartition` and a
//! [`PartitionFactory`] over their own sum type.

mod data_query;
mod export;
mod factory;
mod global;
mod leader;
mod stream;

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{CoordinationError, CoordinationResult};
use super::record::PartitionRecord;

pub use data_query::{DataQueryPartition, DataQueryProgressState};
pub use export::{ExportPartition, ExportProgressState};
pub use factory::{AnyPartition, DefaultPartitionFactory, FromAnyPartition, PartitionFactory};
pub use global::GlobalState;
pub use leader::{LeaderPartition, LeaderProgressState};
pub use stream::{StreamCheckpoint, StreamPartition, StreamProgressState};

/// Progress and backing record shared by every typed partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionState<P> {
    pub progress: Option<P>,
    /// `None` until the partition has been created in or read from the store.
    pub record: Option<PartitionRecord>,
}

impl<P> Default for PartitionState<P> {
    fn default() -> Self {
        Self {
            progress: None,
            record: None,
        }
    }
}

impl<P: DeserializeOwned> PartitionState<P> {
    pub fn new(progress: Option<P>) -> Self {
        Self {
            progress,
            record: None,
        }
    }

    /// Rebuild from a stored record, deserializing its progress blob.
    pub fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        let progress = record
            .progress_state
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Self {
            progress,
            record: Some(record),
        })
    }
}

/// A concrete partition kind with a typed progress schema.
pub trait SourcePartition: Sized + Send + Sync {
    /// Progress schema. Must never change shape for a given type tag.
    type Progress: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    /// Type tag stored in `partitionType`.
    const PARTITION_TYPE: &'static str;

    /// Whether records of this kind carry a status and can be leased.
    const LEASED: bool = true;

    /// Partition key derived from this partition's identity.
    fn key(&self) -> String;

    fn state(&self) -> &PartitionState<Self::Progress>;

    fn state_mut(&mut self) -> &mut PartitionState<Self::Progress>;

    /// Rebuild the typed partition from a stored record.
    fn from_record(record: PartitionRecord) -> CoordinationResult<Self>;

    fn progress(&self) -> Option<&Self::Progress> {
        self.state().progress.as_ref()
    }

    fn progress_mut(&mut self) -> Option<&mut Self::Progress> {
        self.state_mut().progress.as_mut()
    }

    fn set_progress(&mut self, progress: Self::Progress) {
        self.state_mut().progress = Some(progress);
    }
}

/// Type-erased partition as seen by the coordinator.
pub trait CoordinatedPartition: Send + Sync {
    fn partition_type(&self) -> &str;

    fn partition_key(&self) -> String;

    /// Current progress serialized for the store.
    fn serialized_progress(&self) -> CoordinationResult<Option<String>>;

    fn record(&self) -> Option<&PartitionRecord>;

    fn record_mut(&mut self) -> Option<&mut PartitionRecord>;

    fn is_leased(&self) -> bool {
        true
    }
}

impl<T: SourcePartition> CoordinatedPartition for T {
    fn partition_type(&self) -> &str {
        T::PARTITION_TYPE
    }

    fn partition_key(&self) -> String {
        self.key()
    }

    fn serialized_progress(&self) -> CoordinationResult<Option<String>> {
        self.state()
            .progress
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(Into::into)
    }

    fn record(&self) -> Option<&PartitionRecord> {
        self.state().record.as_ref()
    }

    fn record_mut(&mut self) -> Option<&mut PartitionRecord> {
        self.state_mut().record.as_mut()
    }

    fn is_leased(&self) -> bool {
        T::LEASED
    }
}

/// Reject a record whose type tag does not match the kind being built.
pub(crate) fn expect_type(record: &PartitionRecord, expected: &str) -> CoordinationResult<()> {
    if record.partition_type == expected {
        Ok(())
    } else {
        Err(CoordinationError::UnsupportedPartitionType(
            record.partition_type.clone(),
        ))
    }
}

pub(crate) fn invalid_key(partition_type: &str, partition_key: &str, reason: &str) -> CoordinationError {
    CoordinationError::InvalidPartitionKey {
        partition_type: partition_type.to_string(),
        partition_key: partition_key.to_string(),
        reason: reason.to_string(),
    }
}
