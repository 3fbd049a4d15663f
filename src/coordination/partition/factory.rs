//! Dispatch from raw records to typed partitions.

use super::{
    CoordinatedPartition, DataQueryPartition, ExportPartition, GlobalState, LeaderPartition,
    SourcePartition, StreamPartition,
};
use crate::constants::{
    DATA_QUERY_PARTITION_TYPE, EXPORT_PARTITION_TYPE, GLOBAL_STATE_PARTITION_TYPE,
    LEADER_PARTITION_TYPE, STREAM_PARTITION_TYPE,
};
use crate::coordination::error::{CoordinationError, CoordinationResult};
use crate::coordination::record::PartitionRecord;

/// Builds typed partitions from store records.
///
/// Implementations inspect `partition_type` and must fail with
/// [`CoordinationError::UnsupportedPartitionType`] for tags they do not know.
pub trait PartitionFactory: Send + Sync {
    type Output: CoordinatedPartition;

    fn build(&self, record: PartitionRecord) -> CoordinationResult<Self::Output>;
}

/// Every built-in partition kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPartition {
    Leader(LeaderPartition),
    GlobalState(GlobalState),
    Export(ExportPartition),
    Stream(StreamPartition),
    DataQuery(DataQueryPartition),
}

macro_rules! delegate {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            AnyPartition::Leader($p) => $body,
            AnyPartition::GlobalState($p) => $body,
            AnyPartition::Export($p) => $body,
            AnyPartition::Stream($p) => $body,
            AnyPartition::DataQuery($p) => $body,
        }
    };
}

impl CoordinatedPartition for AnyPartition {
    fn partition_type(&self) -> &str {
        delegate!(self, p => p.partition_type())
    }

    fn partition_key(&self) -> String {
        delegate!(self, p => p.partition_key())
    }

    fn serialized_progress(&self) -> CoordinationResult<Option<String>> {
        delegate!(self, p => p.serialized_progress())
    }

    fn record(&self) -> Option<&PartitionRecord> {
        delegate!(self, p => p.record())
    }

    fn record_mut(&mut self) -> Option<&mut PartitionRecord> {
        delegate!(self, p => p.record_mut())
    }

    fn is_leased(&self) -> bool {
        delegate!(self, p => p.is_leased())
    }
}

/// Typed extraction from [`AnyPartition`].
pub trait FromAnyPartition: Sized {
    fn from_any(any: AnyPartition) -> Option<Self>;
}

macro_rules! from_any {
    ($ty:ty, $variant:ident) => {
        impl FromAnyPartition for $ty {
            fn from_any(any: AnyPartition) -> Option<Self> {
                match any {
                    AnyPartition::$variant(p) => Some(p),
                    _ => None,
                }
            }
        }

        impl From<$ty> for AnyPartition {
            fn from(p: $ty) -> Self {
                AnyPartition::$variant(p)
            }
        }
    };
}

from_any!(LeaderPartition, Leader);
from_any!(GlobalState, GlobalState);
from_any!(ExportPartition, Export);
from_any!(StreamPartition, Stream);
from_any!(DataQueryPartition, DataQuery);

/// Factory for the built-in kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitionFactory;

impl PartitionFactory for DefaultPartitionFactory {
    type Output = AnyPartition;

    fn build(&self, record: PartitionRecord) -> CoordinationResult<AnyPartition> {
        match record.partition_type.as_str() {
            LEADER_PARTITION_TYPE => LeaderPartition::from_record(record).map(Into::into),
            GLOBAL_STATE_PARTITION_TYPE => GlobalState::from_record(record).map(Into::into),
            EXPORT_PARTITION_TYPE => ExportPartition::from_record(record).map(Into::into),
            STREAM_PARTITION_TYPE => StreamPartition::from_record(record).map(Into::into),
            DATA_QUERY_PARTITION_TYPE => DataQueryPartition::from_record(record).map(Into::into),
            other => Err(CoordinationError::UnsupportedPartitionType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(partition_type: &str, key: &str, progress: Option<&str>) -> PartitionRecord {
        PartitionRecord::unassigned("src", partition_type, key, progress.map(String::from), Utc::now())
    }

    #[test]
    fn test_dispatch_by_type() {
        let factory = DefaultPartitionFactory;

        let built = factory
            .build(record("STREAM", "db.orders", Some(r#"{"startTime":1}"#)))
            .unwrap();
        assert!(matches!(built, AnyPartition::Stream(_)));
        assert_eq!(built.partition_key(), "db.orders");

        let built = factory
            .build(record("LEADER", "GLOBAL", Some(r#"{"initialized":false}"#)))
            .unwrap();
        assert!(matches!(built, AnyPartition::Leader(_)));

        let built = factory.build(record("DATA_QUERY", "db.orders|q", None)).unwrap();
        assert!(DataQueryPartition::from_any(built).is_some());
    }

    #[test]
    fn test_unknown_type_fails_fast() {
        let err = DefaultPartitionFactory
            .build(record("SHARD", "k", None))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnsupportedPartitionType(ref t) if t == "SHARD"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bad_progress_is_serde_error() {
        let err = DefaultPartitionFactory
            .build(record("STREAM", "db.orders", Some("{not json")))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Serde(_)));
    }

    #[test]
    fn test_from_any_wrong_variant() {
        let any = AnyPartition::from(LeaderPartition::new());
        assert!(StreamPartition::from_any(any).is_none());
    }
}
