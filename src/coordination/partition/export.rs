use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PartitionState, SourcePartition, expect_type, invalid_key};
use crate::constants::{EXPORT_PARTITION_TYPE, KEY_SEPARATOR};
use crate::coordination::error::CoordinationResult;
use crate::coordination::record::PartitionRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgressState {
    pub database_name: String,
    pub collection_name: String,
    /// Snapshot time, ISO-8601 on the wire.
    pub export_time: DateTime<Utc>,
}

/// One-time snapshot export of a collection.
///
/// Key: `{collection}|{partitionSize}|{exportTimeMillis}`. Both parameters
/// are recoverable from the key alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPartition {
    collection: String,
    partition_size: u64,
    export_time: DateTime<Utc>,
    state: PartitionState<ExportProgressState>,
}

impl ExportPartition {
    /// `collection` is `{database}.{collection}`.
    pub fn new(collection: impl Into<String>, partition_size: u64, export_time: DateTime<Utc>) -> Self {
        let collection = collection.into();
        let (database_name, collection_name) = split_collection(&collection);
        let progress = ExportProgressState {
            database_name,
            collection_name,
            export_time,
        };
        Self {
            collection,
            partition_size,
            export_time,
            state: PartitionState::new(Some(progress)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Items per data query partition.
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    pub fn export_time(&self) -> DateTime<Utc> {
        self.export_time
    }
}

/// `db.coll` -> (`db`, `coll`); a name without a dot is all collection.
fn split_collection(collection: &str) -> (String, String) {
    match collection.split_once('.') {
        Some((db, coll)) => (db.to_string(), coll.to_string()),
        None => (String::new(), collection.to_string()),
    }
}

impl SourcePartition for ExportPartition {
    type Progress = ExportProgressState;
    const PARTITION_TYPE: &'static str = EXPORT_PARTITION_TYPE;

    fn key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.collection,
            self.partition_size,
            self.export_time.timestamp_millis(),
            sep = KEY_SEPARATOR
        )
    }

    fn state(&self) -> &PartitionState<ExportProgressState> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PartitionState<ExportProgressState> {
        &mut self.state
    }

    fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        expect_type(&record, EXPORT_PARTITION_TYPE)?;
        let key = record.partition_key.as_str();
        let bad = |reason: &str| invalid_key(EXPORT_PARTITION_TYPE, key, reason);

        let mut parts = key.rsplitn(3, KEY_SEPARATOR);
        let (Some(millis), Some(size), Some(collection)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(bad("expected collection|partitionSize|exportTimeMillis"));
        };

        let partition_size = size
            .parse()
            .map_err(|_| bad("partition size is not an integer"))?;
        let export_time = millis
            .parse()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| bad("export time is not epoch millis"))?;
        let collection = collection.to_string();

        Ok(Self {
            collection,
            partition_size,
            export_time,
            state: PartitionState::from_record(record)?,
        })
    }
}
