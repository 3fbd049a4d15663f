use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PartitionState, SourcePartition, expect_type, invalid_key};
use crate::constants::{DATA_QUERY_PARTITION_TYPE, KEY_SEPARATOR};
use crate::coordination::error::CoordinationResult;
use crate::coordination::record::PartitionRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQueryProgressState {
    #[serde(default)]
    pub executed_queries: u64,
    #[serde(default)]
    pub loaded_records: u64,
    /// Epoch millis when loading started.
    #[serde(default)]
    pub start_time: i64,
}

/// A bounded query slice of an export. Key: `{collection}|{query}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQueryPartition {
    collection: String,
    query: String,
    state: PartitionState<DataQueryProgressState>,
}

impl DataQueryPartition {
    pub fn new(collection: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            query: query.into(),
            state: PartitionState::new(Some(DataQueryProgressState::default())),
        }
    }

    /// Stamp the time loading of this slice was scheduled.
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.state
            .progress
            .get_or_insert_with(Default::default)
            .start_time = start_time.timestamp_millis();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Opaque query identifier produced by the export supplier.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Add a batch of loaded records to the progress counters.
    pub fn record_batch(&mut self, records: u64) {
        let progress = self.state.progress.get_or_insert_with(Default::default);
        progress.executed_queries += 1;
        progress.loaded_records += records;
    }
}

impl SourcePartition for DataQueryPartition {
    type Progress = DataQueryProgressState;
    const PARTITION_TYPE: &'static str = DATA_QUERY_PARTITION_TYPE;

    fn key(&self) -> String {
        format!("{}{}{}", self.collection, KEY_SEPARATOR, self.query)
    }

    fn state(&self) -> &PartitionState<DataQueryProgressState> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PartitionState<DataQueryProgressState> {
        &mut self.state
    }

    fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        expect_type(&record, DATA_QUERY_PARTITION_TYPE)?;
        // The collection never contains the separator; the query may.
        let Some((collection, query)) = record.partition_key.split_once(KEY_SEPARATOR) else {
            return Err(invalid_key(
                DATA_QUERY_PARTITION_TYPE,
                &record.partition_key,
                "expected collection|query",
            ));
        };
        let (collection, query) = (collection.to_string(), query.to_string());
        Ok(Self {
            collection,
            query,
            state: PartitionState::from_record(record)?,
        })
    }
}
