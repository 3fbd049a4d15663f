use serde_json::{Map, Value};

use super::{PartitionState, SourcePartition, expect_type};
use crate::constants::GLOBAL_STATE_PARTITION_TYPE;
use crate::coordination::error::CoordinationResult;
use crate::coordination::record::PartitionRecord;

/// Shared, non-leased state published under a well-known key.
///
/// Any node may update it. Concurrent writers are serialized only by the
/// store's version check, so read-modify-write callers must retry on
/// `ConditionalWriteLost`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalState {
    key: String,
    state: PartitionState<Map<String, Value>>,
}

impl GlobalState {
    pub fn new(key: impl Into<String>, progress: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            state: PartitionState::new(Some(progress)),
        }
    }

    /// Progress map, empty when the record carries none.
    pub fn values(&self) -> Map<String, Value> {
        self.state.progress.clone().unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.progress.as_ref().and_then(|m| m.get(field))
    }

    /// Numeric field, zero when absent or not an integer.
    pub fn get_u64(&self, field: &str) -> u64 {
        self.get(field).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.state
            .progress
            .get_or_insert_with(Map::new)
            .insert(field.into(), value.into());
    }
}

impl SourcePartition for GlobalState {
    type Progress = Map<String, Value>;
    const PARTITION_TYPE: &'static str = GLOBAL_STATE_PARTITION_TYPE;
    const LEASED: bool = false;

    fn key(&self) -> String {
        self.key.clone()
    }

    fn state(&self) -> &PartitionState<Self::Progress> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PartitionState<Self::Progress> {
        &mut self.state
    }

    fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        expect_type(&record, GLOBAL_STATE_PARTITION_TYPE)?;
        Ok(Self {
            key: record.partition_key.clone(),
            state: PartitionState::from_record(record)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::partition::CoordinatedPartition;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_counters() {
        let mut state = GlobalState::new("EXPORT-db.orders", Map::new());
        assert_eq!(state.get_u64("loadedRecords"), 0);

        state.insert("loadedRecords", 42u64);
        assert_eq!(state.get_u64("loadedRecords"), 42);
        assert!(!state.is_leased());
    }

    #[test]
    fn test_roundtrip_through_record() {
        let record = PartitionRecord::global_state(
            "src",
            "GLOBAL",
            "db.orders",
            Some(json!({"batchSize": 100}).to_string()),
            Utc::now(),
        );
        let state = GlobalState::from_record(record).unwrap();
        assert_eq!(state.partition_key(), "db.orders");
        assert_eq!(state.get("batchSize"), Some(&json!(100)));
    }
}
