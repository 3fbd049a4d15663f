use serde::{Deserialize, Serialize};

use super::{PartitionState, SourcePartition, expect_type, invalid_key};
use crate::constants::{LEADER_PARTITION_KEY, LEADER_PARTITION_TYPE};
use crate::coordination::error::CoordinationResult;
use crate::coordination::record::PartitionRecord;

/// Leader progress: whether one-time bootstrap has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderProgressState {
    pub initialized: bool,
}

/// The singleton partition that elects a leader per source.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderPartition {
    state: PartitionState<LeaderProgressState>,
}

impl Default for LeaderPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderPartition {
    /// An uninitialized leader partition, ready to be created.
    pub fn new() -> Self {
        Self {
            state: PartitionState::new(Some(LeaderProgressState::default())),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.progress().is_some_and(|p| p.initialized)
    }

    pub fn mark_initialized(&mut self) {
        self.set_progress(LeaderProgressState { initialized: true });
    }
}

impl SourcePartition for LeaderPartition {
    type Progress = LeaderProgressState;
    const PARTITION_TYPE: &'static str = LEADER_PARTITION_TYPE;

    fn key(&self) -> String {
        LEADER_PARTITION_KEY.to_string()
    }

    fn state(&self) -> &PartitionState<LeaderProgressState> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PartitionState<LeaderProgressState> {
        &mut self.state
    }

    fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        expect_type(&record, LEADER_PARTITION_TYPE)?;
        if record.partition_key != LEADER_PARTITION_KEY {
            return Err(invalid_key(
                LEADER_PARTITION_TYPE,
                &record.partition_key,
                "leader key must be GLOBAL",
            ));
        }
        Ok(Self {
            state: PartitionState::from_record(record)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::partition::CoordinatedPartition;
    use chrono::Utc;

    #[test]
    fn test_leader_key_is_fixed() {
        let leader = LeaderPartition::new();
        assert_eq!(leader.partition_key(), "GLOBAL");
        assert_eq!(leader.partition_type(), "LEADER");
        assert!(!leader.is_initialized());
    }

    #[test]
    fn test_from_record_reads_initialized() {
        let record = PartitionRecord::unassigned(
            "src",
            "LEADER",
            "GLOBAL",
            Some(r#"{"initialized":true}"#.to_string()),
            Utc::now(),
        );
        let leader = LeaderPartition::from_record(record).unwrap();
        assert!(leader.is_initialized());
        assert!(leader.record().is_some());
    }

    #[test]
    fn test_from_record_rejects_other_key() {
        let record = PartitionRecord::unassigned("src", "LEADER", "other", None, Utc::now());
        let err = LeaderPartition::from_record(record).unwrap_err();
        assert!(err.is_fatal());
    }
}
