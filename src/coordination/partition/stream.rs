use serde::{Deserialize, Serialize};

use super::{PartitionState, SourcePartition, expect_type};
use crate::constants::STREAM_PARTITION_TYPE;
use crate::coordination::error::CoordinationResult;
use crate::coordination::record::PartitionRecord;

/// Position inside a change stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCheckpoint {
    pub commit_num: u64,
    pub op_num: u64,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgressState {
    /// Epoch millis from which the stream is read.
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<StreamCheckpoint>,
    /// Hold off reading until the collection's export has loaded.
    #[serde(default)]
    pub wait_for_export: bool,
}

/// Continuous change-stream reader for one collection. Key: the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPartition {
    collection: String,
    state: PartitionState<StreamProgressState>,
}

impl StreamPartition {
    pub fn new(collection: impl Into<String>, progress: StreamProgressState) -> Self {
        Self {
            collection: collection.into(),
            state: PartitionState::new(Some(progress)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Record a new position. The caller persists it with `save_progress`.
    pub fn advance(&mut self, resume_token: Option<String>, checkpoint: StreamCheckpoint) {
        if let Some(progress) = self.state.progress.as_mut() {
            progress.resume_token = resume_token;
            progress.checkpoint = Some(checkpoint);
        }
    }
}

impl SourcePartition for StreamPartition {
    type Progress = StreamProgressState;
    const PARTITION_TYPE: &'static str = STREAM_PARTITION_TYPE;

    fn key(&self) -> String {
        self.collection.clone()
    }

    fn state(&self) -> &PartitionState<StreamProgressState> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PartitionState<StreamProgressState> {
        &mut self.state
    }

    fn from_record(record: PartitionRecord) -> CoordinationResult<Self> {
        expect_type(&record, STREAM_PARTITION_TYPE)?;
        Ok(Self {
            collection: record.partition_key.clone(),
            state: PartitionState::from_record(record)?,
        })
    }
}
