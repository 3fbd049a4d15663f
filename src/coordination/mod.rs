//! Lease-based partition coordination.
//!
//! # Architecture
//!
//! ```text
//! connector code
//!   │
//!   ├── LeaderScheduler ──┐
//!   ├── PartitionWorker ──┼──> SourceCoordinator ──> PartitionStore
//!   └── ExportScheduler ──┘          │                  ├── InMemoryPartitionStore
//!                                     │                  └── ObjectStorePartitionStore
//!                                     └── PartitionFactory (record -> typed partition)
//! ```
//!
//! Every node runs the same code. Nodes differ only in which partitions they
//! manage to acquire. Exclusivity comes from leases plus version-conditional
//! writes on single records; there is no other locking.

pub mod background_tasks;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod leader;
pub mod memory_store;
pub mod object_store;
pub mod partition;
pub mod record;
pub mod retry;
pub mod source_coordinator;
pub mod traits;
pub mod worker;

pub use background_tasks::{BackgroundTaskRegistry, ShutdownSignal};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CoordinationConfig, LeaderSchedulerConfig, StoreType, WorkerConfig};
pub use error::{CoordinationError, CoordinationResult};
pub use export::{
    ExportPartitionSupplier, ExportScheduler, LoadStatus, PartitionIdentifierBatch,
    export_status_key, record_loaded,
};
pub use leader::{CollectionConfig, ExportConfig, LeaderScheduler};
pub use memory_store::InMemoryPartitionStore;
pub use self::object_store::{ObjectStorePartitionStore, create_object_store, create_partition_store};
pub use partition::{
    AnyPartition, CoordinatedPartition, DataQueryPartition, DataQueryProgressState,
    DefaultPartitionFactory, ExportPartition, ExportProgressState, FromAnyPartition, GlobalState,
    LeaderPartition, LeaderProgressState, PartitionFactory, PartitionState, SourcePartition,
    StreamCheckpoint, StreamPartition, StreamProgressState,
};
pub use record::{PartitionRecord, PartitionStatus};
pub use source_coordinator::SourceCoordinator;
pub use traits::PartitionStore;
pub use worker::{PartitionOutcome, PartitionProcessor, PartitionWorker};
