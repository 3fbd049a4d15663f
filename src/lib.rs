//! # Leasekeeper
//! Lease-based work partition coordination for data source connectors.
//!
//! A fleet of identical nodes pulls data from one source (a database, a
//! change stream, an export). The work is split into *partitions*, each a
//! single record in a shared store. Nodes race to lease partitions; a lease
//! is held by renewing it and released by completing, closing or giving the
//! partition up. Every write is conditional on the record version the writer
//! last saw, so two nodes can never both succeed in moving the same record.
//!
//! # Goals
//! - No coordinator process: the store's conditional writes are the only lock
//! - Pluggable storage through [`PartitionStore`](coordination::PartitionStore)
//! - Typed partitions with versioned JSON progress
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use leasekeeper::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     leasekeeper::telemetry::init_logging(leasekeeper::telemetry::LogFormat::from_env())?;
//!
//!     let config = CoordinationConfig::from_env()?;
//!     let store = create_partition_store(&config, Arc::new(SystemClock))?;
//!     let coordinator = Arc::new(SourceCoordinator::new(store, "mongodb", &config));
//!     coordinator.initialize().await?;
//!
//!     let mut registry = BackgroundTaskRegistry::new();
//!     LeaderScheduler::new(
//!         coordinator.clone(),
//!         vec![CollectionConfig::new("shop.orders").with_export(10_000).with_stream()],
//!         LeaderSchedulerConfig::from_env()?,
//!     )
//!     .spawn_on(&mut registry, "leader");
//!
//!     tokio::signal::ctrl_c().await?;
//!     registry.shutdown_all().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod constants;
pub mod coordination;
pub mod telemetry;

pub mod prelude {
    //! Types most connectors need.
    pub use crate::coordination::{
        BackgroundTaskRegistry, CollectionConfig, CoordinatedPartition, CoordinationConfig,
        CoordinationError, CoordinationResult, ExportPartitionSupplier, ExportScheduler,
        LeaderScheduler, LeaderSchedulerConfig, PartitionOutcome, PartitionProcessor,
        PartitionStore, PartitionWorker, ShutdownSignal, SourceCoordinator, SourcePartition,
        SystemClock, WorkerConfig, create_partition_store,
    };
}
