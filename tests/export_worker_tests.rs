//! Export fan-out and partition worker tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use leasekeeper::coordination::{
    BackgroundTaskRegistry, Clock, CollectionConfig, CoordinatedPartition, CoordinationConfig,
    CoordinationError, CoordinationResult, DataQueryPartition, ExportPartition,
    ExportPartitionSupplier, ExportScheduler, InMemoryPartitionStore, LeaderScheduler,
    LeaderSchedulerConfig, LoadStatus, ManualClock, PartitionIdentifierBatch, PartitionOutcome,
    PartitionProcessor, PartitionStatus, PartitionWorker, ShutdownSignal, SourceCoordinator,
    WorkerConfig, record_loaded,
};

/// Hands out pre-baked identifier pages and records the cursors it saw.
struct PagedSupplier {
    pages: Mutex<VecDeque<PartitionIdentifierBatch>>,
    cursors: Mutex<Vec<Option<String>>>,
}

impl PagedSupplier {
    fn new(pages: Vec<PartitionIdentifierBatch>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ExportPartitionSupplier for PagedSupplier {
    async fn next_batch(
        &self,
        _partition: &ExportPartition,
        start_after: Option<&str>,
    ) -> CoordinationResult<PartitionIdentifierBatch> {
        self.cursors.lock().unwrap().push(start_after.map(String::from));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoordinationError::Storage("no more pages".to_string()))
    }
}

/// Loads a fixed number of records per query and reports them.
struct CountingLoader {
    records_per_query: u64,
    processed: AtomicU64,
}

#[async_trait]
impl PartitionProcessor<DataQueryPartition> for CountingLoader {
    async fn process(
        &self,
        partition: &mut DataQueryPartition,
        coordinator: &SourceCoordinator,
    ) -> CoordinationResult<PartitionOutcome> {
        partition.record_batch(self.records_per_query);
        coordinator.save_progress(partition, None).await?;
        record_loaded(coordinator, partition.collection(), self.records_per_query).await?;
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(PartitionOutcome::Completed)
    }
}

fn batch(ids: &[&str], last: bool, end: Option<&str>) -> PartitionIdentifierBatch {
    PartitionIdentifierBatch {
        identifiers: ids.iter().map(|s| s.to_string()).collect(),
        is_last_batch: last,
        end_doc_id: end.map(String::from),
    }
}

struct Harness {
    store: Arc<InMemoryPartitionStore>,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new();
        Self {
            store: Arc::new(InMemoryPartitionStore::with_clock(Arc::new(clock.clone()))),
            clock,
        }
    }

    fn coordinator(&self, owner_id: &str) -> Arc<SourceCoordinator> {
        let config = CoordinationConfig {
            owner_id: owner_id.to_string(),
            ..Default::default()
        };
        Arc::new(
            SourceCoordinator::new(self.store.clone(), "mongodb", &config)
                .with_clock(Arc::new(self.clock.clone())),
        )
    }

    /// Run one leader pass so the export partition and its counter exist.
    async fn bootstrap(&self) {
        let mut leader = LeaderScheduler::new(
            self.coordinator("leader"),
            vec![CollectionConfig::new("db.orders").with_export(1000)],
            LeaderSchedulerConfig::default(),
        );
        leader.run_once().await;
        assert!(leader.is_leader());
    }

    async fn load_status(&self) -> LoadStatus {
        let state = self
            .coordinator("reader")
            .get_global_state("EXPORT-db.orders")
            .await
            .unwrap()
            .expect("load status should exist");
        LoadStatus::from_map(&state.values()).unwrap()
    }
}

#[tokio::test]
async fn test_export_scheduler_creates_data_queries_and_counter() {
    let harness = Harness::new();
    harness.bootstrap().await;

    let supplier = PagedSupplier::new(vec![
        batch(&["db.orders|q0", "db.orders|q1"], false, Some("doc-500")),
        batch(&["db.orders|q2"], true, None),
    ]);
    let worker = PartitionWorker::<ExportPartition, _>::new(
        harness.coordinator("node-a"),
        ExportScheduler::new(supplier),
        WorkerConfig::default(),
    );

    assert!(worker.run_once().await.unwrap());

    let coordinator = harness.coordinator("node-b");
    let keys: Vec<_> = coordinator
        .query_all_partitions("DATA_QUERY")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.partition_key())
        .collect();
    assert_eq!(keys.len(), 3);
    for q in ["q0", "q1", "q2"] {
        assert!(keys.contains(&format!("db.orders|{q}")));
    }

    let status = harness.load_status().await;
    assert_eq!(status.total_partitions, 3);
    assert!(status.total_partitions_complete);
    assert_eq!(status.loaded_partitions, 0);

    let exports = coordinator.query_all_partitions("EXPORT").await.unwrap();
    assert_eq!(
        exports[0].record().unwrap().status,
        Some(PartitionStatus::Completed)
    );

    // Nothing left for a second pass.
    assert!(!worker.run_once().await.unwrap());
}

#[tokio::test]
async fn test_export_scheduler_passes_cursor_between_pages() {
    let harness = Harness::new();
    harness.bootstrap().await;

    let worker = PartitionWorker::<ExportPartition, _>::new(
        harness.coordinator("node-a"),
        ExportScheduler::new(PagedSupplier::new(vec![
            batch(&["db.orders|q0"], false, Some("doc-1")),
            batch(&["db.orders|q1"], false, Some("doc-2")),
            batch(&[], true, None),
        ])),
        WorkerConfig::default(),
    );
    worker.run_once().await.unwrap();

    let cursors = worker.processor().supplier().cursors.lock().unwrap().clone();
    assert_eq!(
        cursors,
        vec![None, Some("doc-1".to_string()), Some("doc-2".to_string())]
    );

    let status = harness.load_status().await;
    assert_eq!(status.total_partitions, 2);
    assert!(status.total_partitions_complete);
}

#[tokio::test]
async fn test_missing_cursor_ends_export_with_complete_counter() {
    let harness = Harness::new();
    harness.bootstrap().await;
    harness.clock.advance(Duration::from_secs(5));

    let worker = PartitionWorker::<ExportPartition, _>::new(
        harness.coordinator("node-a"),
        ExportScheduler::new(PagedSupplier::new(vec![batch(&["db.orders|q1"], false, None)])),
        WorkerConfig::default(),
    );
    assert!(worker.run_once().await.unwrap());

    let coordinator = harness.coordinator("node-b");
    let exports = coordinator.query_all_partitions("EXPORT").await.unwrap();
    assert_eq!(
        exports[0].record().unwrap().status,
        Some(PartitionStatus::Completed)
    );

    let status = harness.load_status().await;
    assert_eq!(status.total_partitions, 1);
    assert!(status.total_partitions_complete);
    assert_eq!(worker.processor().supplier().cursors.lock().unwrap().len(), 1);

    let queries = coordinator.query_all_partitions("DATA_QUERY").await.unwrap();
    let progress = queries[0].record().unwrap().progress_state.clone().unwrap();
    let progress: serde_json::Value = serde_json::from_str(&progress).unwrap();
    assert_eq!(
        progress["startTime"],
        serde_json::Value::from(harness.clock.now().timestamp_millis())
    );

    // The counter completes once every query is loaded.
    let loader = PartitionWorker::<DataQueryPartition, _>::new(
        harness.coordinator("node-c"),
        CountingLoader {
            records_per_query: 10,
            processed: AtomicU64::new(0),
        },
        WorkerConfig::default(),
    );
    assert!(loader.run_once().await.unwrap());
    assert!(harness.load_status().await.is_fully_loaded());
}

#[tokio::test]
async fn test_supplier_failure_gives_export_back() {
    let harness = Harness::new();
    harness.bootstrap().await;

    let worker = PartitionWorker::<ExportPartition, _>::new(
        harness.coordinator("node-a"),
        ExportScheduler::new(PagedSupplier::new(vec![batch(
            &["db.orders|q0"],
            false,
            Some("doc-1"),
        )])),
        WorkerConfig::default(),
    );

    let err = worker.run_once().await.unwrap_err();
    assert!(matches!(err, CoordinationError::Storage(_)));

    let exports = harness
        .coordinator("node-b")
        .query_all_partitions("EXPORT")
        .await
        .unwrap();
    assert_eq!(
        exports[0].record().unwrap().status,
        Some(PartitionStatus::Unassigned)
    );

    // Partial progress is counted once and not duplicated on retry.
    assert_eq!(harness.load_status().await.total_partitions, 1);
}

#[tokio::test]
async fn test_data_query_workers_report_loaded_counts() {
    let harness = Harness::new();
    harness.bootstrap().await;

    PartitionWorker::<ExportPartition, _>::new(
        harness.coordinator("node-a"),
        ExportScheduler::new(PagedSupplier::new(vec![batch(
            &["db.orders|q0", "db.orders|q1", "db.orders|q2"],
            true,
            None,
        )])),
        WorkerConfig::default(),
    )
    .run_once()
    .await
    .unwrap();

    let loader = PartitionWorker::<DataQueryPartition, _>::new(
        harness.coordinator("node-b"),
        CountingLoader {
            records_per_query: 250,
            processed: AtomicU64::new(0),
        },
        WorkerConfig::default(),
    );
    while loader.run_once().await.unwrap() {}
    assert_eq!(loader.processor().processed.load(Ordering::SeqCst), 3);

    let status = harness.load_status().await;
    assert_eq!(status.loaded_partitions, 3);
    assert_eq!(status.loaded_records, 750);
    assert!(status.is_fully_loaded());

    let completed = harness
        .coordinator("reader")
        .query_all_partitions("DATA_QUERY")
        .await
        .unwrap();
    for partition in completed {
        let record = partition.record().unwrap();
        assert_eq!(record.status, Some(PartitionStatus::Completed));
        assert!(record.progress_state.as_deref().unwrap().contains("\"loadedRecords\":250"));
    }
}

#[tokio::test]
async fn test_record_loaded_without_counter_is_skipped() {
    let harness = Harness::new();
    let coordinator = harness.coordinator("node-a");

    record_loaded(&coordinator, "db.missing", 10).await.unwrap();
    assert!(
        coordinator
            .get_global_state("EXPORT-db.missing")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_updates_are_not_lost() {
    let harness = Harness::new();
    harness.bootstrap().await;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let coordinator = harness.coordinator(&format!("node-{i}"));
            tokio::spawn(async move {
                for _ in 0..5 {
                    record_loaded(&coordinator, "db.orders", 10).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let status = harness.load_status().await;
    assert_eq!(status.loaded_partitions, 20);
    assert_eq!(status.loaded_records, 200);
}

#[tokio::test]
async fn test_max_closed_count_completes_partition() {
    struct AlwaysClose;

    #[async_trait]
    impl PartitionProcessor<DataQueryPartition> for AlwaysClose {
        async fn process(
            &self,
            _partition: &mut DataQueryPartition,
            _coordinator: &SourceCoordinator,
        ) -> CoordinationResult<PartitionOutcome> {
            Ok(PartitionOutcome::Closed {
                reopen_after: Duration::ZERO,
            })
        }
    }

    let harness = Harness::new();
    let coordinator = harness.coordinator("node-a");
    coordinator
        .create_partition(&DataQueryPartition::new("db.orders", "q0"))
        .await
        .unwrap();

    let worker = PartitionWorker::<DataQueryPartition, _>::new(
        coordinator.clone(),
        AlwaysClose,
        WorkerConfig {
            max_closed_count: Some(3),
            ..Default::default()
        },
    );

    for _ in 0..3 {
        assert!(worker.run_once().await.unwrap());
    }
    assert!(!worker.run_once().await.unwrap());

    let all = coordinator.query_all_partitions("DATA_QUERY").await.unwrap();
    let record = all[0].record().unwrap();
    assert_eq!(record.status, Some(PartitionStatus::Completed));
    assert_eq!(record.closed_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_worker_task_stops_on_shutdown() {
    let harness = Harness::new();
    let worker = PartitionWorker::<DataQueryPartition, _>::new(
        harness.coordinator("node-a"),
        CountingLoader {
            records_per_query: 1,
            processed: AtomicU64::new(0),
        },
        WorkerConfig {
            poll_interval: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let mut registry = BackgroundTaskRegistry::new();
    worker.spawn_on(&mut registry, "data-query-worker");
    assert_eq!(registry.task_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(registry.all_running());

    registry.shutdown_all_with_timeout(Duration::from_secs(1)).await;
    assert!(registry.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn test_worker_run_returns_when_signal_fires() {
    let harness = Harness::new();
    let worker = PartitionWorker::<DataQueryPartition, _>::new(
        harness.coordinator("node-a"),
        CountingLoader {
            records_per_query: 1,
            processed: AtomicU64::new(0),
        },
        WorkerConfig::default(),
    );
    let (tx, signal) = ShutdownSignal::channel();
    let handle = tokio::spawn(worker.run(signal));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!handle.is_finished());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop promptly")
        .unwrap();
}
