//! Centralized coordination constants.
//!
//! Store layout, well-known partition types and keys, and the timing
//! defaults used by [`config`](crate::coordination::config).
//!
//! # Categories
//!
//! - **Partition Types**: tags stored in `partitionType`
//! - **Well-Known Keys**: fixed keys and key prefixes
//! - **Timing Defaults**: lease and polling cadence

// =============================================================================
// Partition Types
// =============================================================================

/// Singleton partition raced for by every node of a source.
pub const LEADER_PARTITION_TYPE: &str = "LEADER";

/// Non-leased shared state (collection config, load counters).
pub const GLOBAL_STATE_PARTITION_TYPE: &str = "GLOBAL";

/// One-time snapshot export of a collection.
pub const EXPORT_PARTITION_TYPE: &str = "EXPORT";

/// Continuous change-stream reader for a collection.
pub const STREAM_PARTITION_TYPE: &str = "STREAM";

/// A bounded query slice produced from an export.
pub const DATA_QUERY_PARTITION_TYPE: &str = "DATA_QUERY";

// =============================================================================
// Well-Known Keys
// =============================================================================

/// The only key a leader partition ever has.
pub const LEADER_PARTITION_KEY: &str = "GLOBAL";

/// Prefix of the GlobalState key that tracks an export's load status.
///
/// The full key is `EXPORT-{collection}`.
pub const EXPORT_STATUS_KEY_PREFIX: &str = "EXPORT-";

/// Separator inside composite partition keys and prefixed source identifiers.
pub const KEY_SEPARATOR: char = '|';

// =============================================================================
// Timing Defaults
// =============================================================================

/// Lease granted by an acquire when the caller gives no duration.
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 600;

/// How often the leader scheduler wakes up.
pub const DEFAULT_LEADER_POLL_INTERVAL_SECS: u64 = 60;

/// Lease extension applied by each leader heartbeat.
///
/// Must stay strictly greater than [`DEFAULT_LEADER_POLL_INTERVAL_SECS`].
pub const DEFAULT_LEADER_LEASE_EXTENSION_SECS: u64 = 180;

/// How often an idle partition worker polls for work.
pub const DEFAULT_WORKER_POLL_INTERVAL_SECS: u64 = 30;

/// Random jitter applied to worker polling (fraction of the interval).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.15;

/// Grace period for background tasks to exit on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Store Defaults
// =============================================================================

/// Object store prefix under which all records are written.
pub const DEFAULT_STORE_ROOT: &str = "source-coordination";

/// Local directory used when `COORDINATION_STORE_TYPE=local`.
pub const DEFAULT_DATA_PATH: &str = "/tmp/leasekeeper-data";

/// Region used for S3 when neither `AWS_REGION` nor `AWS_DEFAULT_REGION` is set.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";
