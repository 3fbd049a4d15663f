//! Configuration for coordinators, the leader scheduler and workers.
//!
//! Each struct has sane defaults, a `validate()` that reports every problem
//! at once, and a `from_env()` that layers environment variables on top of
//! the defaults.

use std::time::Duration;

use super::error::{CoordinationError, CoordinationResult};
use crate::constants::{
    DEFAULT_AWS_REGION, DEFAULT_DATA_PATH, DEFAULT_JITTER_FACTOR,
    DEFAULT_LEADER_LEASE_EXTENSION_SECS, DEFAULT_LEADER_POLL_INTERVAL_SECS,
    DEFAULT_LEASE_TIMEOUT_SECS, DEFAULT_STORE_ROOT, DEFAULT_WORKER_POLL_INTERVAL_SECS,
    KEY_SEPARATOR,
};

/// Backend holding partition records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreType {
    /// Process-local store. Only coordinates within one process.
    #[default]
    Memory,
    /// Local filesystem through `object_store`.
    ///
    /// The local filesystem does not support conditional updates, so this
    /// backend can create and read records but every update is rejected.
    Local {
        /// Directory on the local filesystem.
        path: String,
    },
    /// Amazon S3 or S3-compatible storage.
    S3 {
        bucket: String,
        region: String,
        /// Custom endpoint for S3-compatible services (e.g., MinIO).
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

/// Configuration for a [`SourceCoordinator`](super::SourceCoordinator).
///
/// # Clock Synchronization
///
/// Lease expiry is a wall-clock timestamp written by one node and compared
/// by another. Nodes must run NTP or an equivalent; drift approaching the
/// gap between lease extension and poll interval causes spurious takeovers.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Optional namespace prepended to every source identifier.
    ///
    /// With prefix `p` the effective identifier of source `s` is `p|s`.
    pub partition_prefix: Option<String>,

    /// Identity written into `ownerId` of leased records.
    ///
    /// Must be unique per process. Defaults to `HOSTNAME` when read from the
    /// environment, otherwise a generated `node-<uuid>`.
    pub owner_id: String,

    /// Default lease for acquires and progress saves.
    pub lease_timeout: Duration,

    /// Where records live.
    pub store: StoreType,

    /// Object path prefix for object store backends.
    pub store_root: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            partition_prefix: None,
            owner_id: generated_owner_id(),
            lease_timeout: Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS),
            store: StoreType::default(),
            store_root: DEFAULT_STORE_ROOT.to_string(),
        }
    }
}

fn generated_owner_id() -> String {
    format!("node-{}", uuid::Uuid::new_v4())
}

impl CoordinationConfig {
    /// Effective source identifier after applying the partition prefix.
    pub fn source_identifier(&self, source: &str) -> String {
        match &self.partition_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{KEY_SEPARATOR}{source}"),
            _ => source.to_string(),
        }
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.owner_id.trim().is_empty() {
            errors.push("owner_id must not be empty".to_string());
        }

        if self.lease_timeout.is_zero() {
            errors.push("lease_timeout must be greater than zero".to_string());
        }

        if let Some(prefix) = &self.partition_prefix
            && prefix.contains(KEY_SEPARATOR)
        {
            errors.push(format!(
                "partition_prefix '{}' must not contain '{}'",
                prefix, KEY_SEPARATOR
            ));
        }

        if self.store_root.trim().is_empty() {
            errors.push("store_root must not be empty".to_string());
        }

        match &self.store {
            StoreType::Memory => {}
            StoreType::Local { path } => {
                if path.trim().is_empty() {
                    errors.push("local store path must not be empty".to_string());
                }
            }
            StoreType::S3 { bucket, region, .. } => {
                if bucket.trim().is_empty() {
                    errors.push("S3 bucket must not be empty".to_string());
                }
                if region.trim().is_empty() {
                    errors.push("S3 region must not be empty".to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `COORDINATION_PARTITION_PREFIX`: namespace for source identifiers
    /// - `COORDINATION_OWNER_ID`: owner identity (default: `HOSTNAME`, then `node-<uuid>`)
    /// - `COORDINATION_LEASE_TIMEOUT_SECS`: default lease (default: 600)
    /// - `COORDINATION_STORE_TYPE`: `memory`, `local` or `s3` (default: memory)
    /// - `COORDINATION_STORE_ROOT`: object path prefix (default: source-coordination)
    /// - `COORDINATION_DATA_PATH`: directory for the local store
    /// - `COORDINATION_S3_BUCKET`: bucket, required when the store type is `s3`
    /// - `AWS_REGION` / `AWS_DEFAULT_REGION`, `AWS_ENDPOINT`,
    ///   `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
    pub fn from_env() -> CoordinationResult<Self> {
        let defaults = Self::default();

        let partition_prefix = std::env::var("COORDINATION_PARTITION_PREFIX")
            .ok()
            .filter(|p| !p.is_empty());

        let owner_id = std::env::var("COORDINATION_OWNER_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(defaults.owner_id);

        let lease_timeout = parse_env("COORDINATION_LEASE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_timeout);

        let store_root =
            std::env::var("COORDINATION_STORE_ROOT").unwrap_or(defaults.store_root);

        let store_type = std::env::var("COORDINATION_STORE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let store = match store_type.as_str() {
            "memory" => StoreType::Memory,
            "local" => StoreType::Local {
                path: std::env::var("COORDINATION_DATA_PATH")
                    .unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string()),
            },
            "s3" => {
                let bucket = std::env::var("COORDINATION_S3_BUCKET").map_err(|_| {
                    CoordinationError::Config(
                        "COORDINATION_S3_BUCKET must be set when COORDINATION_STORE_TYPE=s3"
                            .to_string(),
                    )
                })?;

                let region = std::env::var("AWS_REGION")
                    .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
                    .unwrap_or_else(|_| DEFAULT_AWS_REGION.to_string());

                StoreType::S3 {
                    bucket,
                    region,
                    endpoint: std::env::var("AWS_ENDPOINT").ok(),
                    access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                    secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                }
            }
            other => {
                return Err(CoordinationError::Config(format!(
                    "Unknown COORDINATION_STORE_TYPE '{}'. Valid types: memory, local, s3",
                    other
                )));
            }
        };

        let config = Self {
            partition_prefix,
            owner_id,
            lease_timeout,
            store,
            store_root,
        };

        config
            .validate()
            .map_err(|errors| CoordinationError::Config(errors.join("; ")))?;

        Ok(config)
    }
}

/// Configuration for the [`LeaderScheduler`](super::LeaderScheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderSchedulerConfig {
    /// Time between scheduler iterations.
    pub poll_interval: Duration,

    /// Lease extension applied on every heartbeat.
    ///
    /// Must be strictly greater than `poll_interval`.
    pub lease_extension: Duration,
}

impl Default for LeaderSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_LEADER_POLL_INTERVAL_SECS),
            lease_extension: Duration::from_secs(DEFAULT_LEADER_LEASE_EXTENSION_SECS),
        }
    }
}

impl LeaderSchedulerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.poll_interval.is_zero() {
            errors.push("leader poll_interval must be greater than zero".to_string());
        }

        if self.lease_extension <= self.poll_interval {
            errors.push(format!(
                "leader lease_extension ({:?}) must be greater than poll_interval ({:?})",
                self.lease_extension, self.poll_interval
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Environment variables:
    /// - `LEADER_POLL_INTERVAL_SECS` (default: 60)
    /// - `LEADER_LEASE_EXTENSION_SECS` (default: 180)
    pub fn from_env() -> CoordinationResult<Self> {
        let defaults = Self::default();

        let poll_interval = parse_env("LEADER_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let lease_extension = parse_env("LEADER_LEASE_EXTENSION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_extension);

        let config = Self {
            poll_interval,
            lease_extension,
        };
        config
            .validate()
            .map_err(|errors| CoordinationError::Config(errors.join("; ")))?;
        Ok(config)
    }
}

/// Configuration for a [`PartitionWorker`](super::PartitionWorker).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Sleep between acquire attempts when no partition is available.
    pub poll_interval: Duration,

    /// Lease requested on acquire. `None` uses the coordinator default.
    pub lease_duration: Option<Duration>,

    /// Close this many times and the partition is completed instead.
    pub max_closed_count: Option<u64>,

    /// Random jitter on `poll_interval`, as a fraction in `[0, 1)`.
    pub jitter_factor: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_WORKER_POLL_INTERVAL_SECS),
            lease_duration: None,
            max_closed_count: None,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.poll_interval.is_zero() {
            errors.push("worker poll_interval must be greater than zero".to_string());
        }

        if self.lease_duration.is_some_and(|d| d.is_zero()) {
            errors.push("worker lease_duration must be greater than zero".to_string());
        }

        if self.max_closed_count == Some(0) {
            errors.push("worker max_closed_count must be at least 1".to_string());
        }

        if !(0.0..1.0).contains(&self.jitter_factor) {
            errors.push(format!(
                "worker jitter_factor ({}) must be in [0, 1)",
                self.jitter_factor
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Environment variables:
    /// - `WORKER_POLL_INTERVAL_SECS` (default: 30)
    /// - `WORKER_LEASE_DURATION_SECS` (default: coordinator lease timeout)
    /// - `WORKER_MAX_CLOSED_COUNT` (default: unlimited)
    pub fn from_env() -> CoordinationResult<Self> {
        let defaults = Self::default();

        let poll_interval = parse_env("WORKER_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let lease_duration = parse_env("WORKER_LEASE_DURATION_SECS")?.map(Duration::from_secs);

        let max_closed_count = parse_env("WORKER_MAX_CLOSED_COUNT")?;

        let config = Self {
            poll_interval,
            lease_duration,
            max_closed_count,
            ..defaults
        };
        config
            .validate()
            .map_err(|errors| CoordinationError::Config(errors.join("; ")))?;
        Ok(config)
    }

    /// Poll interval with jitter applied.
    pub fn jittered_poll_interval(&self) -> Duration {
        with_jitter(self.poll_interval, self.jitter_factor)
    }
}

/// Scale `base` by a random factor in `[1 - factor, 1 + factor]`.
pub fn with_jitter(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    let jitter = (fastrand::f64() * 2.0 - 1.0) * factor;
    base.mul_f64((1.0 + jitter).max(0.0))
}

/// Parse an optional environment variable; a set but unparsable value is
/// a config error.
fn parse_env<T>(name: &str) -> CoordinationResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v.trim().parse().map(Some).map_err(|e| {
            CoordinationError::Config(format!("Invalid {} '{}': {}", name, v, e))
        }),
        Err(_) => Ok(None),
    }
}
