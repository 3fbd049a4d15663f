//! Logging setup.
//!
//! ```rust,no_run
//! use leasekeeper::telemetry::{LogFormat, init_logging};
//!
//! init_logging(LogFormat::from_env()).expect("Failed to init logging");
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: log filter (default: `info`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output (default).
    #[default]
    Pretty,
    /// One JSON object per event, for log aggregators.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        })
    }
}

impl LogFormat {
    /// Read from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    Ok(())
}
