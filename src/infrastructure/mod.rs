//! Infrastructure - off the message path
//!
//! - Configuration loading and validation
//! - Logging setup
//! - Transport metrics

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{ConfigError, TransportConfig};
pub use logging::init_logging;
pub use metrics::{MetricsSnapshot, TransportMetrics};
