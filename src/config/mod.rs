//! Configuration loading and validation.
//!
//! Read once at startup, then immutable for the length of the run.

mod loader;
mod types;

pub use types::{
    Config, DistributionConfig, DownloadConfig, ForwardConfig, RateLimitConfig, SessionConfig,
    TelemetryConfig, TimeoutConfig,
};
