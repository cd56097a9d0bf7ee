use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::MediaKind;
use crate::distribute::Strategy;

/// Root configuration for chanrelay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session enrolment entries
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,

    /// Rate-limit tuning overrides
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Task distribution settings
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Local-download workflow settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Forward workflow settings
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Per-operation remote call deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// One enrolled session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session name
    pub name: String,

    /// Path to the persisted auth artefact (opaque to the core)
    pub auth_file: PathBuf,

    /// Whether this session participates in runs
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Rate-limit tuning.
///
/// Admission requires a permit from the global limiter, the op-class
/// limiter and the per-session limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Global service limit, ops per minute
    #[serde(default = "default_global_per_minute")]
    pub global_per_minute: u32,

    /// Fetch class limit, ops per minute
    #[serde(default = "default_fetch_per_minute")]
    pub fetch_per_minute: u32,

    /// Download class limit, ops per minute
    #[serde(default = "default_class_per_minute")]
    pub download_per_minute: u32,

    /// Upload/send class limit, ops per minute
    #[serde(default = "default_class_per_minute")]
    pub upload_per_minute: u32,

    /// Delete class limit, ops per minute
    #[serde(default = "default_fetch_per_minute")]
    pub delete_per_minute: u32,

    /// Per-session limit, ops per minute
    #[serde(default = "default_session_per_minute")]
    pub session_per_minute: u32,

    /// Flood waits at or below this are absorbed inline on the same
    /// session; longer ones suspend the session
    #[serde(default = "default_flood_threshold", with = "humantime_serde")]
    pub flood_wait_threshold: Duration,

    /// Flood waits within the tuning window before class rates are
    /// reduced
    #[serde(default = "default_flood_tolerance")]
    pub flood_wait_tolerance: u32,
}

fn default_global_per_minute() -> u32 {
    30
}

fn default_fetch_per_minute() -> u32 {
    30
}

fn default_class_per_minute() -> u32 {
    20
}

fn default_session_per_minute() -> u32 {
    10
}

fn default_flood_threshold() -> Duration {
    Duration::from_secs(10)
}

fn default_flood_tolerance() -> u32 {
    3
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_per_minute(),
            fetch_per_minute: default_fetch_per_minute(),
            download_per_minute: default_class_per_minute(),
            upload_per_minute: default_class_per_minute(),
            delete_per_minute: default_fetch_per_minute(),
            session_per_minute: default_session_per_minute(),
            flood_wait_threshold: default_flood_threshold(),
            flood_wait_tolerance: default_flood_tolerance(),
        }
    }
}

/// Task distribution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Bin-packing strategy
    #[serde(default)]
    pub strategy: Strategy,
}

/// Local-download workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory; media lands in a per-channel subdirectory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Media at or above this size (or any video) takes the streaming
    /// API path instead of the in-memory one
    #[serde(default = "default_small_file_cap")]
    pub small_file_cap: u64,

    /// Media kinds to include; empty means all
    #[serde(default)]
    pub include_kinds: Vec<MediaKind>,

    /// Skip media larger than this, 0 disables the filter
    #[serde(default)]
    pub max_file_size: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_small_file_cap() -> u64 {
    50 * 1024 * 1024
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            small_file_cap: default_small_file_cap(),
            include_kinds: Vec::new(),
            max_file_size: 0,
        }
    }
}

/// Forward workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Caption template; `{name}` placeholders, empty means passthrough
    #[serde(default = "default_template")]
    pub template: String,

    /// Send-batch size bound, 1..=10
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Keep source structure: singletons single-send, groups batch-send.
    /// When off, scratch units are re-batched up to `batch_size`.
    #[serde(default = "default_true")]
    pub preserve_structure: bool,

    /// Reclaim scratch for fully distributed units
    #[serde(default = "default_true")]
    pub cleanup_on_success: bool,

    /// Reclaim scratch for failed units instead of retaining them for
    /// inspection
    #[serde(default)]
    pub cleanup_on_failure: bool,

    /// Retries per batch on transient errors or post-suspension
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,

    /// Optional pause between consecutive batch sends to a destination
    #[serde(default, with = "humantime_serde")]
    pub batch_pacing: Duration,
}

fn default_template() -> String {
    "{original_text}{original_caption}".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_send_retries() -> u32 {
    3
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            batch_size: default_batch_size(),
            preserve_structure: true,
            cleanup_on_success: true,
            cleanup_on_failure: false,
            send_retries: default_send_retries(),
            batch_pacing: Duration::ZERO,
        }
    }
}

/// Per-operation remote call deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch: Duration,

    #[serde(default = "default_download_timeout", with = "humantime_serde")]
    pub download_small: Duration,

    /// Streaming downloads are unbounded overall; this bounds the gap
    /// between consecutive chunks
    #[serde(default = "default_stream_progress_timeout", with = "humantime_serde")]
    pub stream_progress: Duration,

    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload: Duration,

    #[serde(default = "default_delete_timeout", with = "humantime_serde")]
    pub delete: Duration,
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_stream_progress_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_delete_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch: default_fetch_timeout(),
            download_small: default_download_timeout(),
            stream_progress: default_stream_progress_timeout(),
            upload: default_upload_timeout(),
            delete: default_delete_timeout(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (overridable via RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration).to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
