//! Run reporting: per-unit and per-destination outcomes, aggregated by
//! the driver after all workers terminate.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::{ChannelRef, MediaKind};

/// Workflow selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Download,
    Forward,
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Forward => "forward",
        }
    }
}

/// Error category, per the propagation policy: per-unit errors never
/// abort neighbouring units; per-session errors suspend that session
/// only; validation errors abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    RateLimit,
    Transient,
    Resource,
    Cancelled,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::Resource => "resource",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Terminal status of one atomic unit.
#[derive(Debug, Clone)]
pub enum UnitStatus {
    Ok,
    Skipped,
    Failed { kind: ErrorKind, message: String },
}

impl UnitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed { kind, message: message.into() }
    }
}

/// One downloaded (or skipped) file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub message_id: i64,
    pub kind: MediaKind,
    pub status: UnitStatus,
    pub path: Option<PathBuf>,
    pub bytes: u64,
}

/// One destination's result for one unit.
#[derive(Debug, Clone)]
pub struct DestinationOutcome {
    pub destination: ChannelRef,
    pub success: bool,
    /// Remote ids returned on send
    pub message_ids: Vec<i64>,
    pub error: Option<String>,
    pub retries: u32,
}

/// Terminal record for one atomic unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub first_id: i64,
    pub session: String,
    pub status: UnitStatus,
    pub bytes: u64,
    /// Per-file results (download mode)
    pub files: Vec<FileOutcome>,
    /// Per-destination results (forward mode)
    pub destinations: Vec<DestinationOutcome>,
    pub caption_truncated: bool,
}

impl UnitOutcome {
    pub fn new(first_id: i64, session: &str) -> Self {
        Self {
            first_id,
            session: session.to_string(),
            status: UnitStatus::Ok,
            bytes: 0,
            files: Vec::new(),
            destinations: Vec::new(),
            caption_truncated: false,
        }
    }
}

/// Scratch message that was retained rather than reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchRef {
    pub session: String,
    pub message_id: i64,
}

/// Terminal report for a run.
#[derive(Debug)]
pub struct RunReport {
    pub mode: RunMode,
    pub outcomes: Vec<UnitOutcome>,
    /// Run-level errors (fetch slices lost, cleanup failures, ...)
    pub errors: Vec<String>,
    pub cancelled: bool,
    /// Scratch messages left on the service, listed explicitly
    pub unreclaimed_scratch: Vec<ScratchRef>,
    pub wall_time: Duration,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            outcomes: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
            unreclaimed_scratch: Vec::new(),
            wall_time: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_ok()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Failed { .. }))
            .count()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }

    /// Success fraction over non-skipped units.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.outcomes.len() - self.skipped();
        if attempted == 0 {
            return 1.0;
        }
        self.succeeded() as f64 / attempted as f64
    }

    pub fn is_full_success(&self) -> bool {
        !self.cancelled && self.failed() == 0 && self.errors.is_empty()
    }

    /// Process exit code: 0 full success, 1 partial, 2 fatal.
    pub fn exit_code(&self) -> i32 {
        if self.is_full_success() {
            0
        } else if self.succeeded() > 0 {
            1
        } else {
            2
        }
    }

    /// Units that failed, with their error kinds.
    pub fn failed_units(&self) -> Vec<(i64, ErrorKind, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                UnitStatus::Failed { kind, message } => Some((o.first_id, *kind, message.as_str())),
                _ => None,
            })
            .collect()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} units ok ({} skipped, {} failed), {} bytes, {:.1}s{}{}",
            self.mode.name(),
            self.succeeded(),
            self.outcomes.len(),
            self.skipped(),
            self.failed(),
            self.bytes_transferred(),
            self.wall_time.as_secs_f64(),
            if self.cancelled { ", cancelled" } else { "" },
            if self.unreclaimed_scratch.is_empty() {
                String::new()
            } else {
                format!(", {} scratch messages retained", self.unreclaimed_scratch.len())
            },
        )
    }
}
