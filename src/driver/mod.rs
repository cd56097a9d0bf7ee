//! Workflow driver: the top-level state machine.
//!
//! `start → fetch → group → distribute → (local | forward) → report`.
//! Stages are sequential at the aggregate level; per-session work
//! within a stage is concurrent. The driver owns the run's cancel
//! token and the event stream.

mod events;

pub use events::{spawn_log_subscriber, EventBus, RunEvent};

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::ChannelRef;
use crate::config::Config;
use crate::distribute::{self, Strategy};
use crate::download::{LocalDownloader, SessionDownloadResult};
use crate::fetch::{FetchError, MessageFetcher};
use crate::forward::StagedPipeline;
use crate::group::{fold_units, AtomicUnit};
use crate::limit::RateLimitController;
use crate::report::{ErrorKind, RunMode, RunReport, UnitOutcome, UnitStatus};
use crate::session::SessionPool;
use crate::shutdown::CancelToken;

/// Imbalance ratio above which the post-distribution check warns.
const BALANCE_TARGET: f64 = 0.4;

/// One run's parameters.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: RunMode,
    pub source: ChannelRef,
    pub start_id: i64,
    pub end_id: i64,
    pub targets: Vec<ChannelRef>,
    pub strategy: Strategy,
}

/// Fatal, run-aborting failures. Everything else lands in the report.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no logged-in sessions")]
    NoSessions,
}

pub struct WorkflowDriver {
    config: Arc<Config>,
    pool: Arc<SessionPool>,
    limits: Arc<RateLimitController>,
    cancel: CancelToken,
    events: EventBus,
}

impl WorkflowDriver {
    pub fn new(config: Arc<Config>, pool: Arc<SessionPool>) -> Self {
        let limits = Arc::new(RateLimitController::new(config.rate_limit.clone()));
        Self {
            config,
            pool,
            limits,
            cancel: CancelToken::new(),
            events: EventBus::new(),
        }
    }

    /// The run's cancellation handle; wire it to signal handling.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drive a full run to its terminal report.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, DriverError> {
        self.validate(&request)?;

        let sessions = self.pool.list_logged_in();
        if sessions.is_empty() {
            return Err(DriverError::NoSessions);
        }
        for session in &sessions {
            self.limits.register_session(session);
        }

        let started = Instant::now();
        let mut report = RunReport::new(request.mode);

        info!(
            mode = request.mode.name(),
            source = %request.source,
            start_id = request.start_id,
            end_id = request.end_id,
            sessions = sessions.len(),
            targets = request.targets.len(),
            "run started"
        );

        // Fetch.
        self.events.emit(RunEvent::StageStarted { stage: "fetch" });
        let fetcher = MessageFetcher::new(
            self.pool.clone(),
            self.limits.clone(),
            self.config.timeouts.clone(),
            self.cancel.clone(),
        );
        let fetched = match fetcher.fetch(&request.source, request.start_id, request.end_id).await {
            Ok(outcome) => outcome,
            Err(FetchError::Cancelled) => {
                report.cancelled = true;
                report.wall_time = started.elapsed();
                return Ok(report);
            }
            Err(FetchError::InvalidRange { start, end }) => {
                return Err(DriverError::Validation(format!("invalid id range {start}..={end}")));
            }
            Err(FetchError::NoSessions) => return Err(DriverError::NoSessions),
        };
        self.events.emit(RunEvent::FetchFinished {
            fetched: fetched.messages.len(),
            requested: (request.end_id - request.start_id + 1) as usize,
        });
        report.errors.extend(fetched.errors);

        // Group.
        self.events.emit(RunEvent::StageStarted { stage: "group" });
        let units = fold_units(fetched.messages);

        // Distribute.
        self.events.emit(RunEvent::StageStarted { stage: "distribute" });
        let assignment = match distribute::distribute(units, &sessions, request.strategy) {
            Ok(assignment) => assignment,
            Err(e) => return Err(DriverError::Validation(e.to_string())),
        };
        distribute::check_balance(&assignment, BALANCE_TARGET);

        // Execute.
        let outcomes = match request.mode {
            RunMode::Download => {
                self.events.emit(RunEvent::StageStarted { stage: "download" });
                self.run_download(assignment).await
            }
            RunMode::Forward => {
                self.events.emit(RunEvent::StageStarted { stage: "forward" });
                self.run_forward(assignment, &request.targets, &mut report).await
            }
        };

        for outcome in &outcomes {
            self.events.emit(RunEvent::UnitFinished {
                session: outcome.session.clone(),
                first_id: outcome.first_id,
                ok: outcome.status.is_ok(),
            });
        }
        report.outcomes = outcomes;
        report.outcomes.sort_by_key(|o| o.first_id);
        report.cancelled = self.cancel.is_cancelled();
        report.wall_time = started.elapsed();

        self.events.emit(RunEvent::RunFinished { summary: report.summary() });
        info!(summary = %report.summary(), "run complete");
        Ok(report)
    }

    fn validate(&self, request: &RunRequest) -> Result<(), DriverError> {
        if request.source.as_str().is_empty() {
            return Err(DriverError::Validation("source channel is empty".into()));
        }
        if request.start_id <= 0 || request.end_id < request.start_id {
            return Err(DriverError::Validation(format!(
                "invalid id range {}..={}",
                request.start_id, request.end_id
            )));
        }
        match request.mode {
            RunMode::Forward if request.targets.is_empty() => {
                Err(DriverError::Validation("forward mode requires at least one target".into()))
            }
            RunMode::Download if !request.targets.is_empty() => {
                Err(DriverError::Validation("download mode takes no targets".into()))
            }
            _ => Ok(()),
        }
    }

    /// Local-download execution with reassignment: units a lost session
    /// could not finish move to surviving sessions.
    async fn run_download(&self, mut assignment: distribute::Assignment) -> Vec<UnitOutcome> {
        let downloader = Arc::new(LocalDownloader::new(
            self.pool.clone(),
            self.limits.clone(),
            self.config.download.clone(),
            self.config.timeouts.clone(),
            self.cancel.clone(),
        ));

        let mut outcomes = Vec::new();
        let mut sessions: Vec<String> = self.pool.list_logged_in();

        loop {
            let mut tasks: JoinSet<SessionDownloadResult> = JoinSet::new();
            for session in &sessions {
                let units = assignment.take(session);
                if units.is_empty() {
                    continue;
                }
                let downloader = downloader.clone();
                let session = session.clone();
                tasks.spawn(async move { downloader.run_session(&session, units).await });
            }

            let mut unfinished: Vec<AtomicUnit> = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(mut result) => {
                        outcomes.append(&mut result.outcomes);
                        unfinished.extend(result.unfinished);
                    }
                    Err(e) => warn!(error = %e, "download worker panicked"),
                }
            }

            if unfinished.is_empty() || self.cancel.is_cancelled() {
                for unit in unfinished {
                    outcomes.push(failed_outcome(
                        &unit,
                        "",
                        ErrorKind::Cancelled,
                        "cancelled before download",
                    ));
                }
                break;
            }

            // Reassign what the lost sessions left behind.
            sessions = self.pool.list_logged_in();
            if sessions.is_empty() {
                warn!(units = unfinished.len(), "no sessions left for reassignment");
                for unit in unfinished {
                    outcomes.push(failed_outcome(
                        &unit,
                        "",
                        ErrorKind::Authorization,
                        "no sessions left",
                    ));
                }
                break;
            }

            info!(
                units = unfinished.len(),
                sessions = sessions.len(),
                "reassigning units from lost sessions"
            );
            assignment = match distribute::distribute(
                unfinished,
                &sessions,
                Strategy::MediaGroupAware,
            ) {
                Ok(assignment) => assignment,
                Err(_) => break,
            };
        }

        outcomes
    }

    /// Forward execution: one staged pipeline per session, in parallel.
    async fn run_forward(
        &self,
        mut assignment: distribute::Assignment,
        targets: &[ChannelRef],
        report: &mut RunReport,
    ) -> Vec<UnitOutcome> {
        let sessions: Vec<String> = self.pool.list_logged_in();
        let mut tasks: JoinSet<crate::forward::SessionForwardResult> = JoinSet::new();

        for session in &sessions {
            let units = assignment.take(session);
            if units.is_empty() {
                continue;
            }
            let pipeline = StagedPipeline::new(
                self.pool.clone(),
                self.limits.clone(),
                self.config.forward.clone(),
                self.config.timeouts.clone(),
                self.cancel.clone(),
                session,
                targets.to_vec(),
            );
            tasks.spawn(async move { pipeline.run(units).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(mut result) => {
                    outcomes.append(&mut result.outcomes);
                    report.unreclaimed_scratch.extend(result.retained);
                    report.errors.extend(result.errors);
                }
                Err(e) => {
                    warn!(error = %e, "forward worker panicked");
                    report.errors.push(format!("forward worker panicked: {e}"));
                }
            }
        }

        outcomes
    }
}

fn failed_outcome(unit: &AtomicUnit, session: &str, kind: ErrorKind, message: &str) -> UnitOutcome {
    let mut outcome = UnitOutcome::new(unit.first_id(), session);
    outcome.status = UnitStatus::failed(kind, message);
    outcome
}
