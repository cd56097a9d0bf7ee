//! Staged-forward pipeline: acquisition into scratch, regroup and
//! fan-out, reclamation.
//!
//! One pipeline instance per session. Stages within a session run
//! sequentially to preserve source order and per-session rate limits;
//! distinct sessions run their pipelines in parallel.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ChannelRef, ClientError, MediaSource, Message};
use crate::config::{ForwardConfig, TimeoutConfig};
use crate::group::AtomicUnit;
use crate::limit::{FloodAction, OpClass, RateLimitController};
use crate::report::{DestinationOutcome, ErrorKind, ScratchRef, UnitOutcome, UnitStatus};
use crate::session::SessionPool;
use crate::shutdown::CancelToken;
use crate::template;

use super::batch::{rebatch, split_unit, SendBatch};
use super::distributor::{BatchSendResult, TargetDistributor};
use super::scratch::{ScratchHandle, ScratchLedger, ScratchUnit};

/// Transient retries per staged message.
const STAGE_RETRIES: u32 = 3;

/// Passes over the stage-1 flood-wait queue before giving up.
const QUEUE_PASSES: u32 = 2;

/// Deadline for best-effort reclamation on abort.
const EMERGENCY_DEADLINE: Duration = Duration::from_secs(5);

/// In-memory acquisition switches to the chunk stream at this size.
const STAGE_SMALL_CAP: u64 = 50 * 1024 * 1024;

/// Aggregate pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Staging,
    Stage1Failed,
    Staged,
    Distributing,
    Distributed,
    PartialDistributed,
    Cleaning,
    EmergencyCleanup,
    Done(RunVerdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    Success,
    Partial,
    Failure,
}

/// What one session's pipeline produced.
#[derive(Debug)]
pub struct SessionForwardResult {
    pub outcomes: Vec<UnitOutcome>,
    /// Scratch left on the service deliberately (failed units under the
    /// default retention policy) or because cleanup itself failed
    pub retained: Vec<ScratchRef>,
    pub errors: Vec<String>,
    pub scratch_created: u64,
    pub scratch_reclaimed: u64,
    pub state: PipelineState,
}

pub struct StagedPipeline {
    pool: Arc<SessionPool>,
    limits: Arc<RateLimitController>,
    config: ForwardConfig,
    timeouts: TimeoutConfig,
    cancel: CancelToken,
    session: String,
    destinations: Vec<ChannelRef>,
    distributor: TargetDistributor,
    ledger: ScratchLedger,
    state: PipelineState,
    errors: Vec<String>,
}

impl StagedPipeline {
    pub fn new(
        pool: Arc<SessionPool>,
        limits: Arc<RateLimitController>,
        config: ForwardConfig,
        timeouts: TimeoutConfig,
        cancel: CancelToken,
        session: &str,
        destinations: Vec<ChannelRef>,
    ) -> Self {
        let distributor = TargetDistributor::new(
            pool.clone(),
            limits.clone(),
            config.clone(),
            timeouts.clone(),
            cancel.clone(),
        );
        Self {
            pool,
            limits,
            config,
            timeouts,
            cancel,
            session: session.to_string(),
            destinations,
            distributor,
            ledger: ScratchLedger::new(session),
            state: PipelineState::Idle,
            errors: Vec::new(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(session = %self.session, from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    /// Drive the full pipeline for this session's assigned units.
    pub async fn run(mut self, units: Vec<AtomicUnit>) -> SessionForwardResult {
        info!(
            session = %self.session,
            units = units.len(),
            destinations = self.destinations.len(),
            "forward pipeline started"
        );

        let mut outcomes: Vec<UnitOutcome> = Vec::new();

        // Stage 1: acquisition into scratch.
        self.transition(PipelineState::Staging);
        let staged = self.stage_all(units, &mut outcomes).await;

        if staged.is_empty() {
            if outcomes.iter().any(|o| matches!(o.status, UnitStatus::Failed { .. })) {
                self.transition(PipelineState::Stage1Failed);
                self.emergency_cleanup().await;
            }
            return self.finish(outcomes);
        }

        if self.cancel.is_cancelled() {
            self.abort_staged(&staged, &mut outcomes).await;
            return self.finish(outcomes);
        }

        self.transition(PipelineState::Staged);

        // Stage 2 + 3: regroup, fan out, reclaim.
        self.transition(PipelineState::Distributing);
        if self.config.preserve_structure {
            self.distribute_preserving(&staged, &mut outcomes).await;
        } else {
            self.distribute_rebatched(&staged, &mut outcomes).await;
        }

        let all_ok = outcomes.iter().all(|o| !matches!(o.status, UnitStatus::Failed { .. }));
        self.transition(if all_ok {
            PipelineState::Distributed
        } else {
            PipelineState::PartialDistributed
        });

        self.transition(PipelineState::Cleaning);
        self.finish(outcomes)
    }

    fn finish(mut self, outcomes: Vec<UnitOutcome>) -> SessionForwardResult {
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Failed { .. }))
            .count();
        let succeeded = outcomes.iter().filter(|o| o.status.is_ok()).count();

        let verdict = if failed == 0 {
            RunVerdict::Success
        } else if succeeded > 0 {
            RunVerdict::Partial
        } else {
            RunVerdict::Failure
        };
        self.transition(PipelineState::Done(verdict));

        let retained = self.ledger.retained();
        if !retained.is_empty() {
            warn!(
                session = %self.session,
                retained = retained.len(),
                "scratch messages left on service"
            );
        }

        info!(
            session = %self.session,
            succeeded,
            failed,
            scratch_created = self.ledger.created(),
            scratch_reclaimed = self.ledger.reclaimed(),
            "forward pipeline finished"
        );

        SessionForwardResult {
            outcomes,
            retained,
            errors: self.errors,
            scratch_created: self.ledger.created(),
            scratch_reclaimed: self.ledger.reclaimed(),
            state: self.state,
        }
    }

    // ---- stage 1 ----

    /// Stage every unit, with a session-local retry queue for units
    /// deferred by a long flood wait.
    async fn stage_all(
        &mut self,
        units: Vec<AtomicUnit>,
        outcomes: &mut Vec<UnitOutcome>,
    ) -> Vec<ScratchUnit> {
        let mut staged: Vec<ScratchUnit> = Vec::new();
        let mut queue: Vec<AtomicUnit> = Vec::new();
        let mut pending = units;

        for pass in 0..=QUEUE_PASSES {
            if pass > 0 {
                if queue.is_empty() {
                    break;
                }
                if self.limits.wait_ready(&self.session, &self.cancel).await.is_err() {
                    break;
                }
                pending = std::mem::take(&mut queue);
                debug!(session = %self.session, units = pending.len(), pass, "draining stage-1 retry queue");
            }

            let mut iter = pending.drain(..);
            while let Some(unit) = iter.next() {
                if self.cancel.is_cancelled() {
                    for unit in std::iter::once(unit).chain(iter).chain(std::mem::take(&mut queue)) {
                        outcomes.push(cancelled_outcome(&unit, &self.session, "cancelled before staging"));
                    }
                    return staged;
                }

                if !unit.messages().iter().any(Message::has_media) {
                    let mut outcome = UnitOutcome::new(unit.first_id(), &self.session);
                    outcome.status = UnitStatus::Skipped;
                    outcomes.push(outcome);
                    continue;
                }

                match self.stage_unit(&unit).await {
                    Ok(scratch_unit) => staged.push(scratch_unit),
                    Err(StageError::Defer) => queue.push(unit),
                    Err(StageError::Cancelled) => {
                        outcomes.push(cancelled_outcome(&unit, &self.session, "cancelled during staging"));
                    }
                    Err(StageError::Failed { kind, message }) => {
                        let mut outcome = UnitOutcome::new(unit.first_id(), &self.session);
                        outcome.status = UnitStatus::failed(kind, message);
                        outcomes.push(outcome);
                    }
                }
            }
        }

        for unit in queue {
            let mut outcome = UnitOutcome::new(unit.first_id(), &self.session);
            outcome.status =
                UnitStatus::failed(ErrorKind::RateLimit, "staging deferred by repeated flood waits");
            outcomes.push(outcome);
        }

        staged.sort_by_key(ScratchUnit::first_id);
        info!(session = %self.session, staged = staged.len(), "stage 1 complete");
        staged
    }

    /// Stage one unit: acquire each message's media and re-send it into
    /// the self chat. Partial scratch is reclaimed on failure so a
    /// retry never duplicates.
    async fn stage_unit(&mut self, unit: &AtomicUnit) -> Result<ScratchUnit, StageError> {
        let me = ChannelRef::self_chat();
        let mut handles: Vec<ScratchHandle> = Vec::new();

        for message in unit.messages() {
            if !message.has_media() {
                continue;
            }

            let staged = self.stage_message(&me, message).await;
            match staged {
                Ok(handle) => {
                    self.ledger.record(&handle);
                    handles.push(handle);
                }
                Err(e) => {
                    let ids: Vec<i64> = handles.iter().map(|h| h.message_id).collect();
                    if !ids.is_empty() {
                        debug!(
                            session = %self.session,
                            unit = unit.first_id(),
                            partial = ids.len(),
                            "reclaiming partial scratch after stage failure"
                        );
                        self.delete_scratch_best_effort(&ids).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(ScratchUnit { source: unit.clone(), handles })
    }

    async fn stage_message(
        &mut self,
        me: &ChannelRef,
        message: &Message,
    ) -> Result<ScratchHandle, StageError> {
        let data = self.acquire_media(message).await?;

        let mut attempt = 0;
        loop {
            self.limits
                .admit(&self.session, OpClass::Upload, &self.cancel)
                .await
                .map_err(|_| StageError::Cancelled)?;

            let result = self.upload_to_self(me, message, data.clone()).await;
            match result {
                Ok(handle) => return Ok(handle),
                Err(ClientError::FloodWait { seconds }) => {
                    match self.limits.on_flood_wait(&self.session, seconds) {
                        FloodAction::Absorb(wait) => tokio::time::sleep(wait).await,
                        FloodAction::Suspend { .. } => return Err(StageError::Defer),
                    }
                }
                Err(e) if e.is_fatal_for_session() => {
                    self.pool.mark_error(&self.session, &e.to_string());
                    return Err(StageError::Failed {
                        kind: ErrorKind::Authorization,
                        message: e.to_string(),
                    });
                }
                Err(ClientError::FileTooLarge { size }) => {
                    return Err(StageError::Failed {
                        kind: ErrorKind::Resource,
                        message: format!("file exceeds service cap: {size} bytes"),
                    });
                }
                Err(e) if e.is_transient() && attempt < STAGE_RETRIES => {
                    attempt += 1;
                    self.limits.on_failure(&self.session);
                    let backoff = Duration::from_secs(1) * 2u32.pow(attempt - 1);
                    warn!(session = %self.session, message = message.id, error = %e, attempt, "transient staging error");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.limits.on_failure(&self.session);
                    return Err(StageError::Failed {
                        kind: ErrorKind::Transient,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Pull the message's media into memory, with flood and transient
    /// handling.
    async fn acquire_media(&mut self, message: &Message) -> Result<Bytes, StageError> {
        let mut attempt = 0;
        loop {
            self.limits
                .admit(&self.session, OpClass::Download, &self.cancel)
                .await
                .map_err(|_| StageError::Cancelled)?;

            match self.fetch_bytes(message).await {
                Ok(data) => {
                    self.limits.on_success(&self.session);
                    return Ok(data);
                }
                Err(ClientError::FloodWait { seconds }) => {
                    match self.limits.on_flood_wait(&self.session, seconds) {
                        FloodAction::Absorb(wait) => tokio::time::sleep(wait).await,
                        FloodAction::Suspend { .. } => return Err(StageError::Defer),
                    }
                }
                Err(e) if e.is_fatal_for_session() => {
                    self.pool.mark_error(&self.session, &e.to_string());
                    return Err(StageError::Failed {
                        kind: ErrorKind::Authorization,
                        message: e.to_string(),
                    });
                }
                Err(e) if e.is_transient() && attempt < STAGE_RETRIES => {
                    attempt += 1;
                    self.limits.on_failure(&self.session);
                    tokio::time::sleep(Duration::from_secs(1) * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    self.limits.on_failure(&self.session);
                    return Err(StageError::Failed {
                        kind: ErrorKind::Transient,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_bytes(&self, message: &Message) -> Result<Bytes, ClientError> {
        let lease = self
            .pool
            .lease(&self.session)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if message.size < STAGE_SMALL_CAP {
            let deadline = self.timeouts.download_small;
            tokio::time::timeout(deadline, lease.transport().download_small(message))
                .await
                .map_err(|_| ClientError::Timeout(deadline))?
        } else {
            let mut stream = lease.transport().stream_media(message).await?;
            let mut buf = BytesMut::with_capacity(message.size as usize);
            let progress = self.timeouts.stream_progress;
            loop {
                let chunk = tokio::time::timeout(progress, stream.next())
                    .await
                    .map_err(|_| ClientError::Timeout(progress))?;
                match chunk {
                    Some(chunk) => buf.extend_from_slice(&chunk?),
                    None => break,
                }
            }
            Ok(buf.freeze())
        }
    }

    async fn upload_to_self(
        &self,
        me: &ChannelRef,
        message: &Message,
        data: Bytes,
    ) -> Result<ScratchHandle, ClientError> {
        let lease = self
            .pool
            .lease(&self.session)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let file_name = message
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}", message.id));
        let deadline = self.timeouts.upload;

        let sent = tokio::time::timeout(
            deadline,
            lease.transport().send_media(
                me,
                message.kind,
                MediaSource::Bytes { data, file_name },
                message.caption.as_deref(),
            ),
        )
        .await
        .map_err(|_| ClientError::Timeout(deadline))??;

        let media_id = sent.media_id.ok_or_else(|| {
            ClientError::Transport("scratch upload returned no media identifier".into())
        })?;

        Ok(ScratchHandle {
            session: self.session.clone(),
            message_id: sent.id,
            media_id,
            kind: message.kind,
            caption: message.caption.clone(),
            created_at: Instant::now(),
        })
    }

    // ---- stage 2 + 3 ----

    /// Preserve-structure distribution: each unit's batches go out in
    /// source order, then the unit's scratch is reclaimed per policy.
    async fn distribute_preserving(
        &mut self,
        staged: &[ScratchUnit],
        outcomes: &mut Vec<UnitOutcome>,
    ) {
        for (index, unit) in staged.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.abort_staged(&staged[index..], outcomes).await;
                return;
            }

            let (caption, truncated) = self.render_caption(unit);
            let batches = split_unit(unit, caption.as_deref(), self.config.batch_size);
            let results = self
                .distributor
                .send_batches(&self.session, &batches, &self.destinations)
                .await;

            let mut outcome = self.unit_outcome_from(unit, &results);
            outcome.caption_truncated = truncated;

            self.cleanup_unit(unit, outcome.status.is_ok()).await;
            outcomes.push(outcome);
        }
    }

    /// Legacy distribution: handles merge across units into full
    /// batches; outcomes are attributed back through batch coverage.
    async fn distribute_rebatched(
        &mut self,
        staged: &[ScratchUnit],
        outcomes: &mut Vec<UnitOutcome>,
    ) {
        // Template output replaces the preserved caption on each unit's
        // lead handle, so merged batches still carry rendered captions
        // at unit boundaries.
        let mut units: Vec<ScratchUnit> = staged.to_vec();
        let mut truncated_units: Vec<i64> = Vec::new();
        for unit in &mut units {
            let (caption, truncated) = self.render_caption(unit);
            if truncated {
                truncated_units.push(unit.first_id());
            }
            if let Some(first) = unit.handles.first_mut() {
                first.caption = caption;
            }
        }

        let batches: Vec<SendBatch> = rebatch(&units, self.config.batch_size);
        let results = self
            .distributor
            .send_batches(&self.session, &batches, &self.destinations)
            .await;

        for unit in &units {
            let relevant: Vec<BatchSendResult> = results
                .iter()
                .filter(|r| r.unit_ids.contains(&unit.first_id()))
                .cloned()
                .collect();

            let mut outcome = self.unit_outcome_from(unit, &relevant);
            outcome.caption_truncated = truncated_units.contains(&unit.first_id());

            self.cleanup_unit(unit, outcome.status.is_ok()).await;
            outcomes.push(outcome);
        }
    }

    /// Render the unit's caption, bounded by the session's caption cap.
    fn render_caption(&self, unit: &ScratchUnit) -> (Option<String>, bool) {
        let lead = unit.source.lead_message();
        let vars = template::variables_for(lead);
        let template_str = if self.config.template.is_empty() {
            template::PASSTHROUGH_TEMPLATE
        } else {
            &self.config.template
        };

        let rendered = template::render(template_str, &vars);
        if rendered.is_empty() {
            return (None, false);
        }

        let cap = self
            .pool
            .get(&self.session)
            .map(|s| s.caption_cap())
            .unwrap_or(crate::client::CAPTION_CAP);
        let (caption, truncated) = template::truncate_caption(&rendered, cap);
        if truncated {
            warn!(
                session = %self.session,
                unit = unit.first_id(),
                cap,
                "caption truncated at word boundary"
            );
        }
        debug!(unit = unit.first_id(), caption = %template::preview(&caption), "caption rendered");
        (Some(caption), truncated)
    }

    /// Fold batch results into the unit's per-destination outcomes.
    fn unit_outcome_from(&self, unit: &ScratchUnit, results: &[BatchSendResult]) -> UnitOutcome {
        let mut outcome = UnitOutcome::new(unit.first_id(), &self.session);
        outcome.bytes = unit.source.weight();

        for destination in &self.destinations {
            let for_dest: Vec<&BatchSendResult> =
                results.iter().filter(|r| &r.destination == destination).collect();

            let success = !for_dest.is_empty() && for_dest.iter().all(|r| r.success);
            let message_ids = for_dest.iter().flat_map(|r| r.message_ids.clone()).collect();
            let error = for_dest.iter().find_map(|r| r.error.clone());
            let retries = for_dest.iter().map(|r| r.retries).sum();

            outcome.destinations.push(DestinationOutcome {
                destination: destination.clone(),
                success,
                message_ids,
                error,
                retries,
            });
        }

        let failed: Vec<&DestinationOutcome> =
            outcome.destinations.iter().filter(|d| !d.success).collect();
        if !failed.is_empty() {
            let message = failed
                .iter()
                .map(|d| {
                    format!(
                        "{}: {}",
                        d.destination,
                        d.error.as_deref().unwrap_or("send failed")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            let kind = if failed.iter().any(|d| {
                d.error.as_deref().is_some_and(|e| e.contains("cancelled"))
            }) {
                ErrorKind::Cancelled
            } else if failed.iter().any(|d| {
                d.error.as_deref().is_some_and(|e| e.contains("flood"))
            }) {
                ErrorKind::RateLimit
            } else {
                ErrorKind::Transient
            };
            outcome.status = UnitStatus::failed(kind, message);
        }

        outcome
    }

    /// Stage 3 for one unit: reclaim scratch per policy, or retain it
    /// for inspection.
    async fn cleanup_unit(&mut self, unit: &ScratchUnit, success: bool) {
        let ids = unit.scratch_ids();
        if ids.is_empty() {
            return;
        }

        // An aborted run reclaims unconditionally; the retention policy
        // only governs ordinary send failures.
        if self.cancel.is_cancelled() {
            self.delete_scratch_best_effort(&ids).await;
            return;
        }

        let reclaim = if success {
            self.config.cleanup_on_success
        } else {
            self.config.cleanup_on_failure
        };

        if !reclaim {
            debug!(
                session = %self.session,
                unit = unit.first_id(),
                scratch = ids.len(),
                "retaining scratch per cleanup policy"
            );
            return;
        }

        if let Err(e) = self.delete_scratch(&ids).await {
            let message = format!("scratch cleanup failed for unit {}: {e}", unit.first_id());
            warn!(session = %self.session, error = %e, unit = unit.first_id(), "scratch cleanup failed");
            self.errors.push(message);
        }
    }

    /// Delete scratch ids under admission and deadline, updating the
    /// ledger on success.
    async fn delete_scratch(&mut self, ids: &[i64]) -> Result<(), ClientError> {
        self.limits
            .admit(&self.session, OpClass::Delete, &self.cancel)
            .await
            .map_err(|_| ClientError::Transport("admission cancelled".into()))?;

        let lease = self
            .pool
            .lease(&self.session)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let me = ChannelRef::self_chat();
        let deadline = self.timeouts.delete;
        let result = tokio::time::timeout(deadline, lease.transport().delete_messages(&me, ids))
            .await
            .map_err(|_| ClientError::Timeout(deadline))?;

        match result {
            Ok(()) => {
                self.ledger.reclaim(ids);
                Ok(())
            }
            Err(ClientError::FloodWait { seconds }) => {
                // One inline absorb regardless of length; cleanup must
                // not stall the pipeline indefinitely.
                match self.limits.on_flood_wait(&self.session, seconds) {
                    FloodAction::Absorb(wait) => {
                        tokio::time::sleep(wait).await;
                        let lease = self
                            .pool
                            .lease(&self.session)
                            .await
                            .map_err(|e| ClientError::Transport(e.to_string()))?;
                        tokio::time::timeout(deadline, lease.transport().delete_messages(&me, ids))
                            .await
                            .map_err(|_| ClientError::Timeout(deadline))??;
                        self.ledger.reclaim(ids);
                        Ok(())
                    }
                    FloodAction::Suspend { .. } => Err(ClientError::FloodWait { seconds }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort deletion outside the admission path, used when the
    /// pipeline is unwinding and the cancel token may already be set.
    async fn delete_scratch_best_effort(&mut self, ids: &[i64]) {
        let lease = match self.pool.lease(&self.session).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(session = %self.session, error = %e, "emergency cleanup could not lease session");
                return;
            }
        };

        let me = ChannelRef::self_chat();
        match tokio::time::timeout(EMERGENCY_DEADLINE, lease.transport().delete_messages(&me, ids))
            .await
        {
            Ok(Ok(())) => self.ledger.reclaim(ids),
            Ok(Err(e)) => {
                warn!(session = %self.session, error = %e, "emergency cleanup delete failed")
            }
            Err(_) => warn!(session = %self.session, "emergency cleanup timed out"),
        }
    }

    /// Reclaim everything outstanding; residuals stay in the ledger and
    /// are reported.
    async fn emergency_cleanup(&mut self) {
        let outstanding = self.ledger.outstanding_ids();
        if outstanding.is_empty() {
            return;
        }

        self.transition(PipelineState::EmergencyCleanup);
        info!(
            session = %self.session,
            scratch = outstanding.len(),
            "emergency cleanup of scratch handles"
        );
        self.delete_scratch_best_effort(&outstanding).await;
    }

    /// Mark still-staged units cancelled and reclaim their scratch.
    async fn abort_staged(&mut self, staged: &[ScratchUnit], outcomes: &mut Vec<UnitOutcome>) {
        for unit in staged {
            outcomes.push(cancelled_outcome(
                &unit.source,
                &self.session,
                "cancelled before distribution",
            ));
        }
        self.emergency_cleanup().await;
    }
}

fn cancelled_outcome(unit: &AtomicUnit, session: &str, message: &str) -> UnitOutcome {
    let mut outcome = UnitOutcome::new(unit.first_id(), session);
    outcome.status = UnitStatus::failed(ErrorKind::Cancelled, message);
    outcome
}

enum StageError {
    /// Long flood wait: defer the unit to the session-local queue
    Defer,
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}
