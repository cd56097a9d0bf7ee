//! Parallel range retrieval.
//!
//! The requested id range is sliced across logged-in sessions; each
//! slice is fetched in batches under rate-limit admission. Failed
//! slices fail over to alternate sessions; whatever cannot be fetched
//! after all sessions have been tried is reported alongside the
//! partial result.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{ChannelRef, ClientError, Message};
use crate::config::TimeoutConfig;
use crate::limit::{FloodAction, OpClass, RateLimitController};
use crate::session::SessionPool;
use crate::shutdown::CancelToken;

/// Remote batch size cap for message fetches.
const FETCH_BATCH: usize = 100;

/// Stagger between slice starts so first calls do not land together.
const SLICE_STAGGER: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid id range: {start}..={end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("no logged-in sessions")]
    NoSessions,

    #[error("fetch cancelled")]
    Cancelled,
}

/// Fetch result: messages in ascending id order plus any slice errors.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub messages: Vec<Message>,
    pub errors: Vec<String>,
}

/// What one slice worker produced.
struct SliceResult {
    messages: Vec<Message>,
    /// Ids that could not be fetched, with the causing error
    failed: Option<(Vec<i64>, String)>,
}

pub struct MessageFetcher {
    pool: Arc<SessionPool>,
    limits: Arc<RateLimitController>,
    timeouts: TimeoutConfig,
    cancel: CancelToken,
}

impl MessageFetcher {
    pub fn new(
        pool: Arc<SessionPool>,
        limits: Arc<RateLimitController>,
        timeouts: TimeoutConfig,
        cancel: CancelToken,
    ) -> Self {
        Self { pool, limits, timeouts, cancel }
    }

    /// Fetch `[start_id, end_id]` from `channel`, merged in id order.
    ///
    /// Ids deleted in the source are silently skipped.
    pub async fn fetch(
        &self,
        channel: &ChannelRef,
        start_id: i64,
        end_id: i64,
    ) -> Result<FetchOutcome, FetchError> {
        if start_id <= 0 || end_id < start_id {
            return Err(FetchError::InvalidRange { start: start_id, end: end_id });
        }

        let sessions = self.pool.list_logged_in();
        if sessions.is_empty() {
            return Err(FetchError::NoSessions);
        }

        let ids: Vec<i64> = (start_id..=end_id).collect();
        let slices = slice_ids(&ids, sessions.len());

        info!(
            channel = %channel,
            start_id,
            end_id,
            sessions = sessions.len(),
            "fetching message range"
        );

        let mut tasks: JoinSet<SliceResult> = JoinSet::new();
        for (index, slice) in slices.into_iter().enumerate() {
            if slice.is_empty() {
                continue;
            }
            let session = sessions[index].clone();
            let fetcher = self.clone_parts();
            let channel = channel.clone();

            tasks.spawn(async move {
                tokio::time::sleep(SLICE_STAGGER * index as u32).await;
                fetcher.fetch_slice(&session, &channel, slice).await
            });
        }

        let mut outcome = FetchOutcome::default();
        let mut failed_slices: Vec<(Vec<i64>, String)> = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    outcome.messages.extend(result.messages);
                    if let Some(failed) = result.failed {
                        failed_slices.push(failed);
                    }
                }
                Err(e) => outcome.errors.push(format!("fetch worker panicked: {e}")),
            }
        }

        // Retry failed slices on alternate sessions.
        for (ids, first_error) in failed_slices {
            match self.retry_on_alternates(channel, ids, &sessions).await {
                Ok(messages) => outcome.messages.extend(messages),
                Err(error) => {
                    warn!(channel = %channel, error = %error, "slice failed on every session");
                    outcome.errors.push(format!("{first_error}; retries: {error}"));
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        outcome.messages.sort_by_key(|m| m.id);
        outcome.messages.dedup_by_key(|m| m.id);

        info!(
            fetched = outcome.messages.len(),
            requested = ids.len(),
            errors = outcome.errors.len(),
            "fetch complete"
        );

        Ok(outcome)
    }

    fn clone_parts(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            limits: self.limits.clone(),
            timeouts: self.timeouts.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Fetch one slice on one session, batch by batch. Returns what was
    /// fetched plus the unfetched remainder on failure.
    async fn fetch_slice(&self, session: &str, channel: &ChannelRef, ids: Vec<i64>) -> SliceResult {
        let mut messages = Vec::new();

        for (batch_index, batch) in ids.chunks(FETCH_BATCH).enumerate() {
            if self.cancel.is_cancelled() {
                return SliceResult { messages, failed: None };
            }

            match self.fetch_batch(session, channel, batch).await {
                Ok(mut fetched) => messages.append(&mut fetched),
                Err(error) => {
                    let remaining: Vec<i64> = ids
                        .iter()
                        .skip(batch_index * FETCH_BATCH)
                        .copied()
                        .collect();
                    return SliceResult {
                        messages,
                        failed: Some((remaining, error.to_string())),
                    };
                }
            }
        }

        debug!(session, fetched = messages.len(), "slice complete");
        SliceResult { messages, failed: None }
    }

    /// One batched remote fetch with admission, timeout and short
    /// flood-wait absorption.
    async fn fetch_batch(
        &self,
        session: &str,
        channel: &ChannelRef,
        batch: &[i64],
    ) -> Result<Vec<Message>, ClientError> {
        loop {
            self.limits
                .admit(session, OpClass::Fetch, &self.cancel)
                .await
                .map_err(|_| ClientError::Transport("admission cancelled".into()))?;

            let lease = self
                .pool
                .lease(session)
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;

            let deadline = self.timeouts.fetch;
            let result = tokio::time::timeout(
                deadline,
                lease.transport().fetch_messages(channel, batch),
            )
            .await
            .map_err(|_| ClientError::Timeout(deadline))
            .and_then(|r| r);

            match result {
                Ok(messages) => {
                    self.limits.on_success(session);
                    return Ok(messages);
                }
                Err(ClientError::FloodWait { seconds }) => {
                    match self.limits.on_flood_wait(session, seconds) {
                        FloodAction::Absorb(wait) => {
                            tokio::time::sleep(wait).await;
                        }
                        FloodAction::Suspend { .. } => {
                            return Err(ClientError::FloodWait { seconds });
                        }
                    }
                }
                Err(e) => {
                    self.limits.on_failure(session);
                    return Err(e);
                }
            }
        }
    }

    /// Retry a failed slice on each alternate session in turn.
    async fn retry_on_alternates(
        &self,
        channel: &ChannelRef,
        ids: Vec<i64>,
        sessions: &[String],
    ) -> Result<Vec<Message>, String> {
        let mut last_error = String::from("no alternate sessions");

        for session in sessions {
            if self.cancel.is_cancelled() {
                return Err("cancelled".into());
            }

            debug!(session = %session, ids = ids.len(), "retrying slice on alternate session");
            let result = self.fetch_slice(session, channel, ids.clone()).await;
            match result.failed {
                None => return Ok(result.messages),
                Some((_, error)) => last_error = error,
            }
        }

        Err(last_error)
    }
}

/// Partition ids into `count` contiguous slices of near-equal length.
fn slice_ids(ids: &[i64], count: usize) -> Vec<Vec<i64>> {
    let per_slice = ids.len() / count;
    let remainder = ids.len() % count;

    let mut slices = Vec::with_capacity(count);
    let mut offset = 0;
    for index in 0..count {
        let len = per_slice + usize::from(index < remainder);
        slices.push(ids[offset..offset + len].to_vec());
        offset += len;
    }
    slices
}
