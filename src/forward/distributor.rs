//! Stage 2 sends: fans batches out to destination channels on the
//! owning session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{ChannelRef, ClientError, MediaSource, SentMessage};
use crate::config::{ForwardConfig, TimeoutConfig};
use crate::limit::{FloodAction, OpClass, RateLimitController};
use crate::session::SessionPool;
use crate::shutdown::CancelToken;

use super::batch::SendBatch;

/// Result of one batch send to one destination.
#[derive(Debug, Clone)]
pub struct BatchSendResult {
    pub destination: ChannelRef,
    pub batch_index: usize,
    pub unit_ids: Vec<i64>,
    pub success: bool,
    pub message_ids: Vec<i64>,
    pub error: Option<String>,
    pub retries: u32,
}

pub struct TargetDistributor {
    pool: Arc<SessionPool>,
    limits: Arc<RateLimitController>,
    config: ForwardConfig,
    timeouts: TimeoutConfig,
    cancel: CancelToken,
}

impl TargetDistributor {
    pub fn new(
        pool: Arc<SessionPool>,
        limits: Arc<RateLimitController>,
        config: ForwardConfig,
        timeouts: TimeoutConfig,
        cancel: CancelToken,
    ) -> Self {
        Self { pool, limits, config, timeouts, cancel }
    }

    /// Send `batches` to every destination, batches in source order per
    /// destination. Scratch is session-local, so a suspended session is
    /// waited out rather than replaced; retries are bounded.
    pub async fn send_batches(
        &self,
        session: &str,
        batches: &[SendBatch],
        destinations: &[ChannelRef],
    ) -> Vec<BatchSendResult> {
        let mut results = Vec::with_capacity(batches.len() * destinations.len());

        for destination in destinations {
            for (batch_index, batch) in batches.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    results.push(BatchSendResult {
                        destination: destination.clone(),
                        batch_index,
                        unit_ids: batch.unit_ids.clone(),
                        success: false,
                        message_ids: Vec::new(),
                        error: Some("cancelled".into()),
                        retries: 0,
                    });
                    continue;
                }

                results.push(self.send_one(session, destination, batch_index, batch).await);

                if !self.config.batch_pacing.is_zero() {
                    tokio::time::sleep(self.config.batch_pacing).await;
                }
            }
        }

        results
    }

    async fn send_one(
        &self,
        session: &str,
        destination: &ChannelRef,
        batch_index: usize,
        batch: &SendBatch,
    ) -> BatchSendResult {
        let mut result = BatchSendResult {
            destination: destination.clone(),
            batch_index,
            unit_ids: batch.unit_ids.clone(),
            success: false,
            message_ids: Vec::new(),
            error: None,
            retries: 0,
        };

        loop {
            if self
                .limits
                .admit(session, OpClass::Upload, &self.cancel)
                .await
                .is_err()
            {
                result.error = Some("cancelled".into());
                return result;
            }

            match self.invoke_send(session, destination, batch).await {
                Ok(sent) => {
                    self.limits.on_success(session);
                    result.success = true;
                    result.message_ids = sent.iter().map(|m| m.id).collect();
                    result.error = None;
                    debug!(
                        session,
                        destination = %destination,
                        batch = batch_index,
                        items = batch.handles.len(),
                        "batch delivered"
                    );
                    return result;
                }
                Err(ClientError::FloodWait { seconds }) => {
                    match self.limits.on_flood_wait(session, seconds) {
                        FloodAction::Absorb(wait) => {
                            tokio::time::sleep(wait).await;
                            // Absorbed waits do not consume a retry.
                        }
                        FloodAction::Suspend { .. } => {
                            // Scratch handles only exist on this
                            // session; wait the suspension out and
                            // retry here, up to the retry bound.
                            if result.retries >= self.config.send_retries {
                                result.error =
                                    Some(format!("flood wait {seconds}s, retries exhausted"));
                                return result;
                            }
                            result.retries += 1;
                            warn!(
                                session,
                                destination = %destination,
                                seconds,
                                retry = result.retries,
                                "suspended during batch send, will retry on same session"
                            );
                            if self.limits.wait_ready(session, &self.cancel).await.is_err() {
                                result.error = Some("cancelled".into());
                                return result;
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() && result.retries < self.config.send_retries => {
                    result.retries += 1;
                    self.limits.on_failure(session);
                    let backoff = Duration::from_secs(1) * 2u32.pow(result.retries - 1);
                    warn!(
                        session,
                        destination = %destination,
                        error = %e,
                        retry = result.retries,
                        "transient send error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.limits.on_failure(session);
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        }
    }

    async fn invoke_send(
        &self,
        session: &str,
        destination: &ChannelRef,
        batch: &SendBatch,
    ) -> Result<Vec<SentMessage>, ClientError> {
        let lease = self
            .pool
            .lease(session)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let deadline = self.timeouts.upload;
        let caption = batch.caption.as_deref().filter(|c| !c.is_empty());

        if batch.is_singleton() {
            let handle = &batch.handles[0];
            let send = lease.transport().send_media(
                destination,
                handle.kind,
                MediaSource::Id(handle.media_id.clone()),
                caption,
            );
            let sent = tokio::time::timeout(deadline, send)
                .await
                .map_err(|_| ClientError::Timeout(deadline))??;
            Ok(vec![sent])
        } else {
            let items = batch.group_items();
            let send = lease.transport().send_media_group(destination, &items, caption);
            tokio::time::timeout(deadline, send)
                .await
                .map_err(|_| ClientError::Timeout(deadline))?
        }
    }
}
