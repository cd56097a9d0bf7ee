//! Local-download workflow: writes assigned media to disk per session
//! under rate-limit supervision.

mod naming;

pub use naming::{file_name_for, sanitize};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::client::{ClientError, MediaKind, Message};
use crate::config::{DownloadConfig, TimeoutConfig};
use crate::group::AtomicUnit;
use crate::limit::{FloodAction, OpClass, RateLimitController};
use crate::report::{ErrorKind, FileOutcome, UnitOutcome, UnitStatus};
use crate::session::SessionPool;
use crate::shutdown::CancelToken;

/// Transient download retries per file.
const FILE_RETRIES: u32 = 3;

/// Passes over the flood-wait retry queue before giving up on a unit.
const QUEUE_PASSES: u32 = 2;

/// What one session's download worker produced.
#[derive(Debug, Default)]
pub struct SessionDownloadResult {
    pub outcomes: Vec<UnitOutcome>,
    /// Units this session could not attempt (session lost); the driver
    /// reassigns them to surviving sessions
    pub unfinished: Vec<AtomicUnit>,
}

pub struct LocalDownloader {
    pool: Arc<SessionPool>,
    limits: Arc<RateLimitController>,
    config: DownloadConfig,
    timeouts: TimeoutConfig,
    cancel: CancelToken,
}

impl LocalDownloader {
    pub fn new(
        pool: Arc<SessionPool>,
        limits: Arc<RateLimitController>,
        config: DownloadConfig,
        timeouts: TimeoutConfig,
        cancel: CancelToken,
    ) -> Self {
        Self { pool, limits, config, timeouts, cancel }
    }

    /// Download one session's assigned units sequentially, preserving
    /// intra-group order. Units deferred by a long flood wait drain
    /// from a retry queue once the suspension expires.
    pub async fn run_session(&self, session: &str, units: Vec<AtomicUnit>) -> SessionDownloadResult {
        let mut result = SessionDownloadResult::default();
        let mut queue: Vec<AtomicUnit> = Vec::new();
        let mut pending = units;

        info!(session, units = pending.len(), "local download started");

        for pass in 0..=QUEUE_PASSES {
            if pass > 0 {
                if queue.is_empty() {
                    break;
                }
                // Wait out the suspension before draining the queue.
                if self.limits.wait_ready(session, &self.cancel).await.is_err() {
                    break;
                }
                pending = std::mem::take(&mut queue);
                debug!(session, units = pending.len(), pass, "draining retry queue");
            }

            let mut iter = pending.drain(..);
            while let Some(unit) = iter.next() {
                if self.cancel.is_cancelled() {
                    result.unfinished.push(unit);
                    result.unfinished.extend(iter);
                    result.unfinished.extend(std::mem::take(&mut queue));
                    return result;
                }

                match self.download_unit(session, &unit).await {
                    UnitVerdict::Done(outcome) => result.outcomes.push(outcome),
                    UnitVerdict::Requeue => {
                        debug!(session, unit = unit.first_id(), "unit deferred by flood wait");
                        queue.push(unit);
                    }
                    UnitVerdict::SessionLost(reason) => {
                        self.pool.mark_error(session, &reason);
                        result.unfinished.push(unit);
                        result.unfinished.extend(iter);
                        result.unfinished.extend(std::mem::take(&mut queue));
                        return result;
                    }
                }
            }
        }

        // Whatever is still queued after the final pass failed.
        for unit in queue {
            let mut outcome = UnitOutcome::new(unit.first_id(), session);
            outcome.status =
                UnitStatus::failed(ErrorKind::RateLimit, "deferred by repeated flood waits");
            result.outcomes.push(outcome);
        }

        info!(
            session,
            ok = result.outcomes.iter().filter(|o| o.status.is_ok()).count(),
            total = result.outcomes.len(),
            "local download finished"
        );
        result
    }

    async fn download_unit(&self, session: &str, unit: &AtomicUnit) -> UnitVerdict {
        let mut outcome = UnitOutcome::new(unit.first_id(), session);
        let mut all_skipped = !unit.messages().is_empty();

        for message in unit.messages() {
            if let Some(reason) = self.filter_reason(message) {
                debug!(session, message = message.id, reason, "media filtered");
                outcome.files.push(FileOutcome {
                    message_id: message.id,
                    kind: message.kind,
                    status: UnitStatus::Skipped,
                    path: None,
                    bytes: 0,
                });
                continue;
            }
            all_skipped = false;

            match self.download_file(session, message).await {
                Ok((path, bytes)) => {
                    outcome.bytes += bytes;
                    outcome.files.push(FileOutcome {
                        message_id: message.id,
                        kind: message.kind,
                        status: UnitStatus::Ok,
                        path: Some(path),
                        bytes,
                    });
                }
                Err(FileError::Defer) => return UnitVerdict::Requeue,
                Err(FileError::SessionLost(reason)) => return UnitVerdict::SessionLost(reason),
                Err(FileError::Failed { kind, message: error }) => {
                    outcome.files.push(FileOutcome {
                        message_id: message.id,
                        kind: message.kind,
                        status: UnitStatus::failed(kind, error.clone()),
                        path: None,
                        bytes: 0,
                    });
                    if outcome.status.is_ok() {
                        outcome.status = UnitStatus::failed(kind, error);
                    }
                }
            }
        }

        if all_skipped && outcome.status.is_ok() {
            outcome.status = UnitStatus::Skipped;
        }
        UnitVerdict::Done(outcome)
    }

    /// Why a media item is excluded, if it is.
    fn filter_reason(&self, message: &Message) -> Option<&'static str> {
        if !message.has_media() {
            return Some("no media");
        }
        if !self.config.include_kinds.is_empty()
            && !self.config.include_kinds.contains(&message.kind)
        {
            return Some("kind excluded");
        }
        if self.config.max_file_size > 0 && message.size > self.config.max_file_size {
            return Some("over size filter");
        }
        None
    }

    /// Download one file: admission, transport, temp write, verify,
    /// atomic rename.
    async fn download_file(&self, session: &str, message: &Message) -> Result<(PathBuf, u64), FileError> {
        let dir = self
            .config
            .output_dir
            .join(sanitize(message.channel.display_name()));
        let final_path = dir.join(file_name_for(message));
        let temp_path = final_path.with_extension("part");

        let mut attempt = 0;
        loop {
            if self
                .limits
                .admit(session, OpClass::Download, &self.cancel)
                .await
                .is_err()
            {
                return Err(FileError::Failed {
                    kind: ErrorKind::Cancelled,
                    message: "cancelled".into(),
                });
            }

            match self.transfer(session, message, &dir, &temp_path).await {
                Ok(bytes) => {
                    if message.size > 0 && bytes != message.size {
                        let _ = tokio::fs::remove_file(&temp_path).await;
                        return Err(FileError::Failed {
                            kind: ErrorKind::Transient,
                            message: format!(
                                "size mismatch: declared {} observed {bytes}",
                                message.size
                            ),
                        });
                    }
                    tokio::fs::rename(&temp_path, &final_path).await.map_err(|e| {
                        FileError::Failed {
                            kind: ErrorKind::Resource,
                            message: format!("rename failed: {e}"),
                        }
                    })?;
                    self.limits.on_success(session);
                    debug!(session, message = message.id, path = %final_path.display(), bytes, "downloaded");
                    return Ok((final_path, bytes));
                }
                Err(ClientError::FloodWait { seconds }) => {
                    match self.limits.on_flood_wait(session, seconds) {
                        FloodAction::Absorb(wait) => tokio::time::sleep(wait).await,
                        FloodAction::Suspend { .. } => return Err(FileError::Defer),
                    }
                }
                Err(e) if e.is_fatal_for_session() => {
                    return Err(FileError::SessionLost(e.to_string()));
                }
                Err(ClientError::FileTooLarge { size }) => {
                    return Err(FileError::Failed {
                        kind: ErrorKind::Resource,
                        message: format!("file exceeds service cap: {size} bytes"),
                    });
                }
                Err(e) if e.is_transient() && attempt < FILE_RETRIES => {
                    attempt += 1;
                    self.limits.on_failure(session);
                    let backoff = Duration::from_secs(1) * 2u32.pow(attempt - 1);
                    warn!(session, message = message.id, error = %e, attempt, "transient download error, backing off");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.limits.on_failure(session);
                    let kind = if matches!(e, ClientError::ChannelPrivate(_) | ClientError::Unauthorized)
                    {
                        ErrorKind::Authorization
                    } else {
                        ErrorKind::Transient
                    };
                    return Err(FileError::Failed { kind, message: e.to_string() });
                }
            }
        }
    }

    /// Move the bytes: in-memory path for small non-video media, chunk
    /// stream otherwise. Writes to `temp_path`, returns observed size.
    async fn transfer(
        &self,
        session: &str,
        message: &Message,
        dir: &std::path::Path,
        temp_path: &std::path::Path,
    ) -> Result<u64, ClientError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ClientError::Transport(format!("create dir: {e}")))?;

        let lease = self
            .pool
            .lease(session)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let small = message.size < self.config.small_file_cap && message.kind != MediaKind::Video;

        if small {
            let deadline = self.timeouts.download_small;
            let data = tokio::time::timeout(deadline, lease.transport().download_small(message))
                .await
                .map_err(|_| ClientError::Timeout(deadline))??;

            let bytes = data.len() as u64;
            tokio::fs::write(temp_path, &data)
                .await
                .map_err(|e| ClientError::Transport(format!("write: {e}")))?;
            Ok(bytes)
        } else {
            let mut stream = lease.transport().stream_media(message).await?;
            let mut file = tokio::fs::File::create(temp_path)
                .await
                .map_err(|e| ClientError::Transport(format!("create: {e}")))?;

            let mut bytes: u64 = 0;
            let progress = self.timeouts.stream_progress;
            loop {
                let chunk = tokio::time::timeout(progress, stream.next())
                    .await
                    .map_err(|_| ClientError::Timeout(progress))?;
                match chunk {
                    Some(chunk) => {
                        let chunk = chunk?;
                        bytes += chunk.len() as u64;
                        file.write_all(&chunk)
                            .await
                            .map_err(|e| ClientError::Transport(format!("write: {e}")))?;
                    }
                    None => break,
                }
            }
            file.flush()
                .await
                .map_err(|e| ClientError::Transport(format!("flush: {e}")))?;
            Ok(bytes)
        }
    }
}

enum UnitVerdict {
    Done(UnitOutcome),
    Requeue,
    SessionLost(String),
}

enum FileError {
    /// Long flood wait: put the unit back on the queue
    Defer,
    /// Unrecoverable session error: stop and hand work back
    SessionLost(String),
    Failed { kind: ErrorKind, message: String },
}
