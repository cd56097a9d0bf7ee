//! One-way run event stream.
//!
//! Workers and the driver emit; consumers (log rendering, any future
//! progress UI) subscribe. Nothing holds a back-reference into the
//! workers.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Progress events emitted over a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StageStarted { stage: &'static str },
    FetchFinished { fetched: usize, requested: usize },
    UnitFinished { session: String, first_id: i64, ok: bool },
    RunFinished { summary: String },
}

/// Broadcast fan-out for run events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Emit an event; silently dropped when nothing subscribes.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume events into the structured log until the bus closes.
pub fn spawn_log_subscriber(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(RunEvent::StageStarted { stage }) => info!(stage, "stage started"),
                Ok(RunEvent::FetchFinished { fetched, requested }) => {
                    info!(fetched, requested, "fetch finished")
                }
                Ok(RunEvent::UnitFinished { session, first_id, ok }) => {
                    info!(session = %session, unit = first_id, ok, "unit finished")
                }
                Ok(RunEvent::RunFinished { summary }) => {
                    info!(summary = %summary, "run finished");
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
