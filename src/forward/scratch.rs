//! Scratch handles: media staged into a session's self chat.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::warn;

use crate::client::{MediaId, MediaKind};
use crate::group::AtomicUnit;
use crate::report::ScratchRef;

/// One media payload resident in the owning session's self chat.
///
/// The media identifier is only valid on the owning session; scratch
/// never migrates between sessions.
#[derive(Debug, Clone)]
pub struct ScratchHandle {
    pub session: String,
    /// Message id in the owner's self chat
    pub message_id: i64,
    pub media_id: MediaId,
    pub kind: MediaKind,
    /// Original caption, preserved through staging
    pub caption: Option<String>,
    pub created_at: Instant,
}

/// A staged unit: mirrors the source unit's shape over handles.
#[derive(Debug, Clone)]
pub struct ScratchUnit {
    pub source: AtomicUnit,
    pub handles: Vec<ScratchHandle>,
}

impl ScratchUnit {
    pub fn first_id(&self) -> i64 {
        self.source.first_id()
    }

    pub fn is_group(&self) -> bool {
        self.source.is_group()
    }

    pub fn scratch_ids(&self) -> Vec<i64> {
        self.handles.iter().map(|h| h.message_id).collect()
    }
}

/// Per-session scratch ledger.
///
/// Every handle is reclaimed exactly once, by normal cleanup or
/// emergency cleanup; whatever is still outstanding at the end of a
/// run is retained deliberately and reported.
#[derive(Debug)]
pub struct ScratchLedger {
    session: String,
    outstanding: HashMap<i64, ScratchRef>,
    created: u64,
    reclaimed: u64,
}

impl ScratchLedger {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
            outstanding: HashMap::new(),
            created: 0,
            reclaimed: 0,
        }
    }

    pub fn record(&mut self, handle: &ScratchHandle) {
        self.created += 1;
        self.outstanding.insert(
            handle.message_id,
            ScratchRef { session: self.session.clone(), message_id: handle.message_id },
        );
    }

    /// Mark ids reclaimed. Ids not outstanding (double reclaim) are
    /// skipped and flagged; that is a bug upstream.
    pub fn reclaim(&mut self, ids: &[i64]) {
        for id in ids {
            if self.outstanding.remove(id).is_some() {
                self.reclaimed += 1;
            } else {
                warn!(session = %self.session, scratch_id = id, "double reclaim of scratch handle");
                debug_assert!(false, "double reclaim of scratch handle {id}");
            }
        }
    }

    pub fn outstanding_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.outstanding.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Drain the outstanding set into report entries.
    pub fn retained(&self) -> Vec<ScratchRef> {
        let mut refs: Vec<ScratchRef> = self.outstanding.values().cloned().collect();
        refs.sort_by_key(|r| r.message_id);
        refs
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelRef, Message};
    use chrono::Utc;

    fn handle(message_id: i64) -> ScratchHandle {
        ScratchHandle {
            session: "alpha".into(),
            message_id,
            media_id: MediaId(format!("m{message_id}")),
            kind: MediaKind::Photo,
            caption: None,
            created_at: Instant::now(),
        }
    }

    #[test]
    fn conservation_counts() {
        let mut ledger = ScratchLedger::new("alpha");
        for id in 1..=4 {
            ledger.record(&handle(id));
        }
        ledger.reclaim(&[1, 2]);

        assert_eq!(ledger.created(), 4);
        assert_eq!(ledger.reclaimed(), 2);
        assert_eq!(ledger.outstanding_ids(), vec![3, 4]);
        assert_eq!(ledger.retained().len(), 2);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "double reclaim"))]
    fn double_reclaim_is_flagged() {
        let mut ledger = ScratchLedger::new("alpha");
        ledger.record(&handle(1));
        ledger.reclaim(&[1]);
        ledger.reclaim(&[1]);
    }

    #[test]
    fn scratch_unit_exposes_ids() {
        let message = Message {
            channel: ChannelRef::new("@src"),
            id: 9,
            date: Utc::now(),
            text: None,
            caption: None,
            group_id: None,
            kind: MediaKind::Photo,
            size: 1,
            file_name: None,
        };
        let unit = ScratchUnit {
            source: AtomicUnit::Singleton(message),
            handles: vec![handle(70), handle(71)],
        };
        assert_eq!(unit.scratch_ids(), vec![70, 71]);
        assert_eq!(unit.first_id(), 9);
    }
}
