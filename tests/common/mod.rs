//! Shared harness: a pool of sessions backed by scriptable mock
//! transports, plus message builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use chanrelay::client::{ChannelRef, MediaKind, Message, MockTransport, Transport};
use chanrelay::config::{Config, SessionConfig};
use chanrelay::session::{SessionPool, TransportFactory};

/// One mock transport per session, shared between the pool (via the
/// factory) and the test (for scripting and inspection).
pub struct MockNet {
    mocks: HashMap<String, MockTransport>,
    order: Vec<String>,
}

impl MockNet {
    pub fn new(names: &[&str]) -> Self {
        let mocks = names
            .iter()
            .map(|name| (name.to_string(), MockTransport::new(name)))
            .collect();
        Self {
            mocks,
            order: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn mock(&self, name: &str) -> &MockTransport {
        &self.mocks[name]
    }

    /// Seed the same channel contents into every session's transport.
    pub fn seed_all(&self, channel: &ChannelRef, messages: &[Message]) {
        for mock in self.mocks.values() {
            mock.seed_channel(channel, messages.to_vec());
        }
    }

    pub fn factory(&self) -> Box<dyn TransportFactory> {
        Box::new(NetFactory { mocks: self.mocks.clone() })
    }

    /// Sends observed across every session's transport, in per-session
    /// call order.
    pub fn all_sent_to(&self, dest: &ChannelRef) -> Vec<chanrelay::client::SentRecord> {
        self.order
            .iter()
            .flat_map(|name| self.mocks[name].sent_to(dest))
            .collect()
    }

    /// Scratch ids still present across all self chats.
    pub fn outstanding_scratch(&self) -> usize {
        self.mocks.values().map(|m| m.self_chat_ids().len()).sum()
    }
}

struct NetFactory {
    mocks: HashMap<String, MockTransport>,
}

impl TransportFactory for NetFactory {
    fn artifact_exists(&self, _config: &SessionConfig) -> bool {
        true
    }

    fn create(&self, config: &SessionConfig) -> Arc<dyn Transport> {
        Arc::new(self.mocks[&config.name].clone())
    }
}

pub fn session_configs(names: &[&str]) -> Vec<SessionConfig> {
    names
        .iter()
        .map(|name| SessionConfig {
            name: name.to_string(),
            auth_file: PathBuf::from(format!("{name}.session")),
            enabled: true,
        })
        .collect()
}

pub async fn started_pool(net: &MockNet, names: &[&str]) -> Arc<SessionPool> {
    let pool = Arc::new(SessionPool::new(session_configs(names), net.factory()));
    pool.start_enabled().await.expect("pool start");
    pool
}

pub fn base_config() -> Config {
    let mut config = Config::default();
    config.sessions = session_configs(&["alpha"]);
    config
}

/// A media message in `@src` with a deterministic date.
pub fn message(id: i64, kind: MediaKind, size: u64, group_id: Option<&str>) -> Message {
    Message {
        channel: ChannelRef::new("@src"),
        id,
        date: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        text: None,
        caption: None,
        group_id: group_id.map(str::to_string),
        kind,
        size,
        file_name: Some(format!("file{id}.{}", extension(kind))),
    }
}

fn extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "jpg",
        MediaKind::Video | MediaKind::VideoNote => "mp4",
        MediaKind::Audio => "mp3",
        MediaKind::Voice => "ogg",
        MediaKind::Animation => "gif",
        MediaKind::Document | MediaKind::None => "bin",
    }
}
