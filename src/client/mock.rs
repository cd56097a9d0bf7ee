//! Scriptable in-memory transport for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;
use tracing::trace;

use super::error::ClientError;
use super::transport::{MediaStream, Transport};
use super::types::{
    ChannelRef, GroupItem, MediaId, MediaKind, MediaSource, Message, SelfIdentity, SentMessage,
};

/// Operation selector for scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Connect,
    Fetch,
    Download,
    Send,
    SendGroup,
    Delete,
}

/// Record of a send observed by the mock.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub dest: ChannelRef,
    pub message_ids: Vec<i64>,
    pub media_ids: Vec<MediaId>,
    pub kinds: Vec<MediaKind>,
    pub caption: Option<String>,
}

#[derive(Default)]
struct MockState {
    /// Scripted errors, consumed in order per (op, chat) key
    scripted: HashMap<(MockOp, Option<String>), VecDeque<ClientError>>,
    /// Channel contents served by fetch
    channels: HashMap<String, BTreeMap<i64, Message>>,
    /// Messages currently present in the self chat
    self_chat: BTreeMap<i64, MediaId>,
    /// Every send observed, in call order
    sent: Vec<SentRecord>,
    /// Every delete observed: (chat, ids)
    deleted: Vec<(ChannelRef, Vec<i64>)>,
}

struct MockInner {
    identity: SelfIdentity,
    latency: Duration,
    message_counter: AtomicI64,
    media_counter: AtomicU64,
    call_count: AtomicU64,
    state: Mutex<MockState>,
}

/// In-memory transport double.
///
/// Serves fetches from a seeded channel map, simulates the self-chat
/// scratch area, and records every send and delete. Failures are
/// scripted per operation (optionally per chat) and consumed in order,
/// so a test can express "the first group-send to @d1 flood-waits,
/// the retry succeeds".
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new(session_name: &str) -> Self {
        Self::build(session_name, false, Duration::ZERO)
    }

    pub fn premium(session_name: &str) -> Self {
        Self::build(session_name, true, Duration::ZERO)
    }

    pub fn with_latency(session_name: &str, latency: Duration) -> Self {
        Self::build(session_name, false, latency)
    }

    fn build(session_name: &str, is_premium: bool, latency: Duration) -> Self {
        Self {
            inner: Arc::new(MockInner {
                identity: SelfIdentity {
                    id: session_name.len() as i64 + 1000,
                    name: session_name.to_string(),
                    is_premium,
                },
                latency,
                message_counter: AtomicI64::new(1),
                media_counter: AtomicU64::new(1),
                call_count: AtomicU64::new(0),
                state: Mutex::new(MockState::default()),
            }),
        }
    }

    /// Seed a channel with messages served by `fetch_messages`.
    pub fn seed_channel(&self, channel: &ChannelRef, messages: Vec<Message>) {
        let mut state = self.inner.state.lock().unwrap();
        let chan = state.channels.entry(channel.as_str().to_string()).or_default();
        for m in messages {
            chan.insert(m.id, m);
        }
    }

    /// Script the next call of `op` to fail with `error`. Scoped to
    /// `chat` when given, otherwise matches any chat.
    pub fn fail_next(&self, op: MockOp, chat: Option<&ChannelRef>, error: ClientError) {
        let key = (op, chat.map(|c| c.as_str().to_string()));
        self.inner
            .state
            .lock()
            .unwrap()
            .scripted
            .entry(key)
            .or_default()
            .push_back(error);
    }

    /// All sends observed so far.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.inner.state.lock().unwrap().sent.clone()
    }

    /// Sends targeted at one destination, in call order.
    pub fn sent_to(&self, dest: &ChannelRef) -> Vec<SentRecord> {
        self.inner
            .state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|r| &r.dest == dest)
            .cloned()
            .collect()
    }

    /// All deletes observed so far.
    pub fn deleted(&self) -> Vec<(ChannelRef, Vec<i64>)> {
        self.inner.state.lock().unwrap().deleted.clone()
    }

    /// Message ids still present in the self chat.
    pub fn self_chat_ids(&self) -> Vec<i64> {
        self.inner.state.lock().unwrap().self_chat.keys().copied().collect()
    }

    pub fn call_count(&self) -> u64 {
        self.inner.call_count.load(Ordering::Relaxed)
    }

    async fn before_call(&self, op: MockOp, chat: Option<&ChannelRef>) -> Result<(), ClientError> {
        self.inner.call_count.fetch_add(1, Ordering::Relaxed);

        if !self.inner.latency.is_zero() {
            trace!(latency_ms = self.inner.latency.as_millis() as u64, "simulating latency");
            sleep(self.inner.latency).await;
        }

        let mut state = self.inner.state.lock().unwrap();
        for key in [
            (op, chat.map(|c| c.as_str().to_string())),
            (op, None),
        ] {
            if let Some(queue) = state.scripted.get_mut(&key) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn next_message_id(&self) -> i64 {
        self.inner.message_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn next_media_id(&self) -> MediaId {
        let id = self.inner.media_counter.fetch_add(1, Ordering::Relaxed);
        MediaId(format!("media-{:08x}", id))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), ClientError> {
        self.before_call(MockOp::Connect, None).await
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn self_identity(&self) -> Result<SelfIdentity, ClientError> {
        Ok(self.inner.identity.clone())
    }

    async fn fetch_messages(
        &self,
        channel: &ChannelRef,
        ids: &[i64],
    ) -> Result<Vec<Message>, ClientError> {
        self.before_call(MockOp::Fetch, Some(channel)).await?;

        let state = self.inner.state.lock().unwrap();
        let chan = state
            .channels
            .get(channel.as_str())
            .ok_or_else(|| ClientError::ChannelPrivate(channel.as_str().to_string()))?;

        // Ids deleted in the source are simply absent.
        Ok(ids.iter().filter_map(|id| chan.get(id).cloned()).collect())
    }

    async fn download_small(&self, message: &Message) -> Result<Bytes, ClientError> {
        self.before_call(MockOp::Download, Some(&message.channel)).await?;
        Ok(Bytes::from(vec![0u8; message.size as usize]))
    }

    async fn stream_media(&self, message: &Message) -> Result<MediaStream, ClientError> {
        self.before_call(MockOp::Download, Some(&message.channel)).await?;

        let size = message.size as usize;
        let chunks: Vec<Result<Bytes, ClientError>> = (0..size)
            .step_by(4096)
            .map(|off| Ok(Bytes::from(vec![0u8; (size - off).min(4096)])))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn send_media(
        &self,
        dest: &ChannelRef,
        kind: MediaKind,
        media: MediaSource,
        caption: Option<&str>,
    ) -> Result<SentMessage, ClientError> {
        self.before_call(MockOp::Send, Some(dest)).await?;

        let media_id = match media {
            MediaSource::Bytes { .. } => self.next_media_id(),
            MediaSource::Id(id) => id,
        };
        let id = self.next_message_id();

        let mut state = self.inner.state.lock().unwrap();
        if dest == &ChannelRef::self_chat() {
            state.self_chat.insert(id, media_id.clone());
        }
        state.sent.push(SentRecord {
            dest: dest.clone(),
            message_ids: vec![id],
            media_ids: vec![media_id.clone()],
            kinds: vec![kind],
            caption: caption.map(str::to_string),
        });

        Ok(SentMessage { id, media_id: Some(media_id) })
    }

    async fn send_media_group(
        &self,
        dest: &ChannelRef,
        items: &[GroupItem],
        caption_on_first: Option<&str>,
    ) -> Result<Vec<SentMessage>, ClientError> {
        self.before_call(MockOp::SendGroup, Some(dest)).await?;

        let mut sent = Vec::with_capacity(items.len());
        let mut record = SentRecord {
            dest: dest.clone(),
            message_ids: Vec::new(),
            media_ids: Vec::new(),
            kinds: Vec::new(),
            caption: caption_on_first.map(str::to_string),
        };

        for item in items {
            let id = self.next_message_id();
            record.message_ids.push(id);
            record.media_ids.push(item.media.clone());
            record.kinds.push(item.kind);
            sent.push(SentMessage { id, media_id: Some(item.media.clone()) });
        }

        self.inner.state.lock().unwrap().sent.push(record);
        Ok(sent)
    }

    async fn delete_messages(&self, chat: &ChannelRef, ids: &[i64]) -> Result<(), ClientError> {
        self.before_call(MockOp::Delete, Some(chat)).await?;

        let mut state = self.inner.state.lock().unwrap();
        if chat == &ChannelRef::self_chat() {
            for id in ids {
                state.self_chat.remove(id);
            }
        }
        state.deleted.push((chat.clone(), ids.to_vec()));
        Ok(())
    }
}
