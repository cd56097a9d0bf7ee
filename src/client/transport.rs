//! Transport seam over the remote service client library.
//!
//! The real implementation wraps an authenticated MTProto-like client;
//! the core only sees this trait. Tests run against the scriptable
//! in-memory mock.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use super::error::ClientError;
use super::types::{
    ChannelRef, GroupItem, MediaKind, MediaSource, Message, SelfIdentity, SentMessage,
};

/// Chunked media download stream.
pub type MediaStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Authenticated connection to the remote service.
///
/// One transport per session. Implementations are not expected to be
/// re-entrant; the session pool guarantees one outstanding call per
/// session via leasing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect using the session's persisted auth artefact.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Terminate the connection. Late background-cleanup errors from
    /// the underlying library are expected on shutdown.
    async fn disconnect(&self) -> Result<(), ClientError>;

    /// Fetch the identity of the account behind this session.
    async fn self_identity(&self) -> Result<SelfIdentity, ClientError>;

    /// Fetch messages by id. Ids deleted in the source are absent from
    /// the result, not errors.
    async fn fetch_messages(
        &self,
        channel: &ChannelRef,
        ids: &[i64],
    ) -> Result<Vec<Message>, ClientError>;

    /// Download a message's media fully into memory.
    async fn download_small(&self, message: &Message) -> Result<Bytes, ClientError>;

    /// Download a message's media as a chunk stream.
    async fn stream_media(&self, message: &Message) -> Result<MediaStream, ClientError>;

    /// Send one media item to a destination.
    async fn send_media(
        &self,
        dest: &ChannelRef,
        kind: MediaKind,
        media: MediaSource,
        caption: Option<&str>,
    ) -> Result<SentMessage, ClientError>;

    /// Send up to ten compatible media items as one album. The caption
    /// applies to the first item, per service convention.
    async fn send_media_group(
        &self,
        dest: &ChannelRef,
        items: &[GroupItem],
        caption_on_first: Option<&str>,
    ) -> Result<Vec<SentMessage>, ClientError>;

    /// Delete messages in a chat. Bulk where the service supports it.
    async fn delete_messages(&self, chat: &ChannelRef, ids: &[i64]) -> Result<(), ClientError>;
}
