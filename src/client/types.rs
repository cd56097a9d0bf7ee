//! Core message and media types returned by the remote service.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of messages the service publishes as one album.
pub const MEDIA_GROUP_CAP: usize = 10;

/// Reference to a channel (or chat) on the remote service.
///
/// The service accepts usernames (`@channel`), invite slugs and numeric
/// ids; the core treats all of them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRef(String);

impl ChannelRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The per-session "self chat" used as a scratch area.
    pub fn self_chat() -> Self {
        Self("me".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel name usable in file names and template variables
    /// (reference with the leading `@` stripped).
    pub fn display_name(&self) -> &str {
        self.0.strip_prefix('@').unwrap_or(&self.0)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Animation,
    Document,
    None,
}

impl MediaKind {
    /// Whether this kind can share an album with `other`.
    ///
    /// The service permits mixing photos and videos in one group;
    /// documents group only with documents, audio only with audio.
    /// Voice, video-note and animation never share a group.
    pub fn groups_with(&self, other: MediaKind) -> bool {
        use MediaKind::*;
        match (self, other) {
            (Photo | Video, Photo | Video) => true,
            (Document, Document) => true,
            (Audio, Audio) => true,
            _ => false,
        }
    }

    /// Whether this kind may only ever be sent as a singleton.
    pub fn singleton_only(&self) -> bool {
        matches!(self, MediaKind::Voice | MediaKind::VideoNote | MediaKind::Animation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::Animation => "animation",
            Self::Document => "document",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque service-assigned media identifier.
///
/// Usable in batch-send calls without re-uploading bytes. Only valid on
/// the session that obtained it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaId(pub String);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message fetched from a source channel. Immutable after fetch.
#[derive(Debug, Clone)]
pub struct Message {
    /// Channel the message was fetched from
    pub channel: ChannelRef,
    /// Message id within the channel
    pub id: i64,
    /// Author date
    pub date: DateTime<Utc>,
    /// Message text (non-media messages)
    pub text: Option<String>,
    /// Media caption
    pub caption: Option<String>,
    /// Album id; present iff the message belongs to a media group
    pub group_id: Option<String>,
    /// Kind of attached media
    pub kind: MediaKind,
    /// Declared media size in bytes (0 if none or unknown)
    pub size: u64,
    /// Original file name, when the service declares one
    pub file_name: Option<String>,
}

impl Message {
    pub fn has_media(&self) -> bool {
        self.kind != MediaKind::None
    }
}

/// Identity of the account behind a session.
#[derive(Debug, Clone)]
pub struct SelfIdentity {
    pub id: i64,
    pub name: String,
    /// Premium accounts get the extended caption cap
    pub is_premium: bool,
}

/// Caption length caps imposed by the service.
pub const CAPTION_CAP: usize = 1024;
pub const CAPTION_CAP_PREMIUM: usize = 4096;

impl SelfIdentity {
    pub fn caption_cap(&self) -> usize {
        if self.is_premium {
            CAPTION_CAP_PREMIUM
        } else {
            CAPTION_CAP
        }
    }
}

/// Media payload handed to a send primitive.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Fresh bytes to upload
    Bytes { data: Bytes, file_name: String },
    /// Reuse of an already-uploaded payload by service identifier
    Id(MediaId),
}

/// One member of a batch-send call.
#[derive(Debug, Clone)]
pub struct GroupItem {
    pub media: MediaId,
    pub kind: MediaKind,
}

/// Message returned by a send primitive.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Id the service assigned in the destination chat
    pub id: i64,
    /// Media identifier of the sent payload, when media was attached
    pub media_id: Option<MediaId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_and_video_share_a_group() {
        assert!(MediaKind::Photo.groups_with(MediaKind::Video));
        assert!(MediaKind::Video.groups_with(MediaKind::Photo));
        assert!(MediaKind::Document.groups_with(MediaKind::Document));
    }

    #[test]
    fn documents_do_not_mix() {
        assert!(!MediaKind::Document.groups_with(MediaKind::Photo));
        assert!(!MediaKind::Audio.groups_with(MediaKind::Document));
        assert!(MediaKind::Voice.singleton_only());
        assert!(!MediaKind::Voice.groups_with(MediaKind::Voice));
    }

    #[test]
    fn channel_display_name_strips_at() {
        assert_eq!(ChannelRef::new("@src").display_name(), "src");
        assert_eq!(ChannelRef::new("src").display_name(), "src");
    }

    #[test]
    fn caption_cap_follows_premium() {
        let plain = SelfIdentity { id: 1, name: "a".into(), is_premium: false };
        let premium = SelfIdentity { id: 2, name: "b".into(), is_premium: true };
        assert_eq!(plain.caption_cap(), 1024);
        assert_eq!(premium.caption_cap(), 4096);
    }
}
