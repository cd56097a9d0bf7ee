//! Atomic units: the granularity every downstream component works at.

use crate::client::{Message, MEDIA_GROUP_CAP};

/// An ordered, non-empty run of messages published as one album.
///
/// Never split by any downstream component once constructed.
#[derive(Debug, Clone)]
pub struct MediaGroup {
    id: String,
    messages: Vec<Message>,
}

impl MediaGroup {
    /// Build a group from messages sharing `id`. Caller guarantees the
    /// slice is non-empty, in source order and within the service cap.
    pub(crate) fn new(id: String, messages: Vec<Message>) -> Self {
        debug_assert!(!messages.is_empty());
        debug_assert!(messages.len() <= MEDIA_GROUP_CAP);
        Self { id, messages }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One standalone message or one indivisible media group.
#[derive(Debug, Clone)]
pub enum AtomicUnit {
    Singleton(Message),
    Group(MediaGroup),
}

impl AtomicUnit {
    /// Total declared media weight in bytes.
    pub fn weight(&self) -> u64 {
        match self {
            Self::Singleton(m) => m.size,
            Self::Group(g) => g.messages().iter().map(|m| m.size).sum(),
        }
    }

    /// Source id of the first constituent message; stable sort key for
    /// source ordering.
    pub fn first_id(&self) -> i64 {
        match self {
            Self::Singleton(m) => m.id,
            Self::Group(g) => g.messages()[0].id,
        }
    }

    /// Constituent messages in source order.
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Singleton(m) => std::slice::from_ref(m),
            Self::Group(g) => g.messages(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    /// First non-empty text or caption among constituents; the source
    /// for caption templating.
    pub fn lead_message(&self) -> &Message {
        &self.messages()[0]
    }
}
