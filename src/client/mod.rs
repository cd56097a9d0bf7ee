//! Remote service client seam: types, errors, the transport trait and
//! the in-memory mock used by tests.

mod error;
pub mod mock;
mod transport;
mod types;

pub use error::ClientError;
pub use mock::{MockOp, MockTransport, SentRecord};
pub use transport::{MediaStream, Transport};
pub use types::{
    ChannelRef, GroupItem, MediaId, MediaKind, MediaSource, Message, SelfIdentity, SentMessage,
    CAPTION_CAP, CAPTION_CAP_PREMIUM, MEDIA_GROUP_CAP,
};
