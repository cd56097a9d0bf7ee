//! Error kinds raised by the remote service transport.

use std::time::Duration;

/// Errors surfaced by transport calls.
///
/// Flood-wait is a typed variant, never exception-style control flow:
/// the rate-limit controller decides absorb-vs-suspend from the carried
/// duration, not the call site.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Service-imposed pause for this session
    #[error("flood wait: {seconds}s")]
    FloodWait { seconds: u64 },

    /// Session authorisation is no longer valid
    #[error("session unauthorized")]
    Unauthorized,

    /// The channel exists but this account cannot read it
    #[error("channel is private: {0}")]
    ChannelPrivate(String),

    /// Generic service-side throttle without an explicit wait
    #[error("rate limited by service")]
    RateLimited,

    /// A single media item exceeds the service's per-file cap
    #[error("file too large: {size} bytes")]
    FileTooLarge { size: u64 },

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Transient network failure (connection reset, DNS, ...)
    #[error("network error: {0}")]
    Network(String),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether a retry on the same session can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited | Self::Transport(_)
        )
    }

    /// Whether the error invalidates the session itself.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::FloodWait { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ClientError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(!ClientError::Unauthorized.is_transient());
        assert!(!ClientError::FloodWait { seconds: 5 }.is_transient());
        assert!(!ClientError::FileTooLarge { size: 1 }.is_transient());
    }

    #[test]
    fn unauthorized_is_fatal() {
        assert!(ClientError::Unauthorized.is_fatal_for_session());
        assert!(!ClientError::RateLimited.is_fatal_for_session());
    }
}
