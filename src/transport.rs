//! The chat platform boundary.
//!
//! The notifier only needs a handful of operations from the platform: look
//! up channels and users, read recent channel history, and post, update, or
//! reply to messages. [`Transport`] names exactly those. Retries and rate
//! limits are the implementation's business.

use jiff::{SignedDuration, Timestamp};

use crate::model::{Block, Message};

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The platform answered, but refused the call.
    #[error("{method} failed: {error}")]
    Api { method: String, error: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),
}

pub type Result<T> = core::result::Result<T, TransportError>;

/// A span of channel history to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub oldest: Timestamp,
    pub latest: Timestamp,
    /// Maximum number of messages to fetch.
    pub limit: usize,
}

impl Window {
    /// The `lookback` leading up to `now`.
    pub fn ending_at(now: Timestamp, lookback: SignedDuration, limit: usize) -> Self {
        let oldest = now.checked_sub(lookback).unwrap_or(Timestamp::MIN);
        Self {
            oldest,
            latest: now,
            limit,
        }
    }
}

/// Operations the notifier performs against the chat platform.
pub trait Transport {
    /// Channel id for a channel name.
    fn find_channel(&self, name: &str) -> Result<Option<String>>;

    /// Messages posted in the channel within the window, newest first.
    fn history(&self, channel: &str, window: Window) -> Result<Vec<Message>>;

    /// User name for a user id.
    fn user_name(&self, user_id: &str) -> Result<Option<String>>;

    /// User id for a user name.
    fn find_user(&self, name: &str) -> Result<Option<String>>;

    /// Posts a new message; the returned message carries its id.
    fn post(&self, channel: &str, blocks: &[Block]) -> Result<Message>;

    /// Replaces the blocks of an existing message.
    fn update(&self, channel: &str, ts: &str, blocks: &[Block]) -> Result<Message>;

    /// Posts a plain-text reply in a message's thread.
    fn reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<Message>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_covers_lookback() {
        let now = Timestamp::new(1_704_103_200, 0).unwrap();
        let window = Window::ending_at(now, SignedDuration::from_mins(30), 200);

        assert_eq!(window.oldest.as_second(), 1_704_101_400);
        assert_eq!(window.latest, now);
        assert_eq!(window.limit, 200);
    }
}
