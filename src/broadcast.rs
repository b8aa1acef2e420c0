//! Fire-and-forget fan-out of status events to listeners outside the core.
//!
//! Each named channel is a `tokio::sync::broadcast` channel created on first
//! use. Messages posted while nobody is subscribed are dropped; late
//! subscribers never see earlier messages.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::{DownloadStatus, StatusCounts};

const DEFAULT_CAPACITY: usize = 64;

/// Progress of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Phase of the run.
    pub status: DownloadStatus,
    /// Counters at the time of posting.
    pub data: StatusCounts,
}

/// Anything posted on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelMessage {
    /// Download progress.
    Status(StatusMessage),
    /// A background download job's files are committed to the cache.
    Stored {
        /// Always true when posted.
        stored: bool,
    },
}

impl ChannelMessage {
    /// Returns the status message, if this is one.
    #[must_use]
    pub const fn as_status(&self) -> Option<&StatusMessage> {
        match self {
            Self::Status(status) => Some(status),
            Self::Stored { .. } => None,
        }
    }
}

impl From<StatusMessage> for ChannelMessage {
    fn from(message: StatusMessage) -> Self {
        Self::Status(message)
    }
}

/// Named pub/sub channels.
#[derive(Debug)]
pub struct Broadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<ChannelMessage>>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Creates a broadcaster with the default per-channel buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a broadcaster whose channels buffer up to `capacity` messages
    /// per slow subscriber before it starts lagging.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChannelMessage> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribes to a channel. Only messages posted after this call are received.
    #[must_use]
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        self.sender(channel).subscribe()
    }

    /// Posts a message. Returns the number of listeners it reached.
    pub fn post(&self, channel: &str, message: impl Into<ChannelMessage>) -> usize {
        let message = message.into();
        match self.sender(channel).send(message) {
            Ok(listeners) => listeners,
            Err(broadcast::error::SendError(message)) => {
                log::debug!("No listeners on {channel}, dropping {message:?}");
                0
            }
        }
    }

    /// Posts a status message.
    pub fn post_status(&self, channel: &str, status: DownloadStatus, data: StatusCounts) -> usize {
        self.post(channel, StatusMessage { status, data })
    }
}
