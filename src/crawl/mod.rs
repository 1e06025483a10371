use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod crawler;
pub mod filter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    /// Account name; statistics are keyed by this
    pub name: String,
    pub display_name: String,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub author: Author,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

/// A text channel and the name of the category it sits in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

/// Opaque position in a channel's history; handing it back to the source continues right after
/// the last message of the page it came with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(pub String);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlWindow {
    /// Exclusive
    pub after: DateTime<Utc>,
    /// Exclusive
    pub before: DateTime<Utc>,
}

impl CrawlWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.after < at && at < self.before
    }
}

/// One page of history, oldest message first
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<Message>,
    /// `None` once the window has been exhausted
    pub next: Option<Cursor>,
}

/// Where channel history and guild membership come from
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Text channels of the guild
    async fn list_channels(&self) -> SourceResult<Vec<ChannelInfo>>;

    /// Messages in `window`, starting right after `cursor` (or at the start of the window)
    async fn fetch_page(
        &self,
        channel: &ChannelInfo,
        window: CrawlWindow,
        cursor: Option<&Cursor>,
    ) -> SourceResult<Page>;

    /// Whether the user is still a member of the guild
    async fn is_member(&self, user_id: &str) -> SourceResult<bool>;
}

pub type SourceResult<T> = core::result::Result<T, SourceError>;

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Worth retrying: rate limits, timeouts, server errors
    #[error("transient source failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("source failure: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn transient(reason: impl Into<String>) -> Self {
        SourceError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }
}
