use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::constants::DISCORD_EPOCH_MS;
use crate::crawl::{Author, ChannelInfo, Message};

pub const CHANNEL_TEXT: u8 = 0;
pub const CHANNEL_CATEGORY: u8 = 4;
pub const CHANNEL_ANNOUNCEMENT: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl DiscordMessage {
    pub fn snowflake(&self) -> u64 {
        self.id.parse().unwrap_or_default()
    }
}

impl From<DiscordMessage> for Message {
    fn from(value: DiscordMessage) -> Self {
        let DiscordUser {
            id,
            username,
            global_name,
            bot,
        } = value.author;

        Message {
            id: value.id,
            author: Author {
                id,
                display_name: global_name.unwrap_or_else(|| username.clone()),
                name: username,
                bot,
            },
            channel_id: value.channel_id,
            created_at: value.timestamp,
            content: value.content,
        }
    }
}

/// Body of a 429 response
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimited {
    /// Seconds
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

/// The smallest snowflake that could have been minted at `at`
pub fn snowflake_at(at: DateTime<Utc>) -> u64 {
    let since_epoch = at.timestamp_millis() - DISCORD_EPOCH_MS;
    (since_epoch.max(0) as u64) << 22
}

/// Text channels of a guild listing, each with its parent category's name resolved
pub fn text_channels(channels: Vec<DiscordChannel>) -> Vec<ChannelInfo> {
    let categories: HashMap<String, String> = channels
        .iter()
        .filter(|channel| channel.kind == CHANNEL_CATEGORY)
        .filter_map(|channel| Some((channel.id.clone(), channel.name.clone()?)))
        .collect();

    channels
        .into_iter()
        .filter(|channel| matches!(channel.kind, CHANNEL_TEXT | CHANNEL_ANNOUNCEMENT))
        .map(|channel| ChannelInfo {
            category: channel
                .parent_id
                .as_ref()
                .and_then(|parent| categories.get(parent).cloned()),
            name: channel.name.unwrap_or_default(),
            id: channel.id,
        })
        .collect()
}
