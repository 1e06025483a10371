use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, InvalidHeaderValue, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, StatusCode};
use leaky_bucket::RateLimiter;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::{DISCORD_PAGE_LIMIT, DISCORD_REQUESTS_PER_SECOND};
use crate::crawl::{
    ChannelInfo, ChannelSource, CrawlWindow, Cursor, Message, Page, SourceError, SourceResult,
};
use crate::discord::models::{
    DiscordChannel, DiscordMessage, RateLimited, snowflake_at, text_channels,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads a guild's history over the Discord REST API as a bot user.
///
/// Requests are paced below the global rate limit; anything the API still rejects with a 429 is
/// handed back as a transient error so the crawler can back off and resume.
pub struct DiscordSource {
    client: reqwest::Client,
    base_url: String,
    guild_id: String,
    limiter: RateLimiter,
    members: Mutex<HashMap<String, bool>>,
}

impl DiscordSource {
    pub fn with_base_url(
        token: &str,
        guild_id: impl Into<String>,
        base_url: &str,
    ) -> DiscordResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bot {token}"))?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("slurpotron/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let limiter = RateLimiter::builder()
            .initial(DISCORD_REQUESTS_PER_SECOND)
            .refill(DISCORD_REQUESTS_PER_SECOND)
            .max(DISCORD_REQUESTS_PER_SECOND)
            .interval(Duration::from_secs(1))
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            guild_id: guild_id.into(),
            limiter,
            members: Mutex::new(HashMap::new()),
        })
    }

    /// Sends a paced GET, mapping transport failures and non-success statuses onto
    /// [`SourceError`]. 404s are returned as-is since some endpoints use them as an answer.
    #[instrument(skip(self, query))]
    async fn send(&self, path: &str, query: &[(&str, String)]) -> SourceResult<reqwest::Response> {
        self.limiter.acquire_one().await;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        Err(status_error(response).await)
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> SourceResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(path, query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::Permanent(format!("{path} not found")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Permanent(format!("malformed response from {path}: {e}")))
    }
}

#[async_trait]
impl ChannelSource for DiscordSource {
    #[instrument(skip(self), fields(guild = %self.guild_id))]
    async fn list_channels(&self) -> SourceResult<Vec<ChannelInfo>> {
        let path = format!("/guilds/{}/channels", self.guild_id);
        let channels: Vec<DiscordChannel> = self.get(&path, &[]).await?;

        let channels = text_channels(channels);
        tracing::debug!(count = channels.len(), "listed text channels");

        Ok(channels)
    }

    #[instrument(skip(self, channel, window), fields(channel = %channel))]
    async fn fetch_page(
        &self,
        channel: &ChannelInfo,
        window: CrawlWindow,
        cursor: Option<&Cursor>,
    ) -> SourceResult<Page> {
        let after = match cursor {
            Some(cursor) => cursor.0.clone(),
            None => snowflake_at(window.after).to_string(),
        };

        let path = format!("/channels/{}/messages", channel.id);
        let query = [("after", after), ("limit", DISCORD_PAGE_LIMIT.to_string())];
        let mut raw: Vec<DiscordMessage> = self.get(&path, &query).await?;

        // the api hands pages back newest first
        raw.sort_by_key(DiscordMessage::snowflake);

        let fetched = raw.len();
        let last = raw.last().map(|message| Cursor(message.id.clone()));
        let reached_end = raw
            .iter()
            .any(|message| message.timestamp >= window.before);

        let messages: Vec<Message> = raw
            .into_iter()
            .filter(|message| message.timestamp < window.before)
            .map(Message::from)
            .collect();

        let next = if reached_end || fetched < DISCORD_PAGE_LIMIT {
            None
        } else {
            last
        };

        tracing::trace!(fetched, kept = messages.len(), more = next.is_some(), "fetched page");
        Ok(Page { messages, next })
    }

    #[instrument(skip(self))]
    async fn is_member(&self, user_id: &str) -> SourceResult<bool> {
        if let Some(member) = self.members.lock().await.get(user_id) {
            return Ok(*member);
        }

        let path = format!("/guilds/{}/members/{}", self.guild_id, user_id);
        let response = self.send(&path, &[]).await?;
        let member = response.status() != StatusCode::NOT_FOUND;

        self.members
            .lock()
            .await
            .insert(user_id.to_string(), member);

        Ok(member)
    }
}

fn request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SourceError::transient(e.to_string())
    } else {
        SourceError::Permanent(e.to_string())
    }
}

async fn status_error(response: reqwest::Response) -> SourceError {
    let status = response.status();
    let header_delay = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let body_delay = response
            .json::<RateLimited>()
            .await
            .ok()
            .and_then(|limited| {
                tracing::warn!(global = limited.global, retry_after = limited.retry_after, "rate limited");
                Duration::try_from_secs_f64(limited.retry_after).ok()
            });

        return SourceError::Transient {
            reason: format!("rate limited ({status})"),
            retry_after: body_delay.or(header_delay),
        };
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(code = %status, body = %body, "non-success response");

    if status.is_server_error() {
        SourceError::Transient {
            reason: format!("server error ({status})"),
            retry_after: header_delay,
        }
    } else {
        SourceError::Permanent(format!("request rejected ({status}): {body}"))
    }
}

pub type DiscordResult<T> = core::result::Result<T, DiscordErr>;

#[derive(Debug, Error)]
pub enum DiscordErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(server: &MockServer) -> DiscordSource {
        DiscordSource::with_base_url("test-token", "g1", &server.uri()).unwrap()
    }

    fn channel() -> ChannelInfo {
        ChannelInfo {
            id: "c1".to_string(),
            name: "bar".to_string(),
            category: Some("Downtown".to_string()),
        }
    }

    fn window() -> CrawlWindow {
        CrawlWindow {
            after: Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
            before: Utc.with_ymd_and_hms(2024, 3, 8, 18, 0, 0).unwrap(),
        }
    }

    fn message(id: u64, at: DateTime<Utc>) -> Value {
        json!({
            "id": id.to_string(),
            "channel_id": "c1",
            "author": {"id": "u1", "username": "ana"},
            "content": "Vex waves.",
            "timestamp": at.to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn test_list_channels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/channels"))
            .and(header("authorization", "Bot test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "10", "type": 4, "name": "Downtown"},
                {"id": "c1", "type": 0, "name": "bar", "parent_id": "10"},
                {"id": "v1", "type": 2, "name": "voice", "parent_id": "10"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let channels = source(&server).list_channels().await.unwrap();
        assert_eq!(channels, vec![channel()]);
    }

    #[tokio::test]
    async fn test_first_page_starts_at_window_and_ends_at_before() {
        let server = MockServer::start().await;
        let start = snowflake_at(window().after).to_string();
        let inside = Utc.with_ymd_and_hms(2024, 3, 2, 20, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 3, 20, 0, 0).unwrap();
        let past_end = Utc.with_ymd_and_hms(2024, 3, 9, 1, 0, 0).unwrap();

        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .and(query_param("after", start.as_str()))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                message(300, past_end),
                message(200, later),
                message(100, inside),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server)
            .fetch_page(&channel(), window(), None)
            .await
            .unwrap();

        let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["100", "200"]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_full_page_continues_from_last_id() {
        let server = MockServer::start().await;
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 20, 0, 0).unwrap();
        let full: Vec<Value> = (1..=100u64).rev().map(|id| message(5_000 + id, at)).collect();

        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .and(query_param("after", "4000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full))
            .mount(&server)
            .await;

        let cursor = Cursor("4000".to_string());
        let page = source(&server)
            .fetch_page(&channel(), window(), Some(&cursor))
            .await
            .unwrap();

        assert_eq!(page.messages.len(), 100);
        assert_eq!(page.messages[0].id, "5001");
        assert_eq!(page.next, Some(Cursor("5100".to_string())));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 1.5, "global": false})),
            )
            .mount(&server)
            .await;

        let error = source(&server)
            .fetch_page(&channel(), window(), None)
            .await
            .unwrap_err();

        match error {
            SourceError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_millis(1500)))
            }
            other => panic!("expected a transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/c2/messages"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"message": "Missing Access", "code": 50001})),
            )
            .mount(&server)
            .await;

        let source = source(&server);
        let forbidden = ChannelInfo {
            id: "c2".to_string(),
            ..channel()
        };

        assert!(matches!(
            source.fetch_page(&channel(), window(), None).await,
            Err(SourceError::Transient { .. })
        ));
        assert!(matches!(
            source.fetch_page(&forbidden, window(), None).await,
            Err(SourceError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_membership_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/members/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"id": "u1", "username": "ana"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/members/u2"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Unknown Member", "code": 10007})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = source(&server);
        for _ in 0..3 {
            assert!(source.is_member("u1").await.unwrap());
            assert!(!source.is_member("u2").await.unwrap());
        }
    }
}
