use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::constants::{DEFAULT_WORKERS, PROGRESS_INTERVAL};
use crate::crawl::{
    ChannelInfo, ChannelSource, CrawlWindow, Cursor, Message, Page, SourceError, SourceResult,
};
use crate::parsing::name::extract_name;
use crate::stats::{AttributionEvent, StatsTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given retry, stretched to whatever the source asked for
    pub fn delay(&self, retry: u32, requested: Option<Duration>) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);

        requested.map_or(backoff, |requested| requested.max(backoff))
    }
}

/// What happened to the messages of a crawl besides being counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageTally {
    pub counted: usize,
    /// Out of character or prose
    pub dropped: usize,
    pub bots: usize,
    pub departed: usize,
    pub outside_window: usize,
}

impl AddAssign for MessageTally {
    fn add_assign(&mut self, rhs: Self) {
        self.counted += rhs.counted;
        self.dropped += rhs.dropped;
        self.bots += rhs.bots;
        self.departed += rhs.departed;
        self.outside_window += rhs.outside_window;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelCrawl {
    pub stats: StatsTable,
    pub tally: MessageTally,
    pub pages: usize,
    /// Stopped early; `stats` only covers the pages consumed before the cancellation
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct ChannelFailure {
    pub channel: ChannelInfo,
    pub error: CrawlError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlProgress {
    pub done: usize,
    pub total: usize,
    pub last_channel: String,
}

#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub stats: StatsTable,
    pub tally: MessageTally,
    pub crawled: usize,
    pub failures: Vec<ChannelFailure>,
    /// The crawl was cancelled before every channel finished
    pub partial: bool,
}

impl CrawlOutcome {
    /// `name (error)` for every channel that could not be read
    pub fn failed_channels(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|failure| format!("{} ({})", failure.channel.name, failure.error))
            .collect()
    }
}

/// Walks channel histories through a [`ChannelSource`] and counts attributed posts.
///
/// Pages are only folded into the channel's table once every message on them has been handled,
/// so retrying a page from its cursor never counts a message twice.
pub struct ChannelCrawler<S> {
    source: Arc<S>,
    retry: RetryPolicy,
    workers: usize,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<CrawlProgress>>,
    id: Uuid,
}

impl<S: ChannelSource> ChannelCrawler<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            cancel: CancellationToken::new(),
            progress: None,
            id: Uuid::new_v4(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of channels crawled at the same time
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: UnboundedSender<CrawlProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Crawls every channel, merging per-channel tables as they finish.
    ///
    /// A channel that fails is recorded in [`CrawlOutcome::failures`] and the rest carry on.
    #[instrument(skip(self, channels), fields(crawl = %self.id, channels = channels.len()))]
    pub async fn crawl_all(&self, channels: Vec<ChannelInfo>, window: CrawlWindow) -> CrawlOutcome {
        let total = channels.len();
        let mut outcome = CrawlOutcome::default();

        let mut results = stream::iter(channels)
            .map(|channel| async move {
                let result = self.crawl_channel(&channel, window).await;
                (channel, result)
            })
            .buffer_unordered(self.workers);

        let mut done = 0;
        while let Some((channel, result)) = results.next().await {
            done += 1;
            let name = channel.name.clone();

            match result {
                Ok(crawl) => {
                    tracing::info!(
                        channel = %channel,
                        done,
                        total,
                        pages = crawl.pages,
                        counted = crawl.tally.counted,
                        cancelled = crawl.cancelled,
                        "crawled channel"
                    );

                    if crawl.cancelled {
                        outcome.partial = true;
                    } else {
                        outcome.crawled += 1;
                    }

                    outcome.tally += crawl.tally;
                    outcome.stats.merge(crawl.stats);
                }
                Err(error) => {
                    tracing::error!(channel = %channel, error = %error, "channel crawl failed");
                    outcome.failures.push(ChannelFailure { channel, error });
                }
            }

            if done % PROGRESS_INTERVAL == 0 || done == total {
                self.report_progress(done, total, name);
            }
        }

        if self.cancel.is_cancelled() {
            outcome.partial = true;
        }

        tracing::info!(
            crawled = outcome.crawled,
            failed = outcome.failures.len(),
            partial = outcome.partial,
            posts = outcome.stats.total_posts(),
            "crawl finished"
        );

        outcome
    }

    /// Crawls one channel from the start of `window` to its end
    #[instrument(skip(self, channel), fields(crawl = %self.id, channel = %channel))]
    pub async fn crawl_channel(
        &self,
        channel: &ChannelInfo,
        window: CrawlWindow,
    ) -> CrawlResult<ChannelCrawl> {
        let mut crawl = ChannelCrawl::default();
        let mut cursor: Option<Cursor> = None;

        loop {
            if self.cancel.is_cancelled() {
                crawl.cancelled = true;
                break;
            }

            let page = self
                .retrying(|| self.source.fetch_page(channel, window, cursor.as_ref()))
                .await?;

            let Some(Page { messages, next }) = page else {
                crawl.cancelled = true;
                break;
            };

            let Some((stats, tally)) = self.count_page(channel, window, &messages).await? else {
                crawl.cancelled = true;
                break;
            };

            crawl.pages += 1;
            crawl.tally += tally;
            crawl.stats.merge(stats);

            match next {
                // a source handing back the same cursor would loop forever
                Some(next) if cursor.as_ref() == Some(&next) => {
                    tracing::warn!(cursor = %next, "source did not advance, stopping");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(crawl)
    }

    /// Counts one page into a fresh table; `None` if cancelled part way through
    async fn count_page(
        &self,
        channel: &ChannelInfo,
        window: CrawlWindow,
        messages: &[Message],
    ) -> CrawlResult<Option<(StatsTable, MessageTally)>> {
        let mut stats = StatsTable::new();
        let mut tally = MessageTally::default();

        for message in messages {
            if !window.contains(message.created_at) {
                tally.outside_window += 1;
                continue;
            }

            if message.author.bot {
                tally.bots += 1;
                continue;
            }

            let Some(member) = self
                .retrying(|| self.source.is_member(&message.author.id))
                .await?
            else {
                return Ok(None);
            };

            if !member {
                tracing::debug!(user = %message.author.display_name, "skipping departed member");
                tally.departed += 1;
                continue;
            }

            let attribution = extract_name(&message.content, channel.category.as_deref());
            match attribution.label() {
                Some(label) => {
                    stats.record(&AttributionEvent::new(
                        &message.author.name,
                        label,
                        message.created_at,
                    ));
                    tally.counted += 1;
                }
                None => tally.dropped += 1,
            }
        }

        Ok(Some((stats, tally)))
    }

    /// Runs `op` until it succeeds, retrying transient failures with backoff.
    ///
    /// Returns `Ok(None)` if the crawl is cancelled while waiting.
    async fn retrying<T, F, Fut>(&self, mut op: F) -> CrawlResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut retry = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = op() => result,
            };

            let error = match result {
                Ok(value) => return Ok(Some(value)),
                Err(error) => error,
            };

            let SourceError::Transient { retry_after, .. } = &error else {
                return Err(CrawlError::Source(error));
            };

            if retry >= self.retry.max_retries {
                return Err(CrawlError::RetriesExhausted {
                    attempts: retry + 1,
                    last: error,
                });
            }

            let delay = self.retry.delay(retry, *retry_after);
            retry += 1;
            tracing::warn!(error = %error, retry, delay_ms = delay.as_millis() as u64, "retrying");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn report_progress(&self, done: usize, total: usize, last_channel: String) {
        let Some(progress) = &self.progress else {
            return;
        };

        let update = CrawlProgress {
            done,
            total,
            last_channel,
        };

        if let Err(e) = progress.send(update) {
            tracing::debug!(error = ?e, "progress receiver dropped");
        }
    }
}

pub type CrawlResult<T> = core::result::Result<T, CrawlError>;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SourceError },
}
