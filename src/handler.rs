use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{ConfigError, ConfigurationStore};
use crate::constants::DEFAULT_WORKERS;
use crate::crawl::crawler::{ChannelCrawler, CrawlProgress, RetryPolicy};
use crate::crawl::filter::partition_channels;
use crate::crawl::{ChannelSource, SourceError};
use crate::parsing::commands::{BotCommand, DateRange, HELP_TEXT};
use crate::stats::report::{ReportHeader, render_activity, render_xp};
use crate::stats::xp::calculate_xp;

#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Append the per-character activity report to the XP report
    pub activity: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            activity: false,
        }
    }
}

/// Runs bot commands against a channel source and a configuration store, producing the reply
pub struct Handler<S, C> {
    source: Arc<S>,
    store: Arc<C>,
    options: CrawlOptions,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<CrawlProgress>>,
}

impl<S, C> Handler<S, C>
where
    S: ChannelSource,
    C: ConfigurationStore,
{
    pub fn new(source: Arc<S>, store: Arc<C>) -> Self {
        Self {
            source,
            store,
            options: CrawlOptions::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: CrawlOptions) -> Self {
        self.options = options;
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

    /// Handles a raw chat line. Returns `None` for lines that are not commands; malformed
    /// commands are answered with the help text.
    #[instrument(skip(self))]
    pub async fn handle_line(&self, line: &str) -> HandlerResult<Option<String>> {
        match BotCommand::parse(line) {
            Ok(Some(command)) => self.dispatch(command).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "rejected command");
                Ok(Some(format!("*{e}*\n{HELP_TEXT}")))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn dispatch(&self, command: BotCommand) -> HandlerResult<String> {
        let reply = match command {
            BotCommand::Crawl { range } => self.crawl(range).await?,
            BotCommand::Include(patterns) => {
                let added = self.store.include_categories(&patterns).await?;
                format!("Allowing {added} additional categories.\nView with `!!included`.")
            }
            BotCommand::Included => {
                let patterns = self.store.get_excluded_categories().await;
                let listed = patterns.into_iter().collect::<Vec<_>>().join("\n");
                format!("**Including these category patterns in the XP crawl:**\n\n{listed}")
            }
            BotCommand::MaxXp(Some(value)) => {
                self.store.set_max_xp(value).await?;
                format!("Set the maximum RP XP to {value}.")
            }
            BotCommand::MaxXp(None) => {
                format!("The maximum RP XP is {}.", self.store.get_max_xp().await)
            }
            BotCommand::DailyThreshold(Some(value)) => {
                self.store.set_threshold(value).await?;
                format!("Set the daily post threshold to {value}.")
            }
            BotCommand::DailyThreshold(None) => format!(
                "The daily post threshold is {}.",
                self.store.get_threshold().await
            ),
            BotCommand::Help => HELP_TEXT.to_string(),
        };

        Ok(reply)
    }

    async fn crawl(&self, range: DateRange) -> HandlerResult<String> {
        // later configuration changes must not reach this crawl
        let config = self.store.snapshot().await;
        let scoring = config.scoring();

        let channels = self.source.list_channels().await?;
        let (channels, skipped) = partition_channels(channels, &config.included_categories);
        for channel in &skipped {
            tracing::debug!(channel = %channel, category = ?channel.category, "skipping channel");
        }

        tracing::info!(
            start = %range.start,
            end = %range.end,
            channels = channels.len(),
            skipped = skipped.len(),
            threshold = scoring.threshold,
            max_xp = scoring.max_xp,
            "starting crawl"
        );

        let mut crawler = ChannelCrawler::new(self.source.clone())
            .with_workers(self.options.workers)
            .with_retry(self.options.retry)
            .with_cancellation(self.cancel.clone());
        if let Some(progress) = &self.progress {
            crawler = crawler.with_progress(progress.clone());
        }

        let outcome = crawler.crawl_all(channels, range.window()).await;
        let xp = calculate_xp(&outcome.stats, &scoring);

        let header = ReportHeader {
            start: range.start,
            end: range.end,
            partial: outcome.partial,
            failed_channels: outcome.failed_channels(),
        };

        let mut reply = render_xp(&xp, &header);
        if self.options.activity {
            reply.push('\n');
            reply.push_str(&render_activity(&outcome.stats, &scoring));
        }

        Ok(reply)
    }
}

pub type HandlerResult<T> = core::result::Result<T, HandlerErr>;

#[derive(Debug, Error)]
pub enum HandlerErr {
    #[error("could not save configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not list channels: {0}")]
    Source(#[from] SourceError),
}
