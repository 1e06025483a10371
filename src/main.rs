use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::args::{Cli, Command};
use crate::config::JsonConfigStore;
use crate::crawl::crawler::CrawlProgress;
use crate::discord::DiscordSource;
use crate::discord::client::DiscordErr;
use crate::handler::{CrawlOptions, Handler, HandlerErr};
use crate::parsing::commands::CommandError;
use crate::util::env::{self, EnvErr, Var};
use crate::util::telemetry::Telemetry;

mod args;
mod config;
mod constants;
mod crawl;
mod discord;
mod handler;
mod parsing;
mod stats;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Discord(#[from] DiscordErr),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Handler(#[from] HandlerErr),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = args::parse_cli_args();

    let env = env::env().await;
    let telemetry = match &env {
        Ok(env) => Telemetry::new(env)?,
        Err(_) => Telemetry::console(),
    }
    .register();

    let result = match env {
        Ok(_) => run(args).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "slurpotron failed");
    }

    telemetry.shutdown();
    result
}

async fn run(args: Cli) -> Result<()> {
    tracing::info!(command = ?args.command, workers = args.workers, "starting");

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => PathBuf::from(var!(Var::ConfigPath).await?),
    };
    let store = Arc::new(JsonConfigStore::load(&config_path).await);

    let source = Arc::new(DiscordSource::with_base_url(
        var!(Var::DiscordToken).await?,
        var!(Var::DiscordGuildId).await?,
        var!(Var::DiscordApiUrl).await?,
    )?);

    let cancel = CancellationToken::new();
    let (tx_progress, mut rx_progress) = mpsc::unbounded_channel::<CrawlProgress>();

    let handler = Handler::new(source, store)
        .with_options(CrawlOptions {
            workers: args.workers,
            activity: args.command.wants_activity(),
            ..CrawlOptions::default()
        })
        .with_cancellation(cancel.clone())
        .with_progress(tx_progress);

    let progress = tokio::spawn(async move {
        while let Some(update) = rx_progress.recv().await {
            tracing::info!(
                done = update.done,
                total = update.total,
                last = %update.last_channel,
                "Working ... {} done",
                update.done
            );
        }
    });

    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, reporting partial results");
                cancel.cancel();
            }
        }
    });

    let reply = match &args.command {
        Command::Chat { line } => handler.handle_line(line).await,
        command => match command.to_bot_command()? {
            Some(command) => handler.dispatch(command).await.map(Some),
            None => Ok(None),
        },
    };

    // closes the progress channel
    drop(handler);
    interrupt.abort();
    _ = progress.await;

    match reply? {
        Some(reply) => println!("{reply}"),
        None => tracing::info!("not a command, nothing to do"),
    }

    Ok(())
}
