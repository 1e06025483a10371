use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::constants::DEFAULT_WORKERS;
use crate::parsing::commands::{BotCommand, CommandResult, DateRange};

#[derive(Parser, Debug)]
#[command(version, about = "Tallies roleplay posts and calculates RP XP")]
pub struct Cli {
    /// Channels crawled at the same time
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Scoring configuration file (overrides SLURPOTRON_CONFIG)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Calculate RP XP between two dates (YYYYMMDD); the end defaults to now
    Crawl {
        start: String,
        end: Option<String>,

        /// Also print per-character post and qualifying-day totals
        #[arg(long)]
        activity: bool,
    },

    /// Include a list of categories in the crawl. Exactness not required
    Include {
        #[arg(required = true)]
        categories: Vec<String>,
    },

    /// Show the categories included in the crawl
    Included,

    /// Set or view the maximum RP XP
    MaxXp { value: Option<u32> },

    /// Set or view the posts required to receive XP
    DailyThreshold { value: Option<u32> },

    /// Handle a raw chat line, e.g. `chat '!!crawl 20240301'`
    Chat { line: String },
}

impl Command {
    /// The bot command this subcommand stands for; `Chat` lines are parsed by the caller
    pub fn to_bot_command(&self) -> CommandResult<Option<BotCommand>> {
        let command = match self {
            Command::Crawl { start, end, .. } => BotCommand::Crawl {
                range: DateRange::parse(start, end.as_deref())?,
            },
            Command::Include { categories } => BotCommand::Include(categories.clone()),
            Command::Included => BotCommand::Included,
            Command::MaxXp { value } => BotCommand::MaxXp(*value),
            Command::DailyThreshold { value } => BotCommand::DailyThreshold(*value),
            Command::Chat { .. } => return Ok(None),
        };

        Ok(Some(command))
    }

    pub fn wants_activity(&self) -> bool {
        matches!(self, Command::Crawl { activity: true, .. })
    }
}

pub fn parse_cli_args() -> Cli {
    Cli::parse()
}
