use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::constants::{COMMAND_PREFIX, DATE_FORMAT, DAY_BOUNDARY_HOUR};
use crate::crawl::CrawlWindow;
use crate::parsing::lexer::Lexer;

pub const HELP_TEXT: &str = "Instructions:
```
!!crawl <YYYYMMDD> [YYYYMMDD] | Calculate RP XP between two dates
!!include <categories>        | Include a list of categories in the crawl. Exactness not required
!!included                    | Show the categories included in the crawl
!!max_xp [new value]          | Set or view the maximum RP XP
!!daily_threshold [new value] | Set or view the posts required to receive XP
!!help                        | Print this message
```";

pub type CommandResult<T> = core::result::Result<T, CommandError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),

    #[error("the start date must be before the end date")]
    EmptyRange,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),

    #[error("too many arguments for '{0}'")]
    TooManyArguments(&'static str),
}

/// Crawl bounds, both exclusive, anchored at the community's day boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Parses `YYYYMMDD` dates; a missing end date means "now"
    pub fn parse(start: &str, end: Option<&str>) -> CommandResult<Self> {
        Self::parse_at(start, end, Utc::now())
    }

    pub fn parse_at(start: &str, end: Option<&str>, now: DateTime<Utc>) -> CommandResult<Self> {
        let start = parse_day(start)?;
        let end = match end {
            Some(end) => parse_day(end)?,
            None => now,
        };

        if start >= end {
            return Err(CommandError::EmptyRange);
        }

        Ok(Self { start, end })
    }

    pub fn window(&self) -> CrawlWindow {
        CrawlWindow {
            after: self.start,
            before: self.end,
        }
    }
}

fn parse_day(raw: &str) -> CommandResult<DateTime<Utc>> {
    let invalid = || CommandError::InvalidDate(raw.to_string());

    // chrono's %Y also takes signs and short years
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| invalid())?;
    let at = date.and_hms_opt(DAY_BOUNDARY_HOUR, 0, 0).ok_or_else(invalid)?;

    Ok(at.and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Crawl { range: DateRange },
    /// Category include-patterns to add
    Include(Vec<String>),
    Included,
    /// Set the cap, or show it when `None`
    MaxXp(Option<u32>),
    /// Set the threshold, or show it when `None`
    DailyThreshold(Option<u32>),
    Help,
}

impl BotCommand {
    /// Parses a chat line. Lines without the command prefix are not for us and yield `Ok(None)`.
    pub fn parse(line: &str) -> CommandResult<Option<Self>> {
        Self::parse_at(line, Utc::now())
    }

    pub fn parse_at(line: &str, now: DateTime<Utc>) -> CommandResult<Option<Self>> {
        let mut lexer = Lexer::new(line);
        lexer.skip_whitespace();

        if !lexer.eat_ignore_case(COMMAND_PREFIX) {
            return Ok(None);
        }

        let name = lexer.next_word().unwrap_or_default().to_lowercase();
        lexer.skip_whitespace();

        let mut args = Vec::new();
        while !lexer.is_eof() {
            args.extend(lexer.next_word());
            lexer.skip_whitespace();
        }

        tracing::debug!(command = %name, args = args.len(), "parsed command");

        let command = match name.as_str() {
            "crawl" => match args.as_slice() {
                [] => {
                    return Err(CommandError::MissingArgument {
                        command: "crawl",
                        argument: "a start date",
                    });
                }
                [start] => BotCommand::Crawl {
                    range: DateRange::parse_at(start, None, now)?,
                },
                [start, end] => BotCommand::Crawl {
                    range: DateRange::parse_at(start, Some(*end), now)?,
                },
                _ => return Err(CommandError::TooManyArguments("crawl")),
            },
            "include" if args.is_empty() => {
                return Err(CommandError::MissingArgument {
                    command: "include",
                    argument: "at least one category",
                });
            }
            "include" => BotCommand::Include(args.iter().map(|arg| arg.to_string()).collect()),
            "included" => BotCommand::Included,
            "max_xp" => BotCommand::MaxXp(optional_number("max_xp", &args)?),
            "daily_threshold" => {
                BotCommand::DailyThreshold(optional_number("daily_threshold", &args)?)
            }
            "help" => BotCommand::Help,
            _ => return Err(CommandError::UnknownCommand(name)),
        };

        Ok(Some(command))
    }
}

fn optional_number(command: &'static str, args: &[&str]) -> CommandResult<Option<u32>> {
    match args {
        [] => Ok(None),
        [value] => value
            .parse()
            .map(Some)
            .map_err(|_| CommandError::InvalidNumber(value.to_string())),
        _ => Err(CommandError::TooManyArguments(command)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap()
    }

    fn parse(line: &str) -> CommandResult<Option<BotCommand>> {
        BotCommand::parse_at(line, now())
    }

    #[test]
    fn test_date_range_anchored_at_day_boundary() {
        let range = DateRange::parse_at("20240301", Some("20240308"), now()).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 3, 8, 18, 0, 0).unwrap());
        assert_eq!(range.window().after, range.start);
        assert_eq!(range.window().before, range.end);
    }

    #[test]
    fn test_date_range_defaults_to_now() {
        let range = DateRange::parse_at("20240301", None, now()).unwrap();
        assert_eq!(range.end, now());
    }

    #[test]
    fn test_malformed_dates_rejected() {
        for raw in ["2024-03-01", "240301", "20241301", "20240230", "+2024031", "tomorrow", ""] {
            assert_eq!(
                DateRange::parse_at(raw, None, now()),
                Err(CommandError::InvalidDate(raw.to_string())),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_empty_range_rejected() {
        assert_eq!(
            DateRange::parse_at("20240308", Some("20240301"), now()),
            Err(CommandError::EmptyRange)
        );
        assert_eq!(
            DateRange::parse_at("20240301", Some("20240301"), now()),
            Err(CommandError::EmptyRange)
        );
        // start in the future with no end date
        assert_eq!(
            DateRange::parse_at("20240311", None, now()),
            Err(CommandError::EmptyRange)
        );
    }

    #[test]
    fn test_lines_without_prefix_are_ignored() {
        assert_eq!(parse("crawl 20240301"), Ok(None));
        assert_eq!(parse("Vex: hello !!help"), Ok(None));
        assert_eq!(parse(""), Ok(None));
    }

    #[test]
    fn test_crawl() {
        let expected = DateRange::parse_at("20240301", Some("20240308"), now()).unwrap();
        assert_eq!(
            parse("  !!crawl 20240301   20240308"),
            Ok(Some(BotCommand::Crawl { range: expected }))
        );

        assert!(matches!(
            parse("!!CRAWL 20240301"),
            Ok(Some(BotCommand::Crawl { .. }))
        ));
        assert!(matches!(
            parse("!!crawl"),
            Err(CommandError::MissingArgument { command: "crawl", .. })
        ));
        assert_eq!(
            parse("!!crawl 1 2 3"),
            Err(CommandError::TooManyArguments("crawl"))
        );
        assert_eq!(
            parse("!!crawl 2024-03-01"),
            Err(CommandError::InvalidDate("2024-03-01".to_string()))
        );
    }

    #[test]
    fn test_config_commands() {
        assert_eq!(
            parse("!!include Downtown docks"),
            Ok(Some(BotCommand::Include(vec![
                "Downtown".to_string(),
                "docks".to_string()
            ])))
        );
        assert!(parse("!!include").is_err());
        assert_eq!(parse("!!included"), Ok(Some(BotCommand::Included)));
        assert_eq!(parse("!!max_xp"), Ok(Some(BotCommand::MaxXp(None))));
        assert_eq!(parse("!!max_xp 5"), Ok(Some(BotCommand::MaxXp(Some(5)))));
        assert_eq!(
            parse("!!daily_threshold 0"),
            Ok(Some(BotCommand::DailyThreshold(Some(0))))
        );
        assert_eq!(
            parse("!!daily_threshold -1"),
            Err(CommandError::InvalidNumber("-1".to_string()))
        );
        assert_eq!(parse("!!help"), Ok(Some(BotCommand::Help)));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse("!!dance now"),
            Err(CommandError::UnknownCommand("dance".to_string()))
        );
        assert_eq!(parse("!!"), Err(CommandError::UnknownCommand(String::new())));
    }
}
