use core::fmt::Write;

use chrono::{DateTime, Utc};

use crate::constants::{REPORT_DATE_FORMAT, UNKNOWN_LABEL};
use crate::stats::StatsTable;
use crate::stats::xp::{ScoringConfig, XpTable, qualifying_days};

/// What the reply needs to know about the crawl besides the numbers
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub partial: bool,
    pub failed_channels: Vec<String>,
}

/// One line per user, sorted by user, `user: Character (xp) | Other (xp)`.
///
/// "Unknown" is scored but never shown; users left with nothing to show are omitted.
pub fn xp_lines(xp: &XpTable) -> Vec<String> {
    xp.iter()
        .filter_map(|(user, characters)| {
            let shown = characters
                .iter()
                .filter(|(character, _)| character.as_str() != UNKNOWN_LABEL)
                .map(|(character, awarded)| format!("{character} ({awarded})"))
                .collect::<Vec<_>>();

            if shown.is_empty() {
                None
            } else {
                Some(format!("{user}: {}", shown.join(" | ")))
            }
        })
        .collect()
}

pub fn render_xp(xp: &XpTable, header: &ReportHeader) -> String {
    let mut output = String::from("**Calculated RP XP**\n");
    push_header(&mut output, header);

    output.push_str("```\n");
    for line in xp_lines(xp) {
        output.push_str(&line);
        output.push('\n');
    }
    output.push_str("```");

    output
}

/// Per character post totals and qualifying days, the detailed view behind the XP numbers
pub fn render_activity(stats: &StatsTable, scoring: &ScoringConfig) -> String {
    let mut output = format!(
        "**Activity** (threshold: {} posts/day)\n```\n",
        scoring.threshold
    );

    for (user, characters) in stats.users() {
        for (character, days) in characters {
            let posts: u64 = days.values().map(|count| *count as u64).sum();
            _ = writeln!(
                output,
                "{user} / {character}: {posts} posts on {} days, {} qualifying",
                days.len(),
                qualifying_days(days, scoring.threshold),
            );
        }
    }

    output.push_str("```");
    output
}

fn push_header(output: &mut String, header: &ReportHeader) {
    _ = writeln!(
        output,
        "**Start date:** {}",
        header.start.format(REPORT_DATE_FORMAT)
    );
    _ = writeln!(
        output,
        "**End date:** {}",
        header.end.format(REPORT_DATE_FORMAT)
    );

    if header.partial {
        output.push_str("*Crawl was cancelled; results are partial.*\n");
    }

    if !header.failed_channels.is_empty() {
        _ = writeln!(
            output,
            "*Could not read {} channel(s): {}*",
            header.failed_channels.len(),
            header.failed_channels.join(", ")
        );
    }
}
