use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::constants::{DEFAULT_MAX_XP, DEFAULT_THRESHOLD};
use crate::stats::{DayCounts, StatsTable};

/// Scoring values in effect for one crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Posts needed on a day for that day to count
    pub threshold: u32,
    /// Most XP one character can earn in a single crawl
    pub max_xp: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_xp: DEFAULT_MAX_XP,
        }
    }
}

pub type XpTable = BTreeMap<String, BTreeMap<String, u32>>;

/// Number of days on which a character met the posting threshold
pub fn qualifying_days(days: &DayCounts, threshold: u32) -> u32 {
    days.values().filter(|count| **count >= threshold).count() as u32
}

/// Every two qualifying days earn one XP, rounding up, capped at `max_xp`
pub fn award(days: &DayCounts, config: &ScoringConfig) -> u32 {
    qualifying_days(days, config.threshold)
        .div_ceil(2)
        .min(config.max_xp)
}

/// Scores every user/character pair in `stats`, including the "Unknown" label; hiding it is left
/// to the report
#[instrument(skip(stats), fields(users = stats.users().count()))]
pub fn calculate_xp(stats: &StatsTable, config: &ScoringConfig) -> XpTable {
    stats
        .users()
        .map(|(user, characters)| {
            let awards = characters
                .iter()
                .map(|(character, days)| (character.clone(), award(days, config)))
                .collect();

            (user.to_string(), awards)
        })
        .collect()
}
