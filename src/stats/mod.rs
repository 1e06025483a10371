use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DAY_BOUNDARY_HOUR;

pub mod report;
pub mod xp;

pub type DayCounts = BTreeMap<NaiveDate, u32>;
pub type CharacterCounts = BTreeMap<String, DayCounts>;

/// One counted post: who wrote it, which character it was attributed to, and which day bucket
/// it falls into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionEvent {
    pub user: String,
    pub character: String,
    pub date: NaiveDate,
}

impl AttributionEvent {
    pub fn new(user: impl Into<String>, character: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            character: character.into(),
            date: day_bucket(at),
        }
    }
}

/// Calendar day a timestamp is counted under.
///
/// Days start at `DAY_BOUNDARY_HOUR` UTC and are labelled by the date they start on, so a post at
/// 17:59 UTC on the 2nd belongs to the 1st.
pub fn day_bucket(at: DateTime<Utc>) -> NaiveDate {
    (at - TimeDelta::hours(DAY_BOUNDARY_HOUR as i64)).date_naive()
}

/// Post counts keyed by user, then character, then day.
///
/// Missing cells read as zero; cells are only created by adding a non-zero count, so a table never
/// holds explicit zeroes and two tables built from the same events compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsTable {
    users: BTreeMap<String, CharacterCounts>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &AttributionEvent) {
        self.add(&event.user, &event.character, event.date, 1);
    }

    pub fn add(&mut self, user: &str, character: &str, date: NaiveDate, count: u32) {
        if count == 0 {
            return;
        }

        let days = self
            .users
            .entry(user.to_string())
            .or_default()
            .entry(character.to_string())
            .or_default();

        *days.entry(date).or_insert(0) += count;
    }

    /// Folds `other` into `self`, summing counts under matching keys
    pub fn merge(&mut self, other: StatsTable) {
        for (user, characters) in other.users {
            let target = match self.users.entry(user) {
                Entry::Vacant(slot) => {
                    slot.insert(characters);
                    continue;
                }
                Entry::Occupied(slot) => slot.into_mut(),
            };

            for (character, days) in characters {
                let target_days = target.entry(character).or_default();
                for (date, count) in days {
                    *target_days.entry(date).or_insert(0) += count;
                }
            }
        }
    }

    pub fn users(&self) -> impl Iterator<Item = (&str, &CharacterCounts)> {
        self.users.iter().map(|(user, chars)| (user.as_str(), chars))
    }

    pub fn total_posts(&self) -> u64 {
        self.users
            .values()
            .flat_map(|chars| chars.values())
            .flat_map(|days| days.values())
            .map(|count| *count as u64)
            .sum()
    }
}

#[cfg(test)]
impl StatsTable {
    pub fn get(&self, user: &str, character: &str, date: NaiveDate) -> u32 {
        self.users
            .get(user)
            .and_then(|chars| chars.get(character))
            .and_then(|days| days.get(&date))
            .copied()
            .unwrap_or(0)
    }

    pub fn merged(mut self, other: StatsTable) -> StatsTable {
        self.merge(other);
        self
    }

    pub fn characters(&self, user: &str) -> Option<&CharacterCounts> {
        self.users.get(user)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<AttributionEvent> for StatsTable {
    fn from_iter<T: IntoIterator<Item = AttributionEvent>>(iter: T) -> Self {
        let mut table = StatsTable::new();
        iter.into_iter().for_each(|event| table.record(&event));
        table
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;

    use super::*;

    pub fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    pub fn table(cells: &[(&str, &str, u32, u32)]) -> StatsTable {
        let mut table = StatsTable::new();
        for (user, character, day, count) in cells {
            table.add(user, character, date(*day), *count);
        }
        table
    }

    #[test]
    fn test_day_bucket_boundary() {
        let before = Utc.with_ymd_and_hms(2024, 3, 2, 17, 59, 59).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 18, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();

        assert_eq!(day_bucket(before), date(1));
        assert_eq!(day_bucket(at), date(2));
        assert_eq!(day_bucket(midnight), date(2));
    }

    #[test]
    fn test_record_and_default_zero() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 20, 0, 0).unwrap();
        let events = vec![
            AttributionEvent::new("ana", "Jean Claude", at),
            AttributionEvent::new("ana", "Jean Claude", at),
            AttributionEvent::new("ana", "Vex", at),
        ];

        let stats: StatsTable = events.into_iter().collect();

        assert_eq!(stats.get("ana", "Jean Claude", date(5)), 2);
        assert_eq!(stats.get("ana", "Vex", date(5)), 1);
        assert_eq!(stats.get("ana", "Vex", date(6)), 0);
        assert_eq!(stats.get("bo", "Vex", date(5)), 0);
        assert_eq!(stats.total_posts(), 3);
    }

    #[test]
    fn test_zero_count_creates_no_cell() {
        let mut stats = StatsTable::new();
        stats.add("ana", "Vex", date(1), 0);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let a = table(&[("ana", "Vex", 1, 2), ("bo", "Old Tom", 3, 1)]);

        assert_eq!(a.clone().merged(StatsTable::new()), a);
        assert_eq!(StatsTable::new().merged(a.clone()), a);
    }

    #[test]
    fn test_merge_sums_and_unions() {
        let a = table(&[("ana", "Vex", 1, 2), ("bo", "Old Tom", 3, 1)]);
        let b = table(&[("ana", "Vex", 1, 3), ("ana", "Vex", 2, 1), ("cy", "Unknown", 4, 5)]);

        let merged = a.merged(b);

        assert_eq!(merged.get("ana", "Vex", date(1)), 5);
        assert_eq!(merged.get("ana", "Vex", date(2)), 1);
        assert_eq!(merged.get("bo", "Old Tom", date(3)), 1);
        assert_eq!(merged.get("cy", "Unknown", date(4)), 5);
        assert_eq!(merged.total_posts(), 12);
    }

    #[test]
    fn test_merge_order_and_grouping() {
        let a = table(&[("ana", "Vex", 1, 2), ("bo", "Old Tom", 3, 1)]);
        let b = table(&[("ana", "Vex", 1, 3), ("ana", "Marguerite", 2, 1)]);
        let c = table(&[("bo", "Old Tom", 3, 4), ("cy", "Vex", 1, 1)]);

        let left = a.clone().merged(b.clone()).merged(c.clone());
        let right = a.clone().merged(b.clone().merged(c.clone()));
        let reversed = c.clone().merged(b.clone()).merged(a.clone());
        let shuffled = b.merged(a).merged(c);

        assert_eq!(left, right);
        assert_eq!(left, reversed);
        assert_eq!(left, shuffled);
    }

    #[test]
    fn test_disjoint_merge_matches_single_pass() {
        let at = |day, hour| Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap();
        let events = vec![
            AttributionEvent::new("ana", "Vex", at(1, 19)),
            AttributionEvent::new("ana", "Vex", at(2, 3)),
            AttributionEvent::new("bo", "Old Tom", at(2, 20)),
            AttributionEvent::new("ana", "Vex", at(3, 19)),
        ];

        let whole: StatsTable = events.clone().into_iter().collect();
        let (first, second) = events.split_at(2);
        let halves = first
            .iter()
            .cloned()
            .collect::<StatsTable>()
            .merged(second.iter().cloned().collect());

        assert_eq!(whole, halves);
    }

    #[test]
    fn test_serializes_as_nested_map() {
        let stats = table(&[("ana", "Vex", 1, 2)]);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json, serde_json::json!({ "ana": { "Vex": { "2024-03-01": 2 } } }));

        let back: StatsTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}
