use crate::constants::{EXCLUDED_CATEGORY_CHARS, EXCLUDED_CHANNEL_FRAGMENTS};
use crate::crawl::ChannelInfo;

/// Whether `channel` should be crawled given the configured category include-patterns.
///
/// Coordination and dice-roll channels are never crawled, nor are categories with brackets in
/// their name (archived and staff-only categories are marked that way).
pub fn in_allowed_category(channel: &ChannelInfo, patterns: &[String]) -> bool {
    if EXCLUDED_CHANNEL_FRAGMENTS
        .iter()
        .any(|fragment| channel.name.contains(fragment))
    {
        return false;
    }

    let Some(category) = channel.category.as_deref() else {
        return false;
    };

    let category = category.to_lowercase();
    if category.contains(EXCLUDED_CATEGORY_CHARS) {
        return false;
    }

    patterns
        .iter()
        .any(|pattern| category.contains(pattern.as_str()))
}

/// Splits `channels` into those to crawl and those skipped
pub fn partition_channels(
    channels: Vec<ChannelInfo>,
    patterns: &[String],
) -> (Vec<ChannelInfo>, Vec<ChannelInfo>) {
    channels
        .into_iter()
        .partition(|channel| in_allowed_category(channel, patterns))
}
