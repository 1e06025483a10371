pub const DISCORD_API_URL: &str = "https://discord.com/api/v10";
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
pub const DISCORD_PAGE_LIMIT: usize = 100;

// requests per second; discord's global limit is 50/s
pub const DISCORD_REQUESTS_PER_SECOND: usize = 45;

pub const DEFAULT_CONFIG_PATH: &str = "configuration.json";
pub const DEFAULT_THRESHOLD: u32 = 1;
pub const DEFAULT_MAX_XP: u32 = 3;
pub const DEFAULT_WORKERS: usize = 4;

/// Sunrise/sundown for the community happens at 1800 UTC, so a "day" runs from 1800 to 1800.
pub const DAY_BOUNDARY_HOUR: u32 = 18;

/// Progress is reported to the caller every time this many channels have finished.
pub const PROGRESS_INTERVAL: usize = 10;

pub const CORRESPONDENCE_LABEL: &str = "Correspondence";
pub const UNKNOWN_LABEL: &str = "Unknown";
pub const CORRESPONDENCE_CATEGORY: &str = "correspondence";

pub const CONTROL_TOKENS: [&str; 2] = ["-start", "-end"];
pub const FENCE_LANGUAGES: [&str; 9] = ["css", "yaml", "http", "arm", "excel", "fix", "ini", "ml", "md"];
pub const EMPHASIS_MARKERS: [char; 2] = ['*', '_'];
pub const MAX_NAME_WORDS: usize = 4;

pub const EXCLUDED_CATEGORY_CHARS: [char; 2] = ['[', '【'];
pub const EXCLUDED_CHANNEL_FRAGMENTS: [&str; 2] = ["coord", "rolls"];

pub const COMMAND_PREFIX: &str = "!!";
pub const DATE_FORMAT: &str = "%Y%m%d";
pub const REPORT_DATE_FORMAT: &str = "%A, %b %d, %Y";
