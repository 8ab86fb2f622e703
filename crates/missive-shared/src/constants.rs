/// Application name
pub const APP_NAME: &str = "Missive";

/// Distinguished presence status: user currently connected
pub const PRESENCE_ONLINE: &str = "Online";

/// Distinguished presence status: user disconnected, last-seen unknown
pub const PRESENCE_OFFLINE: &str = "Offline";

/// Presence window rendered as "seen just now" (milliseconds)
pub const PRESENCE_JUST_NOW_MS: i64 = 60_000;

/// Presence window rendered as "seen N min ago" (milliseconds, one hour)
pub const PRESENCE_MINUTES_MS: i64 = 3_600_000;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 128;

/// Upper bound on directory prefix-search results
pub const DIRECTORY_SEARCH_LIMIT: usize = 20;

/// Minimum digit count for a phone number to take part in contact matching
pub const MIN_PHONE_DIGITS: usize = 10;

/// Exclusive upper bound appended to a prefix for range queries over
/// `username_lowercase` (last code point of the Unicode private-use area)
pub const PREFIX_RANGE_CEILING: char = '\u{f8ff}';

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
