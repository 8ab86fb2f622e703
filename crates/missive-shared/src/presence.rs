//! Presence formatting.
//!
//! Turns the raw presence fields of a [`UserProfile`] into the status line
//! shown under a contact's name ("Online", "seen 5 min ago", "seen yesterday
//! at 23:30", ...).  The formatter is pure; callers pass the reference
//! instant so the output is reproducible.

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::constants::{
    PRESENCE_JUST_NOW_MS, PRESENCE_MINUTES_MS, PRESENCE_OFFLINE, PRESENCE_ONLINE,
};
use crate::types::UserProfile;

/// Formats a presence status against an explicit reference instant.
///
/// `now` also fixes the viewer's timezone: "today" and "yesterday" are
/// calendar days in `now`'s zone, not rolling 24-hour windows.
///
/// Rules, in order:
/// - `"Online"` is returned as-is.
/// - With a positive `last_seen_ms` the line is relative: "seen just now"
///   under a minute, "seen N min ago" under an hour, then calendar-based
///   ("today", "yesterday", full date).
/// - Anything else (including `"Offline"` without a timestamp) is returned
///   verbatim.
pub fn format_status_at<Tz: TimeZone>(
    status: &str,
    last_seen_ms: Option<i64>,
    now: DateTime<Tz>,
) -> String {
    if status == PRESENCE_ONLINE {
        return PRESENCE_ONLINE.to_string();
    }

    let ms = match last_seen_ms {
        Some(ms) if ms > 0 => ms,
        _ => return status.to_string(),
    };
    let last_seen = match Utc.timestamp_millis_opt(ms).single() {
        Some(instant) => instant.with_timezone(&now.timezone()),
        // Out-of-range millis: treat as if no timestamp were recorded.
        None => return status.to_string(),
    };

    let diff_ms = now.timestamp_millis() - ms;
    if diff_ms < PRESENCE_JUST_NOW_MS {
        return "seen just now".to_string();
    }
    if diff_ms < PRESENCE_MINUTES_MS {
        return format!("seen {} min ago", diff_ms / 60_000);
    }

    let local = last_seen.naive_local();
    let time = local.format("%H:%M");
    let today = now.date_naive();
    if local.date() == today {
        format!("seen today at {time}")
    } else if Some(local.date()) == today.pred_opt() {
        format!("seen yesterday at {time}")
    } else {
        format!("seen on {} at {time}", local.format("%d %b %Y"))
    }
}

/// Formats a profile's presence against the current local time.
pub fn format_status(profile: &UserProfile) -> String {
    format_status_at(
        &profile.presence_status,
        profile.last_seen_ms,
        Local::now(),
    )
}

/// Caches the formatted line for one profile.
///
/// Recomputes only when `presence_status` or `last_seen_ms` changed, so a
/// list row re-rendering on every unrelated profile update does not reformat
/// the same instant over and over.
#[derive(Debug, Default)]
pub struct PresenceBadge {
    key: Option<(String, Option<i64>)>,
    line: String,
}

impl PresenceBadge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the formatted line for `profile` against the local clock.
    pub fn line(&mut self, profile: &UserProfile) -> &str {
        self.line_at(profile, Local::now())
    }

    /// Returns the formatted line for `profile` against an explicit instant.
    pub fn line_at<Tz: TimeZone>(&mut self, profile: &UserProfile, now: DateTime<Tz>) -> &str {
        let key = (profile.presence_status.clone(), profile.last_seen_ms);
        if self.key.as_ref() != Some(&key) {
            self.line = format_status_at(&key.0, key.1, now);
            self.key = Some(key);
        }
        &self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    fn profile(status: &str, last_seen_ms: Option<i64>) -> UserProfile {
        UserProfile {
            uid: UserId::new("u1"),
            username: "Ada".into(),
            username_lowercase: "ada".into(),
            phone: "+15550000001".into(),
            profile_picture_url: None,
            push_token: None,
            presence_status: status.into(),
            last_seen_ms,
            contacts: vec![],
        }
    }

    #[test]
    fn online_wins_over_timestamp() {
        let now = fixed_now();
        let line = format_status_at("Online", Some(now.timestamp_millis() - 5_000), now);
        assert_eq!(line, "Online");
    }

    #[test]
    fn offline_without_timestamp_is_verbatim() {
        assert_eq!(format_status_at("Offline", None, fixed_now()), "Offline");
        assert_eq!(format_status_at("Offline", Some(0), fixed_now()), "Offline");
    }

    #[test]
    fn under_a_minute_is_just_now() {
        let now = fixed_now();
        let line = format_status_at("Offline", Some(now.timestamp_millis() - 30_000), now);
        assert_eq!(line, "seen just now");
    }

    #[test]
    fn under_an_hour_is_minutes_ago() {
        let now = fixed_now();
        let line = format_status_at("Offline", Some(now.timestamp_millis() - 30 * 60_000), now);
        assert_eq!(line, "seen 30 min ago");
    }

    #[test]
    fn same_day_is_today() {
        let now = fixed_now();
        let seen = Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap();
        let line = format_status_at("Offline", Some(seen.timestamp_millis()), now);
        assert_eq!(line, "seen today at 09:15");
    }

    #[test]
    fn previous_day_is_yesterday() {
        let now = fixed_now();
        let seen = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let line = format_status_at("Offline", Some(seen.timestamp_millis()), now);
        assert_eq!(line, "seen yesterday at 23:30");
    }

    #[test]
    fn older_gets_the_full_date() {
        let now = fixed_now();
        let seen = Utc.with_ymd_and_hms(2023, 12, 28, 8, 0, 0).unwrap();
        let line = format_status_at("Offline", Some(seen.timestamp_millis()), now);
        assert_eq!(line, "seen on 28 Dec 2023 at 08:00");
    }

    #[test]
    fn free_text_status_is_verbatim() {
        assert_eq!(format_status_at("In a meeting", None, fixed_now()), "In a meeting");
        assert_eq!(format_status_at("", None, fixed_now()), "");
    }

    #[test]
    fn badge_caches_until_the_fields_change() {
        let mut badge = PresenceBadge::new();
        let now = fixed_now();
        let seen = now.timestamp_millis() - 30_000;

        let p = profile("Offline", Some(seen));
        assert_eq!(badge.line_at(&p, now), "seen just now");

        // Same fields, later instant: the cached line is reused even though
        // a fresh format would now say something else.
        let later = now + chrono::Duration::minutes(30);
        assert_eq!(badge.line_at(&p, later), "seen just now");

        // Changing a key field invalidates the cache.
        let p2 = profile("Offline", Some(now.timestamp_millis()));
        assert_eq!(badge.line_at(&p2, later), "seen 30 min ago");
    }
}
