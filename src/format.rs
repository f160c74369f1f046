//! Display helpers for timestamps and hashes

use chrono::{DateTime, Utc};

/// `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_date(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

/// Relative time such as "3 minutes ago" or "in 2 hours"
pub fn format_friendly(timestamp: u64, now: u64) -> String {
    let (delta, future) = if timestamp > now {
        (timestamp - now, true)
    } else {
        (now - timestamp, false)
    };

    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    if delta < MINUTE {
        return "just now".to_string();
    }
    if !future && (DAY..2 * DAY).contains(&delta) {
        return "yesterday".to_string();
    }

    let span = match delta {
        d if d < HOUR => plural(d / MINUTE, "minute"),
        d if d < DAY => plural(d / HOUR, "hour"),
        d if d < MONTH => plural(d / DAY, "day"),
        d if d < YEAR => plural(d / MONTH, "month"),
        d => plural(d / YEAR, "year"),
    };

    if future {
        format!("in {}", span)
    } else {
        format!("{} ago", span)
    }
}

/// `abcdef...1234`. Short hashes are returned whole.
pub fn truncate_hash(hash: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = hash.chars().collect();
    if chars.len() <= start + end {
        return hash.to_string();
    }

    let head: String = chars[..start].iter().collect();
    let tail: String = chars[chars.len() - end..].iter().collect();
    format!("{}...{}", head, tail)
}
