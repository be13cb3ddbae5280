//! Human-facing renderings of timestamps.

use time::{macros::format_description, Duration, OffsetDateTime};

/// `05 Jul 2025, 14:30`, always in UTC.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[day] [month repr:short] [year], [hour]:[minute]");
    ts.to_offset(time::UtcOffset::UTC)
        .format(&fmt)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Abbreviated relative time at minute resolution, e.g. `5 min. ago`.
pub fn relative_time(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let delta = now - then;
    let future = delta.is_negative();
    let abs = delta.abs();

    if abs < Duration::HOUR {
        let m = abs.whole_minutes();
        return if future { format!("In {} min.", m) } else { format!("{} min. ago", m) };
    }
    if abs < Duration::DAY {
        let h = abs.whole_hours();
        return if future { format!("In {} hr.", h) } else { format!("{} hr. ago", h) };
    }
    if abs < Duration::days(2) {
        return if future { "Tomorrow".into() } else { "Yesterday".into() };
    }
    if abs < Duration::WEEK {
        let d = abs.whole_days();
        return if future { format!("In {} days", d) } else { format!("{} days ago", d) };
    }

    if then.year() == now.year() {
        let fmt = format_description!("[month repr:short] [day padding:none]");
        then.format(&fmt).unwrap_or_default()
    } else {
        let fmt = format_description!("[month repr:short] [day padding:none], [year]");
        then.format(&fmt).unwrap_or_default()
    }
}
