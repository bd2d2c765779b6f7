use chrono::{DateTime, Utc};

pub fn format_call_duration(secs: u64) -> String {
    let hours = secs / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// `Oct 16, 2026, 09:30 AM`, always UTC.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %Y, %I:%M %p").to_string()
}

pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    if elapsed.num_seconds() < 0 || elapsed.num_days() > 30 {
        return format_timestamp(at);
    }

    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        plural(elapsed.num_minutes(), "minute")
    } else if elapsed.num_days() < 1 {
        plural(elapsed.num_hours(), "hour")
    } else {
        plural(elapsed.num_days(), "day")
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_call_duration(45), "45s");
        assert_eq!(format_call_duration(125), "2m 05s");
        assert_eq!(format_call_duration(3_723), "1h 02m 03s");
        assert_eq!(format_call_duration(0), "0s");
    }

    #[test]
    fn timestamps_use_twelve_hour_clock() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
        assert_eq!(format_timestamp(at), "Oct 16, 2026, 09:30 AM");

        let evening = Utc.with_ymd_and_hms(2026, 3, 2, 21, 5, 0).unwrap();
        assert_eq!(format_timestamp(evening), "Mar 2, 2026, 09:05 PM");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(format_relative(now - Duration::seconds(20), now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(format_relative(now - Duration::minutes(61), now), "1 hour ago");
        assert_eq!(format_relative(now - Duration::days(3), now), "3 days ago");

        let old = now - Duration::days(45);
        assert_eq!(format_relative(old, now), format_timestamp(old));
        let future = now + Duration::hours(2);
        assert_eq!(format_relative(future, now), format_timestamp(future));
    }
}
