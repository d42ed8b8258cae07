//! Human-readable formatting helpers for run stats.

/// Format a duration in milliseconds as a compact string.
///
/// Rounds to whole seconds. Examples: `0s`, `45s`, `2m5s`, `3m`, `1h3m`, `2h`.
/// Seconds are dropped once the duration reaches an hour. Negative input is
/// treated as zero.
pub fn format_duration_short(ms: i64) -> String {
    let ms = u64::try_from(ms).unwrap_or(0);
    let total_secs = (ms + 500) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        if minutes > 0 {
            format!("{hours}h{minutes}m")
        } else {
            format!("{hours}h")
        }
    } else if minutes > 0 {
        if seconds > 0 {
            format!("{minutes}m{seconds}s")
        } else {
            format!("{minutes}m")
        }
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sub_second_rounds() {
        assert_eq!(format_duration_short(0), "0s");
        assert_eq!(format_duration_short(499), "0s");
        assert_eq!(format_duration_short(500), "1s");
        assert_eq!(format_duration_short(1000), "1s");
    }

    #[test]
    fn seconds_and_minutes() {
        assert_eq!(format_duration_short(45_000), "45s");
        assert_eq!(format_duration_short(125_000), "2m5s");
        assert_eq!(format_duration_short(180_000), "3m");
    }

    #[test]
    fn hours_drop_seconds() {
        assert_eq!(format_duration_short(3_780_000), "1h3m");
        assert_eq!(format_duration_short(3_781_000), "1h3m");
        assert_eq!(format_duration_short(7_200_000), "2h");
    }

    #[test]
    fn negative_is_zero() {
        assert_eq!(format_duration_short(-5_000), "0s");
    }

    proptest! {
        #[test]
        fn always_ends_with_unit(ms in 0i64..1_000_000_000) {
            let s = format_duration_short(ms);
            prop_assert!(s.ends_with('s') || s.ends_with('m') || s.ends_with('h'));
            prop_assert!(s.chars().next().is_some_and(|c| c.is_ascii_digit()));
        }
    }
}
