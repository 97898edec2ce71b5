use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One admitted sighting in the session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Unique within the session
    pub id: u64,
    pub plate: String,
    pub confidence: f64,
    /// Source-relative seconds
    pub timestamp: f64,
    /// Human readable time shown in lists and exports
    pub display_time: String,
}

/// How record timestamps are rendered for display
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayClock {
    /// Position within a video file, `MM:SS.mmm`
    Playback,
    /// Local time of day, offset from the session start
    WallClock { origin: DateTime<Local> },
}

impl DisplayClock {
    pub fn wall_clock_now() -> Self {
        DisplayClock::WallClock {
            origin: Local::now(),
        }
    }

    pub fn format(&self, timestamp: f64) -> String {
        let millis = if timestamp.is_finite() && timestamp > 0.0 {
            (timestamp * 1000.0).round() as i64
        } else {
            0
        };

        match self {
            DisplayClock::Playback => format!(
                "{:02}:{:02}.{:03}",
                millis / 60_000,
                (millis / 1000) % 60,
                millis % 1000
            ),
            DisplayClock::WallClock { origin } => match chrono::Duration::try_milliseconds(millis)
                .and_then(|offset| origin.checked_add_signed(offset))
            {
                Some(time) => time.format("%H:%M:%S").to_string(),
                None => Self::elapsed(millis),
            },
        }
    }

    /// `H:MM:SS` since the origin, for offsets past the calendar range
    fn elapsed(millis: i64) -> String {
        let secs = millis / 1000;
        format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_playback_format() {
        let clock = DisplayClock::Playback;
        assert_eq!(clock.format(0.0), "00:00.000");
        assert_eq!(clock.format(1.5), "00:01.500");
        assert_eq!(clock.format(75.25), "01:15.250");
        assert_eq!(clock.format(-3.0), "00:00.000");
    }

    #[test]
    fn test_wall_clock_format() {
        let origin = Local.with_ymd_and_hms(2025, 3, 14, 9, 59, 58).unwrap();
        let clock = DisplayClock::WallClock { origin };
        assert_eq!(clock.format(0.0), "09:59:58");
        assert_eq!(clock.format(3.2), "10:00:01");
    }

    #[test]
    fn test_wall_clock_out_of_range_offset() {
        let origin = Local.with_ymd_and_hms(2025, 3, 14, 9, 59, 58).unwrap();
        let clock = DisplayClock::WallClock { origin };

        // Far past chrono's calendar range
        assert_eq!(clock.format(1e13), "2777777777:46:40");
        assert_eq!(clock.format(f64::MAX), DisplayClock::elapsed(i64::MAX));
    }
}
