//! Recurring time-of-day windows during which recognitions are logged.

use crate::error::CoreError;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a configured recognition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowName {
    Morning,
    Lunch,
    Afternoon,
    Evening,
}

impl WindowName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Lunch => "lunch",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for WindowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a timestamp against the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Window(WindowName),
    OutOfTime,
}

impl Period {
    pub fn window(&self) -> Option<WindowName> {
        match self {
            Self::Window(name) => Some(*name),
            Self::OutOfTime => None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Window(_))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window(name) => fmt::Display::fmt(name, f),
            Self::OutOfTime => f.write_str("out_of_time"),
        }
    }
}

/// A named window with inclusive `[start, end]` time-of-day bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub name: WindowName,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Deserialize)]
struct ScheduleFile {
    #[serde(rename = "window", default)]
    windows: Vec<TimeWindow>,
}

/// Ordered set of windows; earlier entries take priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSchedule {
    windows: Vec<TimeWindow>,
}

impl PeriodSchedule {
    /// Validate and build a schedule. Windows must be non-inverted, uniquely
    /// named and non-overlapping.
    pub fn new(windows: Vec<TimeWindow>) -> Result<Self, CoreError> {
        for (i, w) in windows.iter().enumerate() {
            if w.start > w.end {
                return Err(CoreError::InvalidInput(format!(
                    "window {} starts after it ends ({} > {})",
                    w.name, w.start, w.end
                )));
            }
            for other in &windows[..i] {
                if other.name == w.name {
                    return Err(CoreError::InvalidInput(format!("window {} configured twice", w.name)));
                }
                if other.overlaps(w) {
                    return Err(CoreError::InvalidInput(format!(
                        "windows {} and {} overlap",
                        other.name, w.name
                    )));
                }
            }
        }
        Ok(Self { windows })
    }

    /// Morning 07:30-08:30, lunch 11:55-12:10, afternoon 13:30-14:30,
    /// evening 17:30-18:00.
    pub fn reference() -> Self {
        let hms = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            windows: vec![
                TimeWindow { name: WindowName::Morning, start: hms(7, 30), end: hms(8, 30) },
                TimeWindow { name: WindowName::Lunch, start: hms(11, 55), end: hms(12, 10) },
                TimeWindow { name: WindowName::Afternoon, start: hms(13, 30), end: hms(14, 30) },
                TimeWindow { name: WindowName::Evening, start: hms(17, 30), end: hms(18, 0) },
            ],
        }
    }

    /// Parse a TOML document of `[[window]]` tables:
    ///
    /// ```toml
    /// [[window]]
    /// name = "morning"
    /// start = "07:30:00"
    /// end = "08:30:00"
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, CoreError> {
        let file: ScheduleFile =
            toml::from_str(src).map_err(|e| CoreError::InvalidInput(format!("window schedule: {e}")))?;
        Self::new(file.windows)
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    /// Classify a timestamp by its time of day. The date is ignored.
    pub fn classify(&self, timestamp: NaiveDateTime) -> Period {
        self.classify_time(timestamp.time())
    }

    pub fn classify_time(&self, time: NaiveTime) -> Period {
        // Leap-second representation is folded back onto :59.
        let time = if time.nanosecond() >= 1_000_000_000 {
            time.with_nanosecond(999_999_999).unwrap_or(time)
        } else {
            time
        };
        self.windows
            .iter()
            .find(|w| w.contains(time))
            .map_or(Period::OutOfTime, |w| Period::Window(w.name))
    }

    pub fn is_allowed(&self, timestamp: NaiveDateTime) -> bool {
        self.classify(timestamp).is_allowed()
    }
}

impl Default for PeriodSchedule {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_reference_windows() {
        let schedule = PeriodSchedule::reference();
        assert_eq!(schedule.classify(at(8, 0, 0)), Period::Window(WindowName::Morning));
        assert_eq!(schedule.classify(at(12, 0, 0)), Period::Window(WindowName::Lunch));
        assert_eq!(schedule.classify(at(14, 0, 0)), Period::Window(WindowName::Afternoon));
        assert_eq!(schedule.classify(at(17, 45, 0)), Period::Window(WindowName::Evening));
        assert_eq!(schedule.classify(at(9, 0, 0)), Period::OutOfTime);
        assert_eq!(schedule.classify(at(0, 0, 0)), Period::OutOfTime);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let schedule = PeriodSchedule::reference();
        assert_eq!(schedule.classify(at(7, 30, 0)), Period::Window(WindowName::Morning));
        assert_eq!(schedule.classify(at(8, 30, 0)), Period::Window(WindowName::Morning));
        assert_eq!(schedule.classify(at(8, 30, 1)), Period::OutOfTime);
        assert_eq!(schedule.classify(at(7, 29, 59)), Period::OutOfTime);
        assert_eq!(schedule.classify(at(12, 10, 0)), Period::Window(WindowName::Lunch));
    }

    #[test]
    fn test_sub_second_past_end_is_out_of_time() {
        let schedule = PeriodSchedule::reference();
        let late = NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_milli_opt(8, 30, 0, 500)
            .unwrap();
        assert_eq!(schedule.classify(late), Period::OutOfTime);
    }

    #[test]
    fn test_classify_ignores_date() {
        let schedule = PeriodSchedule::reference();
        let other_day = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(schedule.classify(other_day), schedule.classify(at(8, 0, 0)));
    }

    #[test]
    fn test_classify_is_total_over_a_day() {
        let schedule = PeriodSchedule::reference();
        let mut allowed = 0;
        for secs in 0..86_400u32 {
            let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap();
            let period = schedule.classify_time(time);
            assert_eq!(period.is_allowed(), period != Period::OutOfTime);
            if period.is_allowed() {
                allowed += 1;
            }
        }
        // 3601 + 901 + 3601 + 1801 inclusive seconds.
        assert_eq!(allowed, 9904);
    }

    #[test]
    fn test_is_allowed() {
        let schedule = PeriodSchedule::reference();
        assert!(schedule.is_allowed(at(13, 30, 0)));
        assert!(!schedule.is_allowed(at(15, 0, 0)));
    }

    #[test]
    fn test_period_display() {
        assert_eq!(Period::Window(WindowName::Lunch).to_string(), "lunch");
        assert_eq!(Period::OutOfTime.to_string(), "out_of_time");
    }

    #[test]
    fn test_rejects_overlapping_windows() {
        let err = PeriodSchedule::new(vec![
            TimeWindow { name: WindowName::Morning, start: t(7, 0, 0), end: t(9, 0, 0) },
            TimeWindow { name: WindowName::Lunch, start: t(9, 0, 0), end: t(10, 0, 0) },
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let err = PeriodSchedule::new(vec![TimeWindow {
            name: WindowName::Evening,
            start: t(18, 0, 0),
            end: t(17, 0, 0),
        }])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = PeriodSchedule::new(vec![
            TimeWindow { name: WindowName::Morning, start: t(7, 0, 0), end: t(8, 0, 0) },
            TimeWindow { name: WindowName::Morning, start: t(9, 0, 0), end: t(10, 0, 0) },
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_from_toml_str() {
        let src = r#"
            [[window]]
            name = "morning"
            start = "06:00:00"
            end = "06:30:00"

            [[window]]
            name = "evening"
            start = "20:00:00"
            end = "21:00:00"
        "#;
        let schedule = PeriodSchedule::from_toml_str(src).unwrap();
        assert_eq!(schedule.windows().len(), 2);
        assert_eq!(schedule.classify(at(6, 15, 0)), Period::Window(WindowName::Morning));
        assert_eq!(schedule.classify(at(8, 0, 0)), Period::OutOfTime);
    }

    #[test]
    fn test_from_toml_str_rejects_unknown_name() {
        let src = r#"
            [[window]]
            name = "midnight"
            start = "00:00:00"
            end = "00:10:00"
        "#;
        assert!(PeriodSchedule::from_toml_str(src).is_err());
    }
}
