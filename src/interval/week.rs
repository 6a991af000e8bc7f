use std::fmt;

use jiff::{tz::TimeZone, Timestamp, ToSpan, Zoned};

use crate::error::IngestError;

/// A completed Sunday to Saturday week.  The start is Sunday 00:00:00.000
/// local time and the end is the following Saturday 23:59:59.999 local time.
/// Each endpoint carries the offset valid at that instant, so a week that
/// crosses a DST transition is 7 days - 1ms long locally but not in UTC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    start: Zoned,
    end: Zoned,
}

/// Look up an IANA timezone by name.
pub fn timezone(name: &str) -> Result<TimeZone, IngestError> {
    TimeZone::get(name)
        .map_err(|e| IngestError::Config(format!("unknown timezone {:?}: {}", name, e)))
}

/// The most recently completed week before `now` in timezone `tz`.
pub fn compute_week(now: Timestamp, tz: &str) -> Result<TimeWindow, IngestError> {
    compute_week_ago(now, &timezone(tz)?, 0)
}

/// Same as [`compute_week`] but `weeks_ago` further weeks back.
pub fn compute_week_ago(
    now: Timestamp,
    tz: &TimeZone,
    weeks_ago: u32,
) -> Result<TimeWindow, IngestError> {
    let mut window = last_week(now, tz)?;
    for _ in 0..weeks_ago {
        window = window.previous()?;
    }
    Ok(window)
}

fn last_week(now: Timestamp, tz: &TimeZone) -> Result<TimeWindow, IngestError> {
    let today = now.to_zoned(tz.clone()).date();
    let back = i64::from(today.weekday().to_sunday_zero_offset()) + 7;
    let sunday = today
        .checked_sub(back.days())
        .map_err(|e| IngestError::Config(format!("week start out of range: {}", e)))?;
    let saturday = sunday
        .checked_add(6.days())
        .map_err(|e| IngestError::Config(format!("week end out of range: {}", e)))?;

    // a midnight that falls in a DST gap resolves forward to the first valid instant
    let start = sunday
        .at(0, 0, 0, 0)
        .to_zoned(tz.clone())
        .map_err(|e| IngestError::Config(e.to_string()))?;
    let end = saturday
        .at(23, 59, 59, 999_000_000)
        .to_zoned(tz.clone())
        .map_err(|e| IngestError::Config(e.to_string()))?;
    Ok(TimeWindow { start, end })
}

impl TimeWindow {
    pub fn start_utc(&self) -> Timestamp {
        self.start.timestamp()
    }

    pub fn end_utc(&self) -> Timestamp {
        self.end.timestamp()
    }

    pub fn time_zone(&self) -> &TimeZone {
        self.start.time_zone()
    }

    /// UTC bound formatted the way the search API expects it,
    /// e.g. `2024-01-07T07:00:00.000Z`.
    pub fn start_iso(&self) -> String {
        format!("{:.3}", self.start_utc())
    }

    pub fn end_iso(&self) -> String {
        format!("{:.3}", self.end_utc())
    }

    /// Local dates of the week, e.g. `20240107-20240113`.
    pub fn label(&self) -> String {
        format!(
            "{}-{}",
            self.start.date().strftime("%Y%m%d"),
            self.end.date().strftime("%Y%m%d")
        )
    }

    /// The week before this one.
    pub fn previous(&self) -> Result<TimeWindow, IngestError> {
        last_week(self.start_utc(), self.time_zone())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.start_iso(), self.end_iso())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::{civil::Weekday, SignedDuration};

    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn denver_january() -> Result<(), Box<dyn Error>> {
        let w = compute_week(ts("2024-01-17T18:30:00Z"), "America/Denver")?;
        assert_eq!(w.start_iso(), "2024-01-07T07:00:00.000Z");
        assert_eq!(w.end_iso(), "2024-01-14T06:59:59.999Z");
        assert_eq!(w.label(), "20240107-20240113");
        assert_eq!(
            w.to_string(),
            "2024-01-07T07:00:00.000Z -> 2024-01-14T06:59:59.999Z"
        );
        Ok(())
    }

    #[test]
    fn spring_forward_week() -> Result<(), Box<dyn Error>> {
        // DST starts Sunday 2024-03-10 02:00 in Denver
        let w = compute_week(ts("2024-03-20T12:00:00Z"), "America/Denver")?;
        assert_eq!(w.start_utc(), ts("2024-03-10T07:00:00Z"));
        assert_eq!(w.end_utc(), ts("2024-03-17T05:59:59.999Z"));
        let utc_len = w.end_utc().duration_since(w.start_utc());
        assert_eq!(
            utc_len,
            SignedDuration::from_hours(7 * 24 - 1) - SignedDuration::from_millis(1)
        );
        Ok(())
    }

    #[test]
    fn fall_back_week() -> Result<(), Box<dyn Error>> {
        // DST ends Sunday 2024-11-03 02:00 in Denver
        let w = compute_week(ts("2024-11-13T12:00:00Z"), "America/Denver")?;
        assert_eq!(w.start_utc(), ts("2024-11-03T06:00:00Z"));
        assert_eq!(w.end_utc(), ts("2024-11-10T06:59:59.999Z"));
        let utc_len = w.end_utc().duration_since(w.start_utc());
        assert_eq!(
            utc_len,
            SignedDuration::from_hours(7 * 24 + 1) - SignedDuration::from_millis(1)
        );
        Ok(())
    }

    #[test]
    fn midnight_in_dst_gap() -> Result<(), Box<dyn Error>> {
        // Santiago springs forward at Sunday 00:00 -> 01:00 on 2024-09-08
        let tz = timezone("America/Santiago")?;
        let w = compute_week_ago(ts("2024-09-16T12:00:00Z"), &tz, 0)?;
        let start = w.start.datetime();
        assert_eq!(start.date().to_string(), "2024-09-08");
        assert_eq!(start.hour(), 1);
        assert_eq!(start.minute(), 0);
        Ok(())
    }

    #[test]
    fn window_properties_every_day_of_a_year() -> Result<(), Box<dyn Error>> {
        for tz_name in ["America/Chicago", "America/Denver", "Europe/London", "UTC"] {
            let tz = timezone(tz_name)?;
            let mut now = ts("2024-01-01T00:00:00Z");
            for _ in 0..(366 * 4) {
                let w = compute_week_ago(now, &tz, 0)?;
                let start = w.start.datetime();
                let end = w.end.datetime();
                assert_eq!(start.weekday(), Weekday::Sunday);
                assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
                assert_eq!(end.weekday(), Weekday::Saturday);
                assert_eq!(end.subsec_nanosecond(), 999_000_000);
                assert_eq!(
                    end.duration_since(start),
                    SignedDuration::from_hours(7 * 24) - SignedDuration::from_millis(1)
                );
                assert!(w.end_utc() < now);
                now = now.checked_add(SignedDuration::from_hours(6))?;
            }
        }
        Ok(())
    }

    #[test]
    fn sunday_now_gives_previous_week() -> Result<(), Box<dyn Error>> {
        // 2024-01-14 10:00 local is a Sunday
        let w = compute_week(ts("2024-01-14T17:00:00Z"), "America/Denver")?;
        assert_eq!(w.label(), "20240107-20240113");
        Ok(())
    }

    #[test]
    fn weeks_ago() -> Result<(), Box<dyn Error>> {
        let tz = timezone("America/Chicago")?;
        let now = ts("2024-01-17T18:30:00Z");
        let w0 = compute_week_ago(now, &tz, 0)?;
        let w2 = compute_week_ago(now, &tz, 2)?;
        assert_eq!(w2.label(), "20231224-20231230");
        assert_eq!(w0.previous()?.previous()?, w2);
        Ok(())
    }

    #[test]
    fn unknown_timezone() {
        let res = compute_week(ts("2024-01-17T18:30:00Z"), "Mars/Olympus_Mons");
        assert!(matches!(res, Err(IngestError::Config(_))));
    }
}
