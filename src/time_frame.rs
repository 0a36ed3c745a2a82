use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Current time in the user's timezone, or in the local one if the user has none set.
pub fn now_in(timezone: Option<Tz>) -> DateTime<FixedOffset> {
    to_user_time(Utc::now(), timezone)
}

pub fn to_user_time(instant: DateTime<Utc>, timezone: Option<Tz>) -> DateTime<FixedOffset> {
    match timezone {
        Some(tz) => instant.with_timezone(&tz).fixed_offset(),
        None => instant.with_timezone(&Local).fixed_offset(),
    }
}

/// Resolves a wall-clock time in the given timezone, taking the earlier instant on DST folds
/// and skipping forward over DST gaps.
pub fn resolve_local<Z: TimeZone>(timezone: &Z, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(time) => Some(time.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => timezone
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|time| time.with_timezone(&Utc)),
    }
}

/// An inclusive window of instants.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeFrame {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeFrame {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeFrame {
        TimeFrame { start, end }
    }

    /// The calendar day `date` as seen from `timezone`, from 00:00:00 to 23:59:59.999999.
    pub fn for_day(date: NaiveDate, timezone: Option<Tz>) -> Option<TimeFrame> {
        let start = date.and_hms_opt(0, 0, 0)?;
        let end = date.and_hms_micro_opt(23, 59, 59, 999_999)?;
        let (start, end) = match timezone {
            Some(tz) => (resolve_local(&tz, start)?, resolve_local(&tz, end)?),
            None => (resolve_local(&Local, start)?, resolve_local(&Local, end)?),
        };
        Some(TimeFrame::new(start, end))
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        &self.start <= instant && instant <= &self.end
    }
}
