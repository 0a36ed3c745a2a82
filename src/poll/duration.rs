use chrono::Duration;
use lazy_static::lazy_static;
use regex::Regex;

/// Anything further back than this is treated as a typo.
pub const MAX_RELATIVE_DAYS: i32 = 36_600;

lazy_static! {
    /// `[D days, ][H[:M[:S]]]`. A lone number is hours.
    static ref RELATIVE_DURATION: Regex = Regex::new(
        r"^(?:(?P<days>-?\d+) (?:days?|дня|дней|день),? ?)?(?:(?P<hours>-?\d{1,2})(?::(?P<minutes>-?\d{1,2})(?::(?P<seconds>-?\d{1,2}))?)?)?$"
    )
    .unwrap();
    /// `[[H:]M:]S`.
    static ref CLOCK_DURATION: Regex =
        Regex::new(r"^(?:(?:(?P<hours>\d+):)?(?P<minutes>\d+):)?(?P<seconds>\d+)$").unwrap();
}

/// Parses how long ago something happened, e.g. `2` (two hours), `1:12`, `1 day, 2:12:31`.
///
/// A negative field makes every less significant field negative too, so `-1 day, 2:00`
/// is minus one day and two hours.
pub fn parse_relative_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let captures = RELATIVE_DURATION.captures(input)?;

    let mut negative = false;
    let mut total = Duration::zero();
    for (name, unit) in [
        ("days", Duration::days(1)),
        ("hours", Duration::hours(1)),
        ("minutes", Duration::minutes(1)),
        ("seconds", Duration::seconds(1)),
    ] {
        let field = match captures.name(name) {
            Some(field) => field.as_str(),
            None => continue,
        };
        negative |= field.starts_with('-');
        let amount: i32 = field.trim_start_matches('-').parse().ok()?;
        if name == "days" && amount > MAX_RELATIVE_DAYS {
            return None;
        }
        let amount = if negative { -amount } else { amount };
        total = total + unit * amount;
    }
    Some(total)
}

/// Parses a `delay_time` given as text: `SS`, `MM:SS` or `HH:MM:SS`.
pub fn parse_clock_duration(input: &str) -> Option<Duration> {
    let captures = CLOCK_DURATION.captures(input.trim())?;
    let field = |name: &str| -> Option<i64> {
        match captures.name(name) {
            Some(field) => field.as_str().parse().ok(),
            None => Some(0),
        }
    };
    Duration::try_hours(field("hours")?)?
        .checked_add(&Duration::try_minutes(field("minutes")?)?)?
        .checked_add(&Duration::try_seconds(field("seconds")?)?)
}

/// `H:MM:SS`, prefixed with the number of days if there are any.
pub fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let total = duration.num_seconds().abs();
    let (days, rest) = (total / 86_400, total % 86_400);
    let clock = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    match days {
        0 => format!("{}{}", sign, clock),
        1 => format!("{}1 day, {}", sign, clock),
        _ => format!("{}{} days, {}", sign, days, clock),
    }
}

/// Serde support for `delay_time`: integer seconds or a clock string on input, seconds on output.
pub mod delay_time {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DelayTime {
        Seconds(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<DelayTime>::deserialize(deserializer)? {
            None => Ok(None),
            Some(DelayTime::Seconds(seconds)) => Duration::try_seconds(seconds)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("delay time {}s is out of range", seconds))),
            Some(DelayTime::Text(text)) => super::parse_clock_duration(&text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid delay time '{}'", text))),
        }
    }
}
