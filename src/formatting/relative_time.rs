use chrono::{DateTime, Utc};

/// Upper bound in seconds, and either a fixed phrase or the unit used to
/// count whole elapsed periods.
enum Tier {
    Fixed(f64, &'static str),
    Counted(f64, &'static str, f64),
}

const TIERS: [Tier; 13] = [
    Tier::Fixed(60.0, "just now"),
    Tier::Fixed(120.0, "1 minute ago"),
    Tier::Counted(3_600.0, "minutes", 60.0),
    Tier::Fixed(7_200.0, "1 hour ago"),
    Tier::Counted(86_400.0, "hours", 3_600.0),
    Tier::Fixed(172_800.0, "yesterday"),
    Tier::Counted(604_800.0, "days", 86_400.0),
    Tier::Fixed(1_209_600.0, "last week"),
    Tier::Counted(2_419_200.0, "weeks", 604_800.0),
    Tier::Fixed(4_838_400.0, "last month"),
    Tier::Counted(29_030_400.0, "months", 2_419_200.0),
    Tier::Fixed(58_060_800.0, "last year"),
    Tier::Counted(2_903_040_000.0, "years", 29_030_400.0),
];

/// Describes how long ago `past` was, seen from `now`.
///
/// Tiers are checked in ascending order and the first whose bound exceeds
/// the elapsed time wins. Past the last tier the absolute timestamp is used.
pub fn time_ago(past: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - past).num_milliseconds() as f64 / 1000.0;

    for tier in &TIERS {
        match *tier {
            Tier::Fixed(bound, phrase) if seconds < bound => return phrase.to_string(),
            Tier::Counted(bound, unit, size) if seconds < bound => {
                return format!("{} {} ago", (seconds / size).floor() as i64, unit)
            }
            _ => {}
        }
    }
    absolute_time(past)
}

/// Absolute rendering used for the `utc` field and as the last fallback.
pub fn absolute_time(time: DateTime<Utc>) -> String {
    time.format("%a %b %d %Y %H:%M:%S GMT+0000 (UTC)").to_string()
}
