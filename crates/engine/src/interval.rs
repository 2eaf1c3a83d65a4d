//! Next fire time of a cron expression, restricted to the minute and hour fields.
//!
//! Only `N`, `*` (read as 0) and `*/N` are understood in those two fields; the
//! remaining fields are ignored. A 6-field expression has a leading seconds
//! field. Offsets are milliseconds since midnight UTC.

use chrono::{DateTime, Timelike, Utc};

/// Returned for expressions that cannot be interpreted.
pub const INVALID_OFFSET: i64 = i64::MAX;
/// Returned when nothing is left to fire today.
pub const NO_MORE_TODAY: i64 = -1;

pub const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;
const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
const MINUTE_MILLIS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    At(i64),
    Every(i64),
}

fn parse_field(raw: &str, limit: i64) -> Option<Field> {
    if raw == "*" {
        return Some(Field::At(0));
    }
    if let Some(step) = raw.strip_prefix("*/") {
        let step: i64 = step.parse().ok()?;
        return (1..limit).contains(&step).then_some(Field::Every(step));
    }
    let value: i64 = raw.parse().ok()?;
    (0..limit).contains(&value).then_some(Field::At(value))
}

fn parse(cron: &str) -> Option<(Field, Field)> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let offset = match fields.len() {
        5 => 0,
        6 => 1,
        _ => return None,
    };
    let minute = parse_field(fields[offset], 60)?;
    let hour = parse_field(fields[offset + 1], 24)?;
    Some((minute, hour))
}

/// Milliseconds since midnight of the next firing strictly after `now_millis`,
/// [`NO_MORE_TODAY`] if none remains today, or [`INVALID_OFFSET`].
///
/// Passing `-1` as `now_millis` yields the first firing of a day.
pub fn next_fire_offset_millis(cron: &str, now_millis: i64) -> i64 {
    let Some((minute, hour)) = parse(cron) else {
        return INVALID_OFFSET;
    };

    match (minute, hour) {
        (Field::Every(m), Field::Every(h)) => {
            let interval = (m * MINUTE_MILLIS).min(h * HOUR_MILLIS);
            let next = (now_millis.div_euclid(interval) + 1) * interval;
            if next >= DAY_MILLIS {
                NO_MORE_TODAY
            } else {
                next
            }
        }
        (Field::At(m), Field::Every(h)) => (0..24)
            .step_by(h as usize)
            .map(|hour| hour * HOUR_MILLIS + m * MINUTE_MILLIS)
            .find(|t| *t > now_millis)
            .unwrap_or(NO_MORE_TODAY),
        (Field::Every(m), Field::At(h)) => (h..24)
            .flat_map(|hour| (0..60).step_by(m as usize).map(move |minute| hour * HOUR_MILLIS + minute * MINUTE_MILLIS))
            .find(|t| *t > now_millis)
            .unwrap_or(NO_MORE_TODAY),
        (Field::At(m), Field::At(h)) => {
            let at = h * HOUR_MILLIS + m * MINUTE_MILLIS;
            if at > now_millis {
                at
            } else {
                NO_MORE_TODAY
            }
        }
    }
}

pub fn millis_since_midnight(at: DateTime<Utc>) -> i64 {
    i64::from(at.num_seconds_from_midnight()) * 1000 + i64::from(at.timestamp_subsec_millis().min(999))
}

/// Absolute next firing after `now`; rolls over to tomorrow's first firing.
/// `None` for expressions that cannot be interpreted.
pub fn next_fire_at(cron: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let since_midnight = millis_since_midnight(now);
    let midnight = now - chrono::Duration::milliseconds(since_midnight);

    match next_fire_offset_millis(cron, since_midnight) {
        INVALID_OFFSET => None,
        NO_MORE_TODAY => match next_fire_offset_millis(cron, -1) {
            INVALID_OFFSET | NO_MORE_TODAY => None,
            first => Some(midnight + chrono::Duration::milliseconds(DAY_MILLIS + first)),
        },
        offset => Some(midnight + chrono::Duration::milliseconds(offset)),
    }
}
