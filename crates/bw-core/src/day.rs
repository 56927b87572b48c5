//! Local-day window math.
//!
//! A participant's "day" runs midnight to midnight in the zone their device
//! reports, never in server time. Devices report IANA zone names inside the
//! `passive-data-metadata` property bag of every point.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

/// Parses a device-reported IANA zone name.
pub fn parse_zone(name: &str) -> Option<Tz> {
    name.trim().parse().ok()
}

/// Extracts the reported time zone name from a point's property bag.
pub fn device_timezone(properties: &Value) -> Option<String> {
    properties
        .get("passive-data-metadata")
        .and_then(|metadata| metadata.get("timezone"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
fn local_midnight_to_utc(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match zone.from_local_datetime(&midnight) {
        // Single or ambiguous (DST fall-back): use the earlier time
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // DST spring-forward gap at midnight (e.g. America/Santiago):
            // 1am local exists on those days
            let one_am = date.and_time(NaiveTime::from_hms_opt(1, 0, 0).unwrap_or(NaiveTime::MIN));
            zone.from_local_datetime(&one_am)
                .earliest()
                .map_or_else(|| Utc.from_utc_datetime(&midnight), |dt| dt.with_timezone(&Utc))
        }
    }
}

/// Returns the half-open UTC window `[local 00:00, next local 00:00)` for a
/// calendar date in `zone`.
pub fn day_window(date: NaiveDate, zone: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight_to_utc(date, zone);
    let end = local_midnight_to_utc(date + chrono::Duration::days(1), zone);
    (start, end)
}

/// Epoch milliseconds of local midnight, the instant budget schedules are
/// resolved against.
pub fn day_start_epoch_ms(date: NaiveDate, zone: Tz) -> i64 {
    local_midnight_to_utc(date, zone).timestamp_millis()
}
