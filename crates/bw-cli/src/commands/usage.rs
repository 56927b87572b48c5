//! Usage command: minute-by-minute walk of one source/app/day.
//!
//! This is the debugging companion to `reconcile`: it shows every deduped
//! sample, how its time lands in local minutes, and the verdict against the
//! limit that was in effect when the day started.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Args;

use bw_core::{day_start_epoch_ms, day_window, dedup_samples, device_timezone, minutes_of_use};
use bw_db::Database;

#[derive(Debug, Args)]
pub struct UsageArgs {
    /// Local calendar date to inspect (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,

    /// Source to inspect.
    #[arg(long)]
    pub source: String,

    /// App package to inspect.
    #[arg(long)]
    pub app: String,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &UsageArgs) -> Result<()> {
    let latest = db
        .latest_point(&args.source, Utc::now())?
        .with_context(|| format!("no telemetry for {}", args.source))?;
    let properties: Option<serde_json::Value> = serde_json::from_str(&latest.properties).ok();
    let zone = properties
        .as_ref()
        .and_then(device_timezone)
        .as_deref()
        .and_then(bw_core::parse_zone)
        .with_context(|| format!("no usable time zone for {}", args.source))?;
    let (start, end) = day_window(args.date, zone);

    let samples = db.usage_samples(&args.source, Some(&args.app), start, end)?;
    let deduped = dedup_samples(&samples);
    let totals = bw_core::aggregate(&samples, start, end);

    // The limit audited for a day is the one already on record when the day
    // started, later snapshots do not apply retroactively.
    let limit = db
        .latest_budget_point(&args.source, Some(start))?
        .map(|point| bw_core::decode_history(&point.properties, point.observed_at))
        .transpose()
        .context("budget payload could not be decoded")?
        .and_then(|history| {
            bw_core::resolve(&history, day_start_epoch_ms(args.date, zone))
                .and_then(|snapshot| bw_core::app_limit(&snapshot.limits, &args.app))
        });

    writeln!(
        writer,
        "Usage for {} on {}, {} ({})",
        args.app, args.source, args.date, zone
    )?;

    writeln!(writer)?;
    if deduped.is_empty() {
        writeln!(writer, "No samples in window.")?;
    }
    for sample in &deduped {
        let local = sample.observed_at.with_timezone(&zone);
        let screen = if sample.screen_active {
            "screen on"
        } else {
            "screen off"
        };
        if sample.overlapped {
            writeln!(
                writer,
                "  {}  {:>8.0} ms  ({screen}, trimmed from {:.0} ms)",
                local.format("%H:%M:%S"),
                sample.duration_ms,
                sample.raw_ms,
            )?;
        } else {
            writeln!(
                writer,
                "  {}  {:>8.0} ms  ({screen})",
                local.format("%H:%M:%S"),
                sample.duration_ms,
            )?;
        }
    }

    let minutes = minutes_of_use(&deduped);
    if !minutes.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "Minutes of use:")?;
        let mut running = 0i64;
        for (minute, ms) in &minutes {
            running += ms;
            let local = minute.with_timezone(&zone);
            writeln!(
                writer,
                "  {}  {ms:>6} ms  (cumulative {running} ms)",
                local.format("%H:%M"),
            )?;
        }
    }

    writeln!(writer)?;
    match limit {
        Some(limit) => {
            writeln!(
                writer,
                "On screen {:.0} ms of {limit} ms allowed ({} duplicates trimmed)",
                totals.on_screen_ms, totals.duplicate_count,
            )?;
            #[allow(clippy::cast_precision_loss)]
            if totals.on_screen_ms <= limit as f64 {
                writeln!(writer, "OK - DID NOT HIT LIMIT")?;
            } else {
                writeln!(writer, "ERROR - EXCEEDED LIMIT")?;
            }
        }
        None => {
            writeln!(
                writer,
                "On screen {:.0} ms ({} duplicates trimmed)",
                totals.on_screen_ms, totals.duplicate_count,
            )?;
            writeln!(writer, "NO LIMIT SET")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use bw_db::PointRecord;

    fn usage_args(date: &str, app: &str) -> UsageArgs {
        UsageArgs {
            date: date.parse().unwrap(),
            source: "participant.1".to_string(),
            app: app.to_string(),
        }
    }

    fn usage_point(app: &str, observed_at: &str, duration_ms: f64) -> PointRecord {
        PointRecord {
            id: format!("{app}|{observed_at}"),
            source: "participant.1".to_string(),
            generator: "pdk-foreground-application".to_string(),
            secondary_id: Some(app.to_string()),
            observed_at: observed_at.to_string(),
            recorded_at: observed_at.to_string(),
            user_agent: None,
            properties: format!(
                r#"{{"application":"{app}","duration":{duration_ms},"screen_active":true,"passive-data-metadata":{{"timezone":"UTC"}}}}"#
            ),
        }
    }

    fn budget_point(observed_at: &str, app: &str, limit_ms: i64) -> PointRecord {
        let inner = format!(r#"{{\"{app}\":{limit_ms}}}"#);
        PointRecord {
            id: format!("budget|{observed_at}"),
            source: "participant.1".to_string(),
            generator: "full-app-budgets".to_string(),
            secondary_id: None,
            observed_at: observed_at.to_string(),
            recorded_at: observed_at.to_string(),
            user_agent: None,
            properties: format!(
                r#"{{"budgets":[{{"effective_on":0,"budget":"{inner}"}}],"passive-data-metadata":{{"timezone":"UTC"}}}}"#
            ),
        }
    }

    fn run_to_string(db: &Database, args: &UsageArgs) -> String {
        let mut output = Vec::new();
        run(&mut output, db, args).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn under_limit_day_is_ok() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[
            usage_point("com.app.a", "2025-03-10T10:00:00.000Z", 90_000.0),
            budget_point("2025-03-09T12:00:00.000Z", "com.app.a", 300_000),
        ])
        .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.contains("On screen 90000 ms of 300000 ms allowed"));
        assert!(output.ends_with("OK - DID NOT HIT LIMIT\n"));
    }

    #[test]
    fn over_limit_day_is_flagged() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[
            usage_point("com.app.a", "2025-03-10T10:00:00.000Z", 90_000.0),
            budget_point("2025-03-09T12:00:00.000Z", "com.app.a", 60_000),
        ])
        .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.ends_with("ERROR - EXCEEDED LIMIT\n"));
    }

    #[test]
    fn missing_limit_is_reported() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[usage_point("com.app.a", "2025-03-10T10:00:00.000Z", 90_000.0)])
            .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.ends_with("NO LIMIT SET\n"));
    }

    #[test]
    fn budget_recorded_after_day_start_does_not_apply() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[
            usage_point("com.app.a", "2025-03-10T10:00:00.000Z", 90_000.0),
            // observed mid-day, after the window opened
            budget_point("2025-03-10T12:00:00.000Z", "com.app.a", 60_000),
        ])
        .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.ends_with("NO LIMIT SET\n"));
    }

    #[test]
    fn minutes_table_splits_across_boundaries() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[
            // 90s ending at 10:01:30 spans minutes 10:00 and 10:01
            usage_point("com.app.a", "2025-03-10T10:01:30.000Z", 90_000.0),
            budget_point("2025-03-09T12:00:00.000Z", "com.app.a", 300_000),
        ])
        .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.contains("Minutes of use:"));
        assert!(output.contains("10:00   60000 ms  (cumulative 60000 ms)"));
        assert!(output.contains("10:01   30000 ms  (cumulative 90000 ms)"));
    }

    #[test]
    fn overlapping_sample_shows_trimmed_duration() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[
            usage_point("com.app.a", "2025-03-10T10:00:00.000Z", 60_000.0),
            // 30s later but claims 60s, so 30s overlaps the sample before it
            usage_point("com.app.a", "2025-03-10T10:00:30.000Z", 60_000.0),
            budget_point("2025-03-09T12:00:00.000Z", "com.app.a", 300_000),
        ])
        .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.contains("trimmed from 60000 ms"));
        assert!(output.contains("On screen 90000 ms of 300000 ms allowed (1 duplicates trimmed)"));
    }

    #[test]
    fn empty_day_still_prints_verdict() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_points(&[budget_point("2025-03-09T12:00:00.000Z", "com.app.a", 300_000)])
            .unwrap();

        let output = run_to_string(&db, &usage_args("2025-03-10", "com.app.a"));
        assert!(output.contains("No samples in window."));
        assert!(output.contains("On screen 0 ms of 300000 ms allowed"));
        assert!(output.ends_with("OK - DID NOT HIT LIMIT\n"));
    }

    #[test]
    fn source_without_telemetry_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        let err = run(&mut output, &db, &usage_args("2025-03-10", "com.app.a")).unwrap_err();
        assert!(err.to_string().contains("no telemetry for participant.1"));
    }
}
