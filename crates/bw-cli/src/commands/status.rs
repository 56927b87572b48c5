//! Status command for a quick look at the store.

use std::io::Write;

use anyhow::Result;
use chrono::{TimeDelta, Utc};

use bw_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let points = db.point_count()?;
    let participants = db.participant_count()?;
    let phases = db.phase_count()?;
    let issues = db.issue_count()?;
    let cutoff = Utc::now() - TimeDelta::days(7);
    let active = db.active_sources_since(cutoff)?;

    writeln!(writer, "Blocker audit status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Points: {points}")?;
    writeln!(writer, "Participants: {participants}")?;
    writeln!(writer, "Phases: {phases}")?;
    writeln!(writer, "Issues: {issues}")?;

    if active.is_empty() {
        writeln!(writer, "No sources active in the last 7 days.")?;
        return Ok(());
    }

    writeln!(writer, "Active sources (7 days):")?;
    for source in active {
        writeln!(writer, "- {}: {}", source.source, source.last_point)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::SecondsFormat;

    use bw_db::PointRecord;

    fn point(source: &str, observed_at: &str) -> PointRecord {
        PointRecord {
            id: format!("{source}|{observed_at}"),
            source: source.to_string(),
            generator: "pdk-app-event".to_string(),
            secondary_id: None,
            observed_at: observed_at.to_string(),
            recorded_at: observed_at.to_string(),
            user_agent: None,
            properties: "{}".to_string(),
        }
    }

    #[test]
    fn status_lists_counts_and_recent_sources() {
        let mut db = Database::open_in_memory().unwrap();
        let recent = (Utc::now() - TimeDelta::days(1)).to_rfc3339_opts(SecondsFormat::Millis, true);
        db.insert_points(&[
            point("participant.1", &recent),
            point("participant.2", "2024-01-01T00:00:00.000Z"),
        ])
        .unwrap();
        db.upsert_participant("participant.1", "participant.1").unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &Config::default()).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("Points: 2"));
        assert!(output.contains("Participants: 1"));
        assert!(output.contains("Issues: 0"));
        assert!(output.contains("Active sources (7 days):"));
        assert!(output.contains(&format!("- participant.1: {recent}")));
        assert!(!output.contains("- participant.2"));
    }

    #[test]
    fn status_reports_idle_store() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        run(&mut output, &db, &Config::default()).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("Points: 0"));
        assert!(output.contains("No sources active in the last 7 days."));
    }
}
