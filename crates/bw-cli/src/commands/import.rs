//! Import command for loading telemetry points into the local `SQLite` store.

use std::collections::BTreeSet;
use std::io::{self, BufRead};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use uuid::Uuid;

use bw_db::{Database, PointRecord};

/// Counts reported after an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Reads JSONL points from stdin and stores them.
pub fn run(db: &mut Database) -> Result<ImportReport> {
    let stdin = io::stdin();
    let points = parse_points(stdin.lock())?;
    insert(db, &points)
}

pub(crate) fn insert(db: &mut Database, points: &[PointRecord]) -> Result<ImportReport> {
    // Participants enroll under their app code, which doubles as the
    // telemetry source identifier.
    let sources: BTreeSet<&str> = points.iter().map(|point| point.source.as_str()).collect();
    for source in sources {
        db.upsert_participant(source, source)
            .with_context(|| format!("failed to enroll {source}"))?;
    }

    let inserted = db.insert_points(points).context("failed to insert points")?;
    Ok(ImportReport {
        inserted,
        skipped: points.len() - inserted,
    })
}

pub(crate) fn parse_points<R: BufRead>(reader: R) -> Result<Vec<PointRecord>> {
    let mut points = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: ImportPoint = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        let record = parsed
            .into_record()
            .with_context(|| format!("invalid point on line {}", idx + 1))?;
        points.push(record);
    }
    Ok(points)
}

/// Timestamps arrive either as epoch milliseconds or as RFC 3339 text,
/// depending on which exporter produced the feed.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    EpochMillis(i64),
    Text(String),
}

impl Timestamp {
    fn to_utc(&self) -> Result<DateTime<Utc>> {
        match self {
            Self::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms)
                .ok_or_else(|| anyhow::anyhow!("epoch milliseconds out of range: {ms}")),
            Self::Text(text) => {
                let parsed = DateTime::parse_from_rfc3339(text)
                    .with_context(|| format!("invalid timestamp {text:?}"))?;
                Ok(parsed.with_timezone(&Utc))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImportPoint {
    source: String,
    generator: String,
    #[serde(default)]
    secondary_id: Option<String>,
    observed_at: Timestamp,
    #[serde(default)]
    recorded_at: Option<Timestamp>,
    #[serde(default)]
    user_agent: Option<String>,
    properties: serde_json::Value,
}

impl ImportPoint {
    fn into_record(self) -> Result<PointRecord> {
        if self.source.trim().is_empty() {
            return Err(anyhow::anyhow!("missing source"));
        }
        if self.generator.trim().is_empty() {
            return Err(anyhow::anyhow!("missing generator"));
        }
        let observed_at = self.observed_at.to_utc().context("invalid observed_at")?;
        let recorded_at = match &self.recorded_at {
            Some(timestamp) => timestamp.to_utc().context("invalid recorded_at")?,
            None => observed_at,
        };
        let secondary_id = self.secondary_id.filter(|id| !id.trim().is_empty());
        let id = point_id(
            &self.source,
            &self.generator,
            secondary_id.as_deref(),
            observed_at,
        );
        let properties =
            serde_json::to_string(&self.properties).context("failed to encode properties")?;
        Ok(PointRecord {
            id,
            source: self.source,
            generator: self.generator,
            secondary_id,
            observed_at: format_millis(observed_at),
            recorded_at: format_millis(recorded_at),
            user_agent: self.user_agent,
            properties,
        })
    }
}

/// Stable identifier derived from the point's identity fields, so importing
/// the same telemetry twice is a no-op.
fn point_id(
    source: &str,
    generator: &str,
    secondary_id: Option<&str>,
    observed_at: DateTime<Utc>,
) -> String {
    let name = format!(
        "point|{source}|{generator}|{}|{}",
        secondary_id.unwrap_or(""),
        format_millis(observed_at),
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn format_millis(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
