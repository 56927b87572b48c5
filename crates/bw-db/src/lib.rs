//! Storage layer for the blocker audit engine.
//!
//! Provides persistence for telemetry points, participants, treatment
//! phases, and audit issues using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but
//! not `Sync`. The reconciliation driver therefore fetches every unit's
//! events up front on one thread and hands the fetched inputs to worker
//! threads; workers never touch the connection.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond
//! precision (e.g. `2025-03-10T10:30:00.000Z`). This format is used by
//! `chrono::DateTime<Utc>` serialization and ensures:
//! - Lexicographic ordering matches chronological ordering
//! - Human-readable values in the database
//! - Timezone-aware (always UTC)
//!
//! Issue and phase dates are local calendar dates stored as `YYYY-MM-DD`.
//!
//! ## Point Payload Storage
//!
//! The `properties` column stores each point's original JSON payload and the
//! `generator` column its telemetry category (e.g.
//! `pdk-foreground-application`). Typed accessors decode the payload fields
//! they need and skip rows that do not decode, so one malformed point never
//! poisons a query.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use bw_core::blocks::BlockEvent;
use bw_core::phase::{BlockerType, TreatmentPhase};
use bw_core::reconcile::BudgetPoint;
use bw_core::types::{AppPackage, ParticipantId};
use bw_core::usage::UsageSample;
use bw_core::{BLOCKED_APP_EVENT, Generator};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for point {point_id}: {timestamp}")]
    TimestampParse {
        point_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored phase row failed to decode.
    #[error("invalid phase for participant {participant_id}: {message}")]
    InvalidPhase {
        participant_id: String,
        message: String,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A raw telemetry point ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRecord {
    pub id: String,
    pub source: String,
    pub generator: String,
    pub secondary_id: Option<String>,
    pub observed_at: String,
    pub recorded_at: String,
    pub user_agent: Option<String>,
    pub properties: String,
}

/// One audit issue produced by a record-mode reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    pub id: String,
    pub created: String,
    pub last_updated: String,
    pub source: String,
    pub app: String,
    pub date: String,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub device_model: Option<String>,
    pub correctness_related: bool,
    pub tags: String,
    pub description: String,
}

/// An enrolled participant and the telemetry source they report under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: String,
    pub source: String,
}

/// Latest point timestamp grouped by source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceActivity {
    pub source: String,
    pub last_point: String,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Points table: the telemetry event store
            -- observed_at: when the device took the reading
            -- recorded_at: when the server stored it
            -- properties: full JSON payload as transmitted
            CREATE TABLE IF NOT EXISTS points (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                generator TEXT NOT NULL,
                secondary_id TEXT,
                observed_at TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                user_agent TEXT,
                properties TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_points_source_generator_observed
                ON points(source, generator, observed_at);
            CREATE INDEX IF NOT EXISTS idx_points_generator_observed
                ON points(generator, observed_at);

            CREATE TABLE IF NOT EXISTS participants (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS phases (
                participant_id TEXT NOT NULL,
                start_date TEXT NOT NULL,
                blocker_type TEXT NOT NULL,
                treatment_active INTEGER NOT NULL,
                receives_subsidy INTEGER NOT NULL,
                snooze_delay INTEGER NOT NULL,
                PRIMARY KEY (participant_id, start_date)
            );

            -- Issues table: append-only audit output
            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY,
                created TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                source TEXT NOT NULL,
                app TEXT NOT NULL,
                date TEXT NOT NULL,
                platform TEXT,
                version TEXT,
                device_model TEXT,
                correctness_related INTEGER NOT NULL,
                tags TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_issues_date ON issues(date);
            CREATE INDEX IF NOT EXISTS idx_issues_source_app_date
                ON issues(source, app, date);
            ",
        )?;
        Ok(())
    }

    /// Inserts a batch of points, ignoring duplicates by ID.
    pub fn insert_points(&mut self, points: &[PointRecord]) -> Result<usize, DbError> {
        if points.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO points
                (id, source, generator, secondary_id, observed_at, recorded_at, user_agent, properties)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for point in points {
                inserted += stmt.execute(params![
                    point.id,
                    point.source,
                    point.generator,
                    point.secondary_id,
                    point.observed_at,
                    point.recorded_at,
                    point.user_agent,
                    point.properties,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn point_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Lists sources that observed any telemetry within `[start, end)`,
    /// ordered by source.
    pub fn distinct_sources_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT source
            FROM points
            WHERE observed_at >= ? AND observed_at < ?
            ORDER BY source ASC
            ",
        )?;
        let rows = stmt.query_map(
            [format_timestamp(start), format_timestamp(end)],
            |row| row.get(0),
        )?;
        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?);
        }
        Ok(sources)
    }

    /// Returns the source's most recent point observed at or before `before`.
    ///
    /// This is the point the driver reads the device's time zone and user
    /// agent from.
    pub fn latest_point(
        &self,
        source: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<PointRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, source, generator, secondary_id, observed_at, recorded_at, user_agent, properties
            FROM points
            WHERE source = ?1 AND observed_at <= ?2
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            ",
        )?;
        let point = stmt
            .query_row(params![source, format_timestamp(before)], |row| {
                Ok(PointRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    generator: row.get(2)?,
                    secondary_id: row.get(3)?,
                    observed_at: row.get(4)?,
                    recorded_at: row.get(5)?,
                    user_agent: row.get(6)?,
                    properties: row.get(7)?,
                })
            })
            .optional()?;
        Ok(point)
    }

    /// Fetches a source's foreground usage samples within `[start, end)`,
    /// optionally restricted to one app, ordered by observation time.
    ///
    /// Rows that do not decode into a usable sample are skipped with a
    /// warning.
    pub fn usage_samples(
        &self,
        source: &str,
        app: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageSample>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, secondary_id, observed_at, properties
            FROM points
            WHERE source = ?1 AND generator = ?2
              AND observed_at >= ?3 AND observed_at < ?4
              AND (?5 IS NULL OR secondary_id = ?5)
            ORDER BY observed_at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![
                source,
                Generator::ForegroundApplication.as_str(),
                format_timestamp(start),
                format_timestamp(end),
                app,
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut samples = Vec::new();
        for row in rows {
            let (id, secondary_id, observed_at, properties) = row?;
            let observed_at = parse_timestamp(&observed_at, &id)?;
            match decode_usage_sample(secondary_id.as_deref(), observed_at, &properties) {
                Some(sample) => samples.push(sample),
                None => warn!(point = %id, %source, "skipping undecodable usage sample"),
            }
        }
        Ok(samples)
    }

    /// Returns the source's most recent versioned budget point, optionally
    /// bounded to points observed at or before `before`.
    pub fn latest_budget_point(
        &self,
        source: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<Option<BudgetPoint>, DbError> {
        let before = before.map(format_timestamp);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, observed_at, properties
            FROM points
            WHERE source = ?1 AND generator = ?2
              AND (?3 IS NULL OR observed_at <= ?3)
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            ",
        )?;
        let row = stmt
            .query_row(
                params![source, Generator::FullAppBudgets.as_str(), before],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((id, observed_at, properties)) => {
                let observed_at = parse_timestamp(&observed_at, &id)?;
                Ok(Some(BudgetPoint {
                    observed_at,
                    properties,
                }))
            }
            None => Ok(None),
        }
    }

    /// Fetches a source's block events within `[start, end)`.
    ///
    /// Block events are app events under the `blocked_app` secondary key;
    /// the blocked app's package is read from the event payload.
    pub fn block_events(
        &self,
        source: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BlockEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, observed_at, properties
            FROM points
            WHERE source = ?1 AND generator = ?2 AND secondary_id = ?3
              AND observed_at >= ?4 AND observed_at < ?5
            ORDER BY observed_at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![
                source,
                Generator::AppEvent.as_str(),
                BLOCKED_APP_EVENT,
                format_timestamp(start),
                format_timestamp(end),
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            let (id, observed_at, properties) = row?;
            let observed_at = parse_timestamp(&observed_at, &id)?;
            match decode_block_event(observed_at, &properties) {
                Some(event) => events.push(event),
                None => warn!(point = %id, %source, "skipping block event without an app"),
            }
        }
        Ok(events)
    }

    /// Records a unit's issues in one transaction.
    pub fn insert_issues(&mut self, issues: &[IssueRecord]) -> Result<usize, DbError> {
        if issues.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO issues
                (id, created, last_updated, source, app, date, platform, version, device_model, correctness_related, tags, description)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for issue in issues {
                stmt.execute(params![
                    issue.id,
                    issue.created,
                    issue.last_updated,
                    issue.source,
                    issue.app,
                    issue.date,
                    issue.platform,
                    issue.version,
                    issue.device_model,
                    i64::from(issue.correctness_related),
                    issue.tags,
                    issue.description,
                ])?;
            }
        }
        tx.commit()?;
        Ok(issues.len())
    }

    /// Finds a prior issue for the same (source, app, date), if any.
    pub fn find_issue(
        &self,
        source: &str,
        app: &str,
        date: NaiveDate,
    ) -> Result<Option<IssueRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, created, last_updated, source, app, date, platform, version, device_model, correctness_related, tags, description
            FROM issues
            WHERE source = ?1 AND app = ?2 AND date = ?3
            ORDER BY created ASC, id ASC
            LIMIT 1
            ",
        )?;
        let issue = stmt
            .query_row(params![source, app, date.to_string()], map_issue_row)
            .optional()?;
        Ok(issue)
    }

    /// Lists issues whose date falls in `[from, to]`, ordered by date then
    /// source then app.
    pub fn issues_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<IssueRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, created, last_updated, source, app, date, platform, version, device_model, correctness_related, tags, description
            FROM issues
            WHERE date >= ?1 AND date <= ?2
            ORDER BY date ASC, source ASC, app ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![from.to_string(), to.to_string()], map_issue_row)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn issue_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Creates or updates a participant, keyed by participant ID.
    pub fn upsert_participant(&mut self, id: &str, source: &str) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO participants (id, source)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET source = excluded.source
            ",
            params![id, source],
        )?;
        Ok(())
    }

    pub fn find_participant(&self, id: &str) -> Result<Option<ParticipantRecord>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, source FROM participants WHERE id = ?1")?;
        let participant = stmt
            .query_row(params![id], |row| {
                Ok(ParticipantRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                })
            })
            .optional()?;
        Ok(participant)
    }

    pub fn participant_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM participants", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Creates or replaces a phase on its (participant, start date) key.
    pub fn upsert_phase(&mut self, phase: &TreatmentPhase) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO phases
            (participant_id, start_date, blocker_type, treatment_active, receives_subsidy, snooze_delay)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(participant_id, start_date) DO UPDATE SET
                blocker_type = excluded.blocker_type,
                treatment_active = excluded.treatment_active,
                receives_subsidy = excluded.receives_subsidy,
                snooze_delay = excluded.snooze_delay
            ",
            params![
                phase.participant_id.as_str(),
                phase.start_date.to_string(),
                phase.blocker_type.as_str(),
                i64::from(phase.treatment_active),
                i64::from(phase.receives_subsidy),
                phase.snooze_delay,
            ],
        )?;
        Ok(())
    }

    /// Lists the phases governing a telemetry source, earliest first.
    pub fn phases_for_source(&self, source: &str) -> Result<Vec<TreatmentPhase>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT ph.participant_id, ph.start_date, ph.blocker_type,
                   ph.treatment_active, ph.receives_subsidy, ph.snooze_delay
            FROM phases ph
            JOIN participants p ON p.id = ph.participant_id
            WHERE p.source = ?1
            ORDER BY ph.start_date ASC
            ",
        )?;
        let rows = stmt.query_map(params![source], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut phases = Vec::new();
        for row in rows {
            let (participant_id, start_date, blocker_type, treatment_active, receives_subsidy, snooze_delay) =
                row?;
            phases.push(decode_phase(
                participant_id,
                &start_date,
                &blocker_type,
                treatment_active,
                receives_subsidy,
                snooze_delay,
            )?);
        }
        Ok(phases)
    }

    pub fn phase_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM phases", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Lists the last point timestamp per source at or after `cutoff`,
    /// ordered by most recent.
    pub fn active_sources_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SourceActivity>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT source, MAX(observed_at) AS last_point
            FROM points
            GROUP BY source
            HAVING last_point >= ?
            ORDER BY last_point DESC, source ASC
            ",
        )?;
        let rows = stmt.query_map([format_timestamp(cutoff)], |row| {
            Ok(SourceActivity {
                source: row.get(0)?,
                last_point: row.get(1)?,
            })
        })?;
        let mut sources = Vec::new();
        for row in rows {
            sources.push(row?);
        }
        Ok(sources)
    }
}

fn map_issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRecord> {
    Ok(IssueRecord {
        id: row.get(0)?,
        created: row.get(1)?,
        last_updated: row.get(2)?,
        source: row.get(3)?,
        app: row.get(4)?,
        date: row.get(5)?,
        platform: row.get(6)?,
        version: row.get(7)?,
        device_model: row.get(8)?,
        correctness_related: row.get::<_, i64>(9)? != 0,
        tags: row.get(10)?,
        description: row.get(11)?,
    })
}

fn decode_usage_sample(
    secondary_id: Option<&str>,
    observed_at: DateTime<Utc>,
    properties: &str,
) -> Option<UsageSample> {
    let payload: Value = serde_json::from_str(properties).ok()?;
    let app_name = secondary_id
        .map(str::to_string)
        .or_else(|| payload.get("application")?.as_str().map(str::to_string))?;
    let app = AppPackage::try_from(app_name).ok()?;
    let duration_ms = payload.get("duration")?.as_f64()?;
    let screen_active = payload.get("screen_active")?.as_bool()?;
    Some(UsageSample {
        app,
        observed_at,
        duration_ms,
        screen_active,
    })
}

fn decode_block_event(observed_at: DateTime<Utc>, properties: &str) -> Option<BlockEvent> {
    let payload: Value = serde_json::from_str(properties).ok()?;
    let app_name = payload.get("event_details")?.get("app")?.as_str()?;
    let app = AppPackage::try_from(app_name.to_string()).ok()?;
    Some(BlockEvent { app, observed_at })
}

fn decode_phase(
    participant_id: String,
    start_date: &str,
    blocker_type: &str,
    treatment_active: i64,
    receives_subsidy: i64,
    snooze_delay: i64,
) -> Result<TreatmentPhase, DbError> {
    let invalid = |message: String| DbError::InvalidPhase {
        participant_id: participant_id.clone(),
        message,
    };
    let start_date: NaiveDate = start_date
        .parse()
        .map_err(|_| invalid(format!("bad start date: {start_date}")))?;
    let blocker_type: BlockerType = blocker_type
        .parse()
        .map_err(|_| invalid(format!("bad blocker type: {blocker_type}")))?;
    let participant_id = ParticipantId::try_from(participant_id.clone())
        .map_err(|_| invalid("blank participant id".to_string()))?;
    Ok(TreatmentPhase {
        participant_id,
        start_date,
        blocker_type,
        treatment_active: treatment_active != 0,
        receives_subsidy: receives_subsidy != 0,
        snooze_delay,
    })
}

fn parse_timestamp(timestamp: &str, point_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            point_id: point_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
