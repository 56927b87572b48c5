//! Phases command: bulk-load treatment phases from the researcher TSV.
//!
//! Column layout: `AppCode`, `ReceivesSubsidy`, `BlockerType`, `SnoozeDelay`,
//! `StartDate`, `EndDate`, `TreatmentActive`. `EndDate` is ignored; a phase
//! ends when the participant's next phase starts.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use bw_core::{BlockerType, ParticipantId, TreatmentPhase};
use bw_db::Database;

/// Counts reported after a phase upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasesReport {
    pub loaded: usize,
    pub skipped: usize,
}

pub fn run(db: &mut Database, file: &Path) -> Result<PhasesReport> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let phases = parse_phases(&contents)?;

    let mut loaded = 0;
    let mut skipped = 0;
    for phase in phases {
        if db.find_participant(phase.participant_id.as_str())?.is_none() {
            tracing::warn!(
                participant = %phase.participant_id,
                "unknown participant, skipping phase"
            );
            skipped += 1;
            continue;
        }
        db.upsert_phase(&phase)?;
        loaded += 1;
    }
    Ok(PhasesReport { loaded, skipped })
}

fn parse_phases(contents: &str) -> Result<Vec<TreatmentPhase>> {
    let mut phases = Vec::new();
    // the first line is the header row
    for (idx, line) in contents.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let phase =
            parse_row(line).with_context(|| format!("invalid phase row on line {}", idx + 1))?;
        phases.push(phase);
    }
    Ok(phases)
}

fn parse_row(line: &str) -> Result<TreatmentPhase> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != 7 {
        return Err(anyhow::anyhow!(
            "expected 7 tab-separated fields, found {}",
            fields.len()
        ));
    }
    let participant_id = ParticipantId::new(fields[0]).context("invalid AppCode")?;
    let receives_subsidy = parse_flag(fields[1]).context("invalid ReceivesSubsidy")?;
    let blocker_type: BlockerType = fields[2].parse().context("invalid BlockerType")?;
    let snooze_delay: i64 = fields[3].parse().context("invalid SnoozeDelay")?;
    let start_date: NaiveDate = fields[4].parse().context("invalid StartDate")?;
    let treatment_active = parse_flag(fields[6]).context("invalid TreatmentActive")?;
    Ok(TreatmentPhase {
        participant_id,
        start_date,
        blocker_type,
        treatment_active,
        receives_subsidy,
        snooze_delay,
    })
}

fn parse_flag(field: &str) -> Result<bool> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(anyhow::anyhow!("expected 0 or 1, found {other:?}")),
    }
}
