//! Per-unit reconciliation.
//!
//! One unit is one (source, date). Everything a unit needs is fetched up
//! front into a [`UnitInput`]; evaluation is then pure, so units can run on
//! worker threads without touching storage.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, warn};

use crate::blocks::{self, BlockEvent};
use crate::budget::{self, BudgetError};
use crate::day;
use crate::outcome::{self, Classification};
use crate::phase::{TreatmentPhase, governing_phase};
use crate::types::{AppPackage, SourceId};
use crate::usage::{self, UsageSample};
use crate::user_agent::ClientInfo;

/// Why a unit could not be evaluated. Skips are expected and non-fatal, the
/// run continues with the next unit.
#[derive(Debug, Error)]
pub enum UnitSkip {
    #[error("no telemetry to resolve a time zone")]
    MissingTimezone,
    #[error("no budget in effect")]
    MissingBudget,
    #[error("budget payload could not be decoded")]
    MalformedBudget(#[source] BudgetError),
}

/// The latest versioned budget point for a source, still wire-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetPoint {
    pub observed_at: DateTime<Utc>,
    pub properties: String,
}

/// Everything fetched for one (source, date) unit.
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub source: SourceId,
    pub date: NaiveDate,
    /// Device-reported IANA zone name from the source's latest telemetry.
    pub timezone: Option<String>,
    pub user_agent: Option<String>,
    pub samples_by_app: BTreeMap<AppPackage, Vec<UsageSample>>,
    pub budget: Option<BudgetPoint>,
    pub blocks: Vec<BlockEvent>,
    pub phases: Vec<TreatmentPhase>,
}

/// Resolves the unit's time zone from device-reported metadata.
pub fn resolve_zone(timezone: Option<&str>) -> Result<Tz, UnitSkip> {
    timezone
        .and_then(day::parse_zone)
        .ok_or(UnitSkip::MissingTimezone)
}

/// Evaluates one unit: resolves zone and budget, aggregates usage per
/// limited app, and classifies each app that saw on-screen use.
///
/// Apps with no limit set (absent or negative in the effective limit map)
/// are not audited. Apps with a limit but no on-screen usage are not audited
/// either, there is nothing the blocker could have done wrong.
pub fn evaluate_unit(input: &UnitInput) -> Result<Vec<Classification>, UnitSkip> {
    let zone = resolve_zone(input.timezone.as_deref())?;
    let (window_start, window_end) = day::day_window(input.date, zone);
    let day_start_ms = window_start.timestamp_millis();

    let budget_point = input.budget.as_ref().ok_or(UnitSkip::MissingBudget)?;
    let history = budget::decode_history(&budget_point.properties, budget_point.observed_at)
        .map_err(UnitSkip::MalformedBudget)?;
    let snapshot = budget::resolve(&history, day_start_ms).ok_or(UnitSkip::MissingBudget)?;

    let phase = governing_phase(&input.phases, input.date);
    let blocker_active = phase.is_some_and(TreatmentPhase::blocker_active);
    let blocker_type = phase
        .filter(|_| blocker_active)
        .map(|phase| phase.blocker_type);

    let client = ClientInfo::decode_opt(input.user_agent.as_deref());

    let mut limited: Vec<(&String, i64)> = snapshot
        .limits
        .iter()
        .map(|(app, limit)| (app, *limit))
        .collect();
    limited.sort_by(|a, b| a.0.cmp(b.0));

    let mut classifications = Vec::new();
    for (app_name, limit) in limited {
        if limit < 0 {
            debug!(source = %input.source, app = %app_name, "no limit set, app is unlimited");
            continue;
        }
        let Ok(app) = AppPackage::try_from(app_name.clone()) else {
            warn!(source = %input.source, "ignoring blank app name in limit map");
            continue;
        };
        let samples = input
            .samples_by_app
            .get(&app)
            .map_or(&[][..], Vec::as_slice);
        let totals = usage::aggregate(samples, window_start, window_end);
        if totals.on_screen_ms <= 0.0 {
            continue;
        }
        let block_count = blocks::count_blocks(&input.blocks, &app, window_start, window_end);
        if let Some(outcome) =
            outcome::classify(totals.on_screen_ms, limit, block_count, blocker_active)
        {
            classifications.push(Classification {
                source: input.source.clone(),
                app,
                date: input.date,
                outcome,
                on_screen_ms: totals.on_screen_ms,
                limit_ms: limit,
                block_count,
                duplicate_count: totals.duplicate_count,
                blocker_type,
                user_agent: input.user_agent.clone(),
                client: client.clone(),
            });
        }
    }

    for app in input.samples_by_app.keys() {
        if budget::app_limit(&snapshot.limits, app.as_ref()).is_none() {
            debug!(source = %input.source, %app, "usage observed for app with no limit set");
        }
    }

    Ok(classifications)
}
