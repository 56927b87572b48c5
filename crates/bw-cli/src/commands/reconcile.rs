//! Reconcile command: the daily blocker audit across all local sources.
//!
//! Candidate sources are listed from the store, each source's inputs are
//! fetched on this thread, and evaluation fans out over a sized worker pool.
//! Per-source failures are logged and never abort the run.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, Utc};
use clap::Args;
use rayon::prelude::*;
use uuid::Uuid;

use bw_core::{
    Classification, OutcomeSummary, SourceId, SummaryDimensions, UnitInput, UnitSkip,
};
use bw_db::{Database, IssueRecord};

use crate::Config;

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Local calendar date to audit (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,

    /// Record an issue per classified app instead of only reporting.
    #[arg(long)]
    pub record_issue: bool,

    /// Audit a single source.
    #[arg(long)]
    pub source: Option<String>,

    /// Audit a single app package.
    #[arg(long)]
    pub app: Option<String>,

    /// Cap the number of sources audited this run.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// What evaluation concluded about one source.
enum SourceOutcome {
    Classified(Vec<Classification>),
    Skipped(UnitSkip),
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &Config,
    args: &ReconcileArgs,
) -> Result<()> {
    let sources = select_sources(db, config, args)?;
    tracing::info!(date = %args.date, sources = sources.len(), "reconciling");

    // The SQLite connection stays on this thread; workers get owned inputs.
    let mut units = Vec::with_capacity(sources.len());
    for source in &sources {
        match fetch_unit(db, source, args) {
            Ok(unit) => units.push(unit),
            Err(err) => tracing::error!(%source, error = %err, "skipping source after fetch error"),
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .build()
        .context("failed to build worker pool")?;
    let (results, summary) = pool.install(|| {
        let results: Vec<(SourceId, SourceOutcome)> = units
            .par_iter()
            .map(|unit| {
                let outcome = match bw_core::evaluate_unit(unit) {
                    Ok(classifications) => SourceOutcome::Classified(classifications),
                    Err(skip) => SourceOutcome::Skipped(skip),
                };
                (unit.source.clone(), outcome)
            })
            .collect();
        let summary = results
            .par_iter()
            .map(|(_, outcome)| partial_summary(outcome))
            .reduce(OutcomeSummary::default, OutcomeSummary::merge);
        (results, summary)
    });

    for (source, outcome) in &results {
        match outcome {
            SourceOutcome::Classified(classifications) => {
                for classification in classifications {
                    writeln!(writer, "{}", classification.report_line())?;
                }
            }
            SourceOutcome::Skipped(UnitSkip::MissingBudget) => {
                writeln!(writer, " [ ] {source} no budget")?;
            }
            SourceOutcome::Skipped(skip) => {
                tracing::debug!(%source, reason = %skip, "source skipped");
            }
        }
    }

    if args.record_issue {
        record_results(db, args.date, &results);
    }

    writeln!(writer, "SUCCESSFUL: {}", summary.successful())?;
    Ok(())
}

fn partial_summary(outcome: &SourceOutcome) -> OutcomeSummary {
    let mut partial = OutcomeSummary::default();
    if let SourceOutcome::Classified(classifications) = outcome {
        for classification in classifications {
            partial.record(
                &SummaryDimensions::from(classification),
                classification.outcome,
            );
        }
    }
    partial
}

fn select_sources(db: &Database, config: &Config, args: &ReconcileArgs) -> Result<Vec<String>> {
    let mut sources = match &args.source {
        Some(source) => vec![source.clone()],
        None => {
            // Zone offsets stay within +/-14 hours, so every source's local
            // day for `date` falls inside this probe window.
            let probe_start = utc_midnight(args.date - TimeDelta::days(1));
            let probe_end = utc_midnight(args.date + TimeDelta::days(2));
            db.distinct_sources_in(probe_start, probe_end)
                .context("failed to list sources")?
        }
    };

    sources.retain(|source| {
        if config.is_federated(source) {
            tracing::debug!(%source, "skipping federated source");
            false
        } else {
            true
        }
    });

    if let Some(limit) = args.limit.or(config.max_sources_per_run) {
        sources.truncate(limit);
    }
    Ok(sources)
}

fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn fetch_unit(db: &Database, source: &str, args: &ReconcileArgs) -> Result<UnitInput> {
    let latest = db.latest_point(source, Utc::now())?;
    let (timezone, user_agent) = match latest {
        Some(point) => {
            let properties: Option<serde_json::Value> =
                serde_json::from_str(&point.properties).ok();
            let timezone = properties.as_ref().and_then(bw_core::device_timezone);
            (timezone, point.user_agent)
        }
        None => (None, None),
    };

    // Without a resolvable zone there is no local-day window to fetch;
    // evaluation then reports the missing zone.
    let window = timezone
        .as_deref()
        .and_then(bw_core::parse_zone)
        .map(|zone| bw_core::day_window(args.date, zone));
    let (samples, blocks) = match window {
        Some((start, end)) => (
            db.usage_samples(source, args.app.as_deref(), start, end)?,
            db.block_events(source, start, end)?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    Ok(UnitInput {
        source: SourceId::new(source)?,
        date: args.date,
        timezone,
        user_agent,
        samples_by_app: bw_core::group_by_app(samples),
        budget: db.latest_budget_point(source, None)?,
        blocks,
        phases: db.phases_for_source(source)?,
    })
}

fn record_results(db: &mut Database, date: NaiveDate, results: &[(SourceId, SourceOutcome)]) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    for (source, outcome) in results {
        let SourceOutcome::Classified(classifications) = outcome else {
            continue;
        };
        if classifications.is_empty() {
            continue;
        }
        if let Err(err) = record_unit(db, &now, date, source.as_str(), classifications) {
            tracing::error!(%source, error = %err, "failed to record issues");
        }
    }
}

fn record_unit(
    db: &mut Database,
    now: &str,
    date: NaiveDate,
    source: &str,
    classifications: &[Classification],
) -> Result<()> {
    let mut records = Vec::with_capacity(classifications.len());
    for classification in classifications {
        if let Some(prior) = db.find_issue(source, classification.app.as_str(), date)? {
            tracing::warn!(
                %source,
                app = %classification.app,
                %date,
                prior = %prior.id,
                "recording over an existing issue"
            );
        }
        records.push(IssueRecord {
            id: Uuid::new_v4().to_string(),
            created: now.to_string(),
            last_updated: now.to_string(),
            source: source.to_string(),
            app: classification.app.as_str().to_string(),
            date: date.to_string(),
            platform: classification.client.platform.clone(),
            version: classification.client.version.clone(),
            device_model: classification.client.device_model.clone(),
            correctness_related: true,
            tags: classification.tags(),
            description: classification.description(),
        });
    }
    let recorded = db.insert_issues(&records)?;
    tracing::info!(%source, recorded, "issues recorded");
    Ok(())
}
