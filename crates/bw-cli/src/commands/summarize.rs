//! Summarize command: outcome tables over recorded audit issues.

use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use chrono::{NaiveDate, TimeDelta};
use clap::Args;

use bw_core::{Outcome, OutcomeCounts, OutcomeSummary, SummaryDimensions};
use bw_db::Database;

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    /// Last date of the range (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,

    /// Number of days ending at --date.
    #[arg(long, default_value_t = 1)]
    pub days: u32,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &SummarizeArgs) -> Result<()> {
    let to = args.date;
    let from = to - TimeDelta::days(i64::from(args.days.saturating_sub(1)));
    let issues = db.issues_in_range(from, to)?;

    let mut summary = OutcomeSummary::default();
    for issue in &issues {
        let Some(outcome) = outcome_from_tags(&issue.tags) else {
            tracing::debug!(issue = %issue.id, "issue is not a block audit, skipping");
            continue;
        };
        let dimensions = SummaryDimensions {
            platform: issue.platform.clone(),
            device_model: issue.device_model.clone(),
            version: issue.version.clone(),
            source: issue.source.clone(),
            app: issue.app.clone(),
        };
        summary.record(&dimensions, outcome);
    }

    if summary.is_empty() {
        writeln!(writer, "No block audits recorded between {from} and {to}.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "Block audits {from}..{to}: {} audited, {} successful",
        summary.total(),
        summary.successful(),
    )?;

    write_table(
        writer,
        "By platform",
        summary.by_platform.iter().map(|(key, counts)| (key.clone(), counts)),
    )?;
    write_table(
        writer,
        "By device model",
        summary.by_model.iter().map(|(key, counts)| (key.clone(), counts)),
    )?;
    write_table(
        writer,
        "By app version",
        summary.by_version.iter().map(|(key, counts)| (key.clone(), counts)),
    )?;
    write_table(
        writer,
        "By source",
        summary.by_source.iter().map(|(key, counts)| (key.clone(), counts)),
    )?;
    write_table(
        writer,
        "By app",
        summary.by_app.iter().map(|(key, counts)| (key.clone(), counts)),
    )?;
    write_table(
        writer,
        "By model and platform",
        summary
            .by_model_platform
            .iter()
            .map(|((model, platform), counts)| (format!("{model} / {platform}"), counts)),
    )?;
    write_table(
        writer,
        "By source and app",
        summary
            .by_source_app
            .iter()
            .map(|((source, app), counts)| (format!("{source} / {app}"), counts)),
    )?;

    Ok(())
}

/// Extracts the audit outcome from an issue's tag list.
///
/// Tags are whitespace-separated tokens; only issues carrying the
/// `pd-blocks` token are block audits, and outcome tags must match a whole
/// token (`pd-extra-block-when-disabled` must not count as
/// `pd-extra-block`).
fn outcome_from_tags(tags: &str) -> Option<Outcome> {
    let tokens: Vec<&str> = tags.split_whitespace().collect();
    if !tokens.iter().any(|token| *token == "pd-blocks") {
        return None;
    }
    tokens
        .iter()
        .find_map(|token| Outcome::from_str(token).ok())
}

fn write_table<'a, W, I>(writer: &mut W, title: &str, rows: I) -> Result<()>
where
    W: Write,
    I: Iterator<Item = (String, &'a OutcomeCounts)>,
{
    writeln!(writer)?;
    writeln!(writer, "{title}:")?;
    for (key, counts) in rows {
        writeln!(
            writer,
            "  {key}: {} audited, {} ok ({} non-block ok, {} block ok, {} unnecessary, {} missing, {} while disabled)",
            counts.total(),
            counts.successful(),
            counts.no_block_ok,
            counts.block_ok,
            counts.extra_block,
            counts.missing_block,
            counts.extra_block_when_disabled,
        )?;
    }
    Ok(())
}
