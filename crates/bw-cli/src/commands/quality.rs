//! Quality command: participant data-quality report from a peer server.
//!
//! Sources assigned to a federated server keep their telemetry remotely, so
//! the local reconcile pass skips them and this command asks the peer for
//! its performance report instead.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;

use bw_remote::{Client, PerformanceReport};

use crate::Config;

#[derive(Debug, Args)]
pub struct QualityArgs {
    /// Source whose participant to look up.
    #[arg(long)]
    pub source: String,
}

pub fn run<W: Write>(writer: &mut W, config: &Config, args: &QualityArgs) -> Result<()> {
    let server = config.federated_server_for(&args.source).with_context(|| {
        format!(
            "{} is not assigned to a federated server; its telemetry is local",
            args.source
        )
    })?;

    let client = Client::new(&server.url, &server.request_key)
        .with_context(|| format!("invalid federated server config for {}", server.name))?;

    let runtime =
        tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let report = runtime
        .block_on(client.performance_report(&args.source))
        .with_context(|| format!("failed to fetch performance report from {}", server.name))?;

    write_report(writer, &args.source, &server.name, &report)
}

fn write_report<W: Write>(
    writer: &mut W,
    source: &str,
    server: &str,
    report: &PerformanceReport,
) -> Result<()> {
    writeln!(writer, "Performance report for {source} (via {server})")?;
    if let Some(group) = &report.group {
        writeln!(writer, "Group: {group}")?;
    }

    let latest = report.latest_point.as_deref().unwrap_or("never");
    if report.is_stale() {
        writeln!(writer, "Latest point: {latest} (STALE)")?;
    } else {
        writeln!(writer, "Latest point: {latest}")?;
    }
    if let Some(count) = report.today_observed_count {
        writeln!(writer, "Points today: {count}")?;
    }
    if let Some(count) = report.yesterday_observed_count {
        writeln!(writer, "Points yesterday: {count}")?;
    }
    if let Some(fraction) = report.today_observed_fraction {
        writeln!(writer, "Coverage today: {:.0}%", fraction * 100.0)?;
    }

    if let Some(version) = &report.app_version {
        writeln!(writer, "App version: {version}")?;
    }
    if let Some(platform) = &report.platform_version {
        writeln!(writer, "Platform: {platform}")?;
    }
    if let Some(model) = &report.device_model {
        writeln!(writer, "Device: {model}")?;
    }

    if let Some(phase) = &report.phase_type {
        let start = report.phase_start.as_deref().unwrap_or("unknown start");
        writeln!(writer, "Phase: {phase} since {start}")?;
    }
    if let Some(budget) = &report.phase_budget {
        let mut limits: Vec<_> = budget.iter().collect();
        limits.sort();
        for (app, limit) in limits {
            writeln!(writer, "Budget: {app} = {limit} ms")?;
        }
    }
    if let Some(snoozes) = report.phase_snoozes {
        writeln!(writer, "Snoozes this phase: {snoozes}")?;
    }
    for issue in &report.phase_misc_issues {
        writeln!(writer, "Issue: {issue}")?;
    }
    Ok(())
}
