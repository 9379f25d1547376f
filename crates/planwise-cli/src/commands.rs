//! Subcommand implementations
//!
//! Each command prints its result to stdout. Everything that does not need
//! a live connection is split out so it can be exercised without one.

use crate::config::PlanwiseConfig;
use crate::render::{evidence_table, findings_table, usage_table};
use anyhow::{Context, bail};
use planwise_analyzer::{Advisor, QueryType, RawPlan, Report, ScoredFinding, extract_features_for};
use planwise_core::{Connection, EngineKind, IndexUsage};
use planwise_drivers::{collect_index_usage, connect, redact};
use planwise_validation::{Harness, measure_once};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a command prints its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// The plain-text recommendation report
    Text,
    /// Findings as a terminal table
    Table,
    /// Pretty-printed JSON
    Json,
}

/// Reads a file, or stdin when the path is `-`
pub fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// A usage snapshot as a JSON array of index usage records
pub fn parse_usage(text: &str) -> anyhow::Result<Vec<IndexUsage>> {
    serde_json::from_str(text).context("usage snapshot must be a JSON array of index records")
}

pub fn analyze_report(
    config: &PlanwiseConfig,
    engine: EngineKind,
    sql: &str,
    plan_text: &str,
    usage: &[IndexUsage],
) -> anyhow::Result<Report> {
    let raw = RawPlan::parse(plan_text).context("could not read the EXPLAIN output")?;
    let report = Advisor::new(config.advisor.clone())
        .analyze(engine, sql, &raw, usage)
        .context("analysis failed")?;
    Ok(report)
}

pub fn render_report(report: &Report, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Text => Ok(report.render_text()),
        Format::Json => to_json(report),
        Format::Table => {
            let mut out = format!(
                "{} {} on {} (plan cost {:.2}, {} nodes)\n",
                report.engine,
                report.query_type.as_str(),
                report.tables.join(", "),
                report.plan.total_cost,
                report.plan.node_count,
            );
            if report.findings.is_empty() {
                out.push_str("No recommendations.\n");
            } else {
                out.push_str(&findings_table(&report.findings).to_string());
                out.push('\n');
            }
            for record in &report.validations {
                out.push_str(&format!(
                    "\nValidation of #{}: {}\n",
                    record.finding_index + 1,
                    record.evidence
                ));
                out.push_str(&evidence_table(&record.evidence).to_string());
                out.push('\n');
            }
            Ok(out)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

/// Drop candidates from a usage snapshot, highest impact first
pub fn unused_index_findings(
    config: &PlanwiseConfig,
    engine: EngineKind,
    usage: &[IndexUsage],
) -> Vec<ScoredFinding> {
    Advisor::new(config.advisor.clone()).unused_indexes(engine, usage)
}

/// Resolves a 1-based `--finding` number
pub fn select_finding(report: &Report, number: usize) -> anyhow::Result<usize> {
    if report.findings.is_empty() {
        bail!("the query produced no recommendations to validate");
    }
    if number == 0 || number > report.findings.len() {
        bail!(
            "finding #{number} does not exist; choose 1 to {}",
            report.findings.len()
        );
    }
    Ok(number - 1)
}

pub fn analyze(
    config: &PlanwiseConfig,
    engine: EngineKind,
    sql: &str,
    plan_path: &Path,
    usage_path: Option<&Path>,
    format: Format,
) -> anyhow::Result<()> {
    let plan_text = read_input(plan_path)?;
    let usage = match usage_path {
        Some(path) => parse_usage(&read_input(path)?)
            .with_context(|| format!("in {}", path.display()))?,
        None => Vec::new(),
    };
    let report = analyze_report(config, engine, sql, &plan_text, &usage)?;
    tracing::info!(
        findings = report.findings.len(),
        malformed = report.plan.malformed,
        "analysis complete"
    );
    println!("{}", render_report(&report, format)?);
    Ok(())
}

pub async fn unused_indexes(
    config: &PlanwiseConfig,
    url: &str,
    all: bool,
    format: Format,
) -> anyhow::Result<()> {
    let connection = open(url).await?;
    let collected = collect_index_usage(connection.as_ref()).await;
    close(connection.as_ref()).await;
    let usage = collected.context("failed to collect index usage")?;

    let findings = unused_index_findings(config, connection.engine(), &usage);
    tracing::info!(
        indexes = usage.len(),
        candidates = findings.len(),
        "index usage collected"
    );

    match format {
        Format::Json => println!("{}", to_json(&findings)?),
        Format::Text | Format::Table => {
            if all {
                println!("{}", usage_table(&usage));
            }
            if findings.is_empty() {
                println!("No unused index candidates.");
            } else {
                println!("{}", findings_table(&findings));
            }
        }
    }
    Ok(())
}

pub async fn validate(
    config: &PlanwiseConfig,
    url: &str,
    sql: &str,
    finding_number: usize,
    format: Format,
) -> anyhow::Result<()> {
    let connection = open(url).await?;
    let outcome = run_trial(config, connection.clone(), sql, finding_number).await;
    close(connection.as_ref()).await;
    let report = outcome?;
    println!("{}", render_report(&report, format)?);
    Ok(())
}

async fn run_trial(
    config: &PlanwiseConfig,
    connection: Arc<dyn Connection>,
    sql: &str,
    finding_number: usize,
) -> anyhow::Result<Report> {
    let engine = connection.engine();
    let features = extract_features_for(engine, sql).context("could not parse the query")?;
    let read_only = features.query_type == QueryType::Select;
    let live = measure_once(connection.as_ref(), sql, read_only)
        .await
        .context("failed to capture the current plan")?;
    let usage = collect_index_usage(connection.as_ref())
        .await
        .context("failed to collect index usage")?;

    let mut report = Advisor::new(config.advisor.clone()).build_report(
        engine,
        sql,
        &features,
        &live.plan,
        &usage,
    );
    let index = select_finding(&report, finding_number)?;
    let finding = report.findings[index].finding.clone();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping the trial after the current step");
            on_interrupt.cancel();
        }
    });

    let mut harness = Harness::new(connection, config.harness.clone()).with_cancellation(cancel);
    let result = harness.run(sql, &finding).await;
    watcher.abort();

    match result {
        Ok(evidence) => {
            report.attach_validation(index, evidence);
            Ok(report)
        }
        Err(e) if e.is_escalated() => {
            tracing::error!(rule = %finding.rule_id, error = %e, "trial left the schema modified");
            Err(anyhow::Error::new(e).context("validation trial could not revert its change"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("validation trial failed")),
    }
}

async fn open(url: &str) -> anyhow::Result<Arc<dyn Connection>> {
    let connection = connect(url)
        .await
        .with_context(|| format!("failed to connect to {}", redact(url)))?;
    tracing::debug!(engine = %connection.engine(), "connected");
    Ok(connection)
}

async fn close(connection: &dyn Connection) {
    if let Err(e) = connection.close().await {
        tracing::warn!(error = %e, "failed to close connection");
    }
}
