//! Terminal tables

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use planwise_analyzer::{ScoredFinding, ValidatedEvidence};
use planwise_core::IndexUsage;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// One row per finding, numbered the way `validate --finding` expects
pub fn findings_table(findings: &[ScoredFinding]) -> Table {
    let mut out = table(vec!["#", "Impact", "Confidence", "Rule", "Target", "Suggested Action"]);
    for (i, scored) in findings.iter().enumerate() {
        out.add_row(vec![
            Cell::new(i + 1),
            Cell::new(scored.impact),
            Cell::new(format!("{:.2}", scored.confidence)),
            Cell::new(&scored.finding.rule_id),
            Cell::new(&scored.finding.target),
            Cell::new(&scored.finding.suggested_action),
        ]);
    }
    out
}

pub fn usage_table(usage: &[IndexUsage]) -> Table {
    let mut out = table(vec!["Table", "Index", "Scans", "Size", "Kind"]);
    for index in usage {
        let kind = if index.is_primary {
            "primary"
        } else if index.is_unique {
            "unique"
        } else {
            ""
        };
        let table_name = match &index.schema {
            Some(schema) => format!("{schema}.{}", index.table),
            None => index.table.clone(),
        };
        out.add_row(vec![
            Cell::new(table_name),
            Cell::new(&index.index),
            Cell::new(index.times_used),
            Cell::new(index.size_pretty().unwrap_or_default()),
            Cell::new(kind),
        ]);
    }
    out
}

/// Before and after figures of a trial
pub fn evidence_table(evidence: &ValidatedEvidence) -> Table {
    let mut out = table(vec!["Phase", "Mean (ms)", "First run (ms)", "Runs", "Cost", "Access paths"]);
    for (phase, summary, timing) in [
        ("before", &evidence.before, &evidence.before_time),
        ("after", &evidence.after, &evidence.after_time),
    ] {
        out.add_row(vec![
            Cell::new(phase),
            Cell::new(format!("{:.3}", timing.mean_ms)),
            Cell::new(format!("{:.3}", timing.first_run_ms)),
            Cell::new(timing.runs),
            Cell::new(format!("{:.2}", summary.total_cost)),
            Cell::new(summary.access_paths()),
        ]);
    }
    out
}

#[cfg(test)]
mod tests;
