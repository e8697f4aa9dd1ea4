//! Runs table migrations in plan order and builds the operator report.

use crate::core::error::TodoportError;
use crate::core::journal::Journal;
use crate::core::output;
use crate::core::plan::{self, TableSpec};
use crate::core::time;
use crate::plugins::migrate::{self, MigrationContext, RowError};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Savepoint wrapping a whole dry run; rolled back at the end.
const DRY_RUN_SAVEPOINT: &str = "todoport_dry_run";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Completed,
    CompletedWithSkips,
    Failed,
}

impl TableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TableStatus::Completed => "completed",
            TableStatus::CompletedWithSkips => "completed_with_skips",
            TableStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub destination: String,
    pub status: TableStatus,
    pub read: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omitted_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RowError>,
    /// Rows whose enum value only mapped through a domain fallback.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<FatalError>,
    /// Earlier tables in this run that failed and that this table references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on_failed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub tables: usize,
    pub failed_tables: usize,
    pub read: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub plan_digest: String,
    pub tables: Vec<TableReport>,
    pub totals: Totals,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.as_str())
            .collect()
    }

    /// Every row read was either written or already up to date.
    pub fn is_clean(&self) -> bool {
        self.totals.failed_tables == 0 && self.totals.skipped == 0
    }
}

pub fn run_all(
    ctx: &MigrationContext<'_>,
    specs: &[TableSpec],
    journal: &Journal,
    options: RunOptions,
) -> Result<MigrationReport, TodoportError> {
    plan::validate_plan(specs, ctx.mapper)?;
    let mut warnings = plan::check_order(specs);
    let plan_digest = plan::plan_digest(specs)?;
    let started_at = time::now_epoch_z();

    record_or_warn(
        journal,
        &mut warnings,
        "run.start",
        "migration",
        "running",
        Some(serde_json::json!({
            "tables": specs.len(),
            "dry_run": options.dry_run,
            "plan_digest": plan_digest,
        })),
    );

    if options.dry_run {
        ctx.destination.savepoint(DRY_RUN_SAVEPOINT)?;
    }

    let mut tables: Vec<TableReport> = Vec::with_capacity(specs.len());
    for spec in specs {
        record_or_warn(journal, &mut warnings, "table.start", &spec.name, "running", None);

        let mut depends_on_failed: Vec<String> = Vec::new();
        for reference in &spec.references {
            let failed = tables
                .iter()
                .any(|t| t.status == TableStatus::Failed && t.destination == reference.table);
            if failed && !depends_on_failed.contains(&reference.table) {
                depends_on_failed.push(reference.table.clone());
            }
        }

        let report = match migrate::migrate_table(ctx, spec) {
            Ok(outcome) => TableReport {
                table: spec.name.clone(),
                destination: spec.destination_table().to_string(),
                status: if outcome.skipped == 0 {
                    TableStatus::Completed
                } else {
                    TableStatus::CompletedWithSkips
                },
                read: outcome.read,
                written: outcome.written,
                unchanged: outcome.unchanged,
                skipped: outcome.skipped,
                omitted_columns: outcome.omitted_columns,
                errors: outcome.errors,
                fallbacks: outcome.fallbacks,
                fatal: None,
                depends_on_failed,
            },
            Err(err) => TableReport {
                table: spec.name.clone(),
                destination: spec.destination_table().to_string(),
                status: TableStatus::Failed,
                read: 0,
                written: 0,
                unchanged: 0,
                skipped: 0,
                omitted_columns: Vec::new(),
                errors: Vec::new(),
                fallbacks: BTreeMap::new(),
                fatal: Some(FatalError {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
                depends_on_failed,
            },
        };

        let skipped_keys: Vec<String> = report.errors.iter().map(|e| e.key.clone()).collect();
        record_or_warn(
            journal,
            &mut warnings,
            "table.end",
            &spec.name,
            report.status.as_str(),
            Some(serde_json::json!({
                "read": report.read,
                "written": report.written,
                "unchanged": report.unchanged,
                "skipped": report.skipped,
                "skipped_keys": output::preview_messages(&skipped_keys, 5, 60),
                "fallbacks": report.fallbacks,
                "fatal": report.fatal.as_ref().map(|f| f.message.clone()),
            })),
        );
        tables.push(report);
    }

    if options.dry_run {
        ctx.destination.rollback_to(DRY_RUN_SAVEPOINT)?;
    }

    let totals = tables.iter().fold(
        Totals {
            tables: tables.len(),
            ..Totals::default()
        },
        |mut acc, t| {
            if t.status == TableStatus::Failed {
                acc.failed_tables += 1;
            }
            acc.read += t.read;
            acc.written += t.written;
            acc.unchanged += t.unchanged;
            acc.skipped += t.skipped;
            acc
        },
    );

    let mut report = MigrationReport {
        run_id: journal.run_id().to_string(),
        started_at,
        finished_at: time::now_epoch_z(),
        dry_run: options.dry_run,
        plan_digest,
        tables,
        totals,
        warnings,
    };

    let status = if report.totals.failed_tables == 0 {
        "success"
    } else {
        "error"
    };
    let totals = serde_json::to_value(&report.totals)?;
    record_or_warn(
        journal,
        &mut report.warnings,
        "run.end",
        "migration",
        status,
        Some(totals),
    );

    Ok(report)
}

/// Journal writes never abort a run; a failed write becomes a report warning.
fn record_or_warn(
    journal: &Journal,
    warnings: &mut Vec<String>,
    op: &str,
    subject: &str,
    status: &str,
    detail: Option<serde_json::Value>,
) {
    if let Err(err) = journal.record(op, subject, status, detail) {
        warnings.push(format!("journal: {} for {} not recorded: {}", op, subject, err));
    }
}

/// Human-readable report for the terminal.
pub fn render_text(report: &MigrationReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry run)" } else { "" };
    out.push_str(&format!(
        "{} {}{}\n",
        "Migration run".bold(),
        report.run_id,
        mode
    ));
    out.push_str(&format!("  plan {}\n\n", &report.plan_digest[..12.min(report.plan_digest.len())]));

    out.push_str(&format!(
        "  {}{}{}{}{}{}\n",
        output::cell("table", 24).bold(),
        output::cell("status", 22).bold(),
        output::cell("    read", 9).bold(),
        output::cell(" written", 9).bold(),
        output::cell("unchanged", 10).bold(),
        output::cell(" skipped", 9).bold(),
    ));
    for t in &report.tables {
        let status = output::cell(t.status.as_str(), 22);
        let status = match t.status {
            TableStatus::Completed => status.bright_green(),
            TableStatus::CompletedWithSkips => status.bright_yellow(),
            TableStatus::Failed => status.bright_red(),
        };
        out.push_str(&format!(
            "  {}{}{}{}{}{}\n",
            output::cell(&t.table, 24),
            status,
            output::num_cell(t.read, 8),
            output::num_cell(t.written, 9),
            output::num_cell(t.unchanged, 10),
            output::num_cell(t.skipped, 9),
        ));

        if let Some(fatal) = &t.fatal {
            out.push_str(&format!(
                "      {} {}\n",
                "✗".bright_red(),
                output::compact_line(&fatal.message, 120)
            ));
        }
        if !t.omitted_columns.is_empty() {
            out.push_str(&format!(
                "      {} omitted columns: {}\n",
                "▸".bright_cyan(),
                t.omitted_columns.join(", ")
            ));
        }
        if !t.depends_on_failed.is_empty() {
            out.push_str(&format!(
                "      {} depends on failed: {}\n",
                "▸".bright_yellow(),
                t.depends_on_failed.join(", ")
            ));
        }
        for (mapping, count) in &t.fallbacks {
            out.push_str(&format!(
                "      {} fallback {} ({} rows)\n",
                "▸".bright_cyan(),
                mapping,
                count
            ));
        }
        for e in &t.errors {
            out.push_str(&format!(
                "      {} [{}] {}: {}\n",
                "•".bright_yellow(),
                e.kind.as_str(),
                e.key,
                output::compact_line(&e.cause, 120)
            ));
        }
    }

    out.push_str(&format!(
        "\n  {} tables, {} failed | read {} written {} unchanged {} skipped {}\n",
        report.totals.tables,
        report.totals.failed_tables,
        report.totals.read,
        report.totals.written,
        report.totals.unchanged,
        report.totals.skipped
    ));
    for w in &report.warnings {
        out.push_str(&format!("  {} {}\n", "⚠".bright_yellow(), w));
    }
    out
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "orchestrate",
        "version": "0.1.0",
        "description": "Ordered multi-table migration with per-table reporting",
        "commands": [
            { "name": "plan", "description": "Show the migration plan, digest and order warnings" }
        ],
        "storage": ["todoport.events.jsonl"]
    })
}
