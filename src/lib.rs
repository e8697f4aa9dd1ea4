//! todoport: move a multi-tenant TodoApp dataset into a namespaced schema.
//!
//! The tool reads rows from a legacy namespace, remaps legacy enumerations,
//! tolerates columns the destination lacks, and writes with an idempotent
//! upsert. A separate pass rewrites the application's data-access calls so
//! they target the namespaced tables.
//!
//! # Architecture
//!
//! - **Schema Inspector** ([`plugins::inspect`]): which destination columns exist
//! - **Value Mapper** ([`plugins::mapping`]): legacy enum values to destination values
//! - **Row Migrator** ([`plugins::migrate`]): one table, row-level error isolation
//! - **Orchestrator** ([`plugins::orchestrate`]): tables in plan order, one report
//! - **Rewriter** ([`plugins::rewrite`]): namespaced table references in source code
//!
//! Every store handle is passed explicitly through
//! [`plugins::migrate::MigrationContext`]. Nothing holds a global connection.
//!
//! # Examples
//!
//! ```bash
//! # Check the destination schema against the plan
//! todoport verify --dest app.db
//!
//! # Rehearse, then run
//! todoport migrate --source legacy.db --dest app.db --dry-run
//! todoport migrate --source legacy.db --dest app.db --report-out report.json
//!
//! # Point the app at the namespaced tables
//! todoport rewrite --root ./web/src --prefix TODOAAPP.
//! ```

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, FormatCli, MigrateCli, RewriteCli, VerifyCli};
use colored::Colorize;
use crate::core::{
    config::{self, TodoportConfig},
    error::TodoportError,
    journal::Journal,
    plan,
    store::SqliteStore,
    time,
};
use crate::plugins::{
    inspect::{self, SchemaInspector},
    mapping,
    migrate::{self, MigrationContext},
    orchestrate::{self, RunOptions},
    rewrite::{self, RewriteOptions},
};

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

pub fn run() -> Result<(), TodoportError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    if let Command::Version = cli.command {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = config::load_config(cli.config.as_deref(), &current_dir)?;

    match cli.command {
        Command::Version => Ok(()),
        Command::Migrate(args) => run_migrate(&config, args),
        Command::Verify(args) => run_verify(&config, args),
        Command::Plan(args) => run_plan(&config, args),
        Command::Catalog(args) => run_catalog(&config, args),
        Command::Map { domain, value } => {
            let mapped = config.mapper()?.map_enum(&domain, &value)?;
            println!("{}", mapped);
            Ok(())
        }
        Command::Rewrite(args) => run_rewrite(&config, &current_dir, args),
        Command::Schema => {
            let schemas = serde_json::json!([
                inspect::schema(),
                mapping::schema(),
                migrate::schema(),
                orchestrate::schema(),
                rewrite::schema(),
            ]);
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            Ok(())
        }
    }
}

fn check_format(format: &str) -> Result<bool, TodoportError> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => Err(TodoportError::ValidationError(format!(
            "unknown format '{}': expected 'text' or 'json'",
            other
        ))),
    }
}

fn destination_path(
    config: &TodoportConfig,
    flag: Option<PathBuf>,
) -> Result<PathBuf, TodoportError> {
    flag.or_else(|| config.run.destination.clone()).ok_or_else(|| {
        TodoportError::ConfigError(
            "no destination database: pass --dest or set [run].destination".to_string(),
        )
    })
}

fn open_journal(
    config: &TodoportConfig,
    flag: Option<PathBuf>,
    disabled: bool,
) -> Journal {
    let run_id = time::new_event_id();
    if disabled {
        return Journal::disabled(&run_id);
    }
    let path = flag
        .or_else(|| config.run.journal.clone())
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_JOURNAL_PATH));
    Journal::new(&path, &run_id)
}

fn run_migrate(config: &TodoportConfig, args: MigrateCli) -> Result<(), TodoportError> {
    let json = check_format(&args.format)?;
    let dest_path = destination_path(config, args.dest)?;
    let store = SqliteStore::open(&dest_path)?;

    let source_namespace = match args.source.or_else(|| config.run.source.clone()) {
        Some(source_path) => {
            if !source_path.exists() {
                return Err(TodoportError::NotFound(format!(
                    "source database {}",
                    source_path.display()
                )));
            }
            let alias = args
                .source_namespace
                .unwrap_or_else(|| config.source_namespace().to_string());
            store.attach(&source_path, &alias)?;
            Some(alias)
        }
        // No separate file: the legacy tables live in the destination database itself.
        None => args
            .source_namespace
            .or_else(|| config.run.source_namespace.clone()),
    };

    let mapper = config.mapper()?;
    let specs = config.plan()?;
    let journal = open_journal(config, args.journal, args.no_journal);
    let inspector = SchemaInspector::new(&store);
    let ctx = MigrationContext {
        source: &store,
        destination: &store,
        inspector: &inspector,
        mapper: &mapper,
        source_namespace,
    };

    let report = orchestrate::run_all(
        &ctx,
        &specs,
        &journal,
        RunOptions {
            dry_run: args.dry_run,
        },
    )?;

    if let Some(out) = &args.report_out {
        write_json(out, &report)?;
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", orchestrate::render_text(&report));
    }

    let failed = report.failed_tables();
    if !failed.is_empty() {
        return Err(TodoportError::ValidationError(format!(
            "{} table(s) failed: {}",
            failed.len(),
            failed.join(", ")
        )));
    }
    Ok(())
}

fn run_verify(config: &TodoportConfig, args: VerifyCli) -> Result<(), TodoportError> {
    let json = check_format(&args.format)?;
    let store = SqliteStore::open(&destination_path(config, args.dest)?)?;
    let specs = config.plan()?;
    let inspector = SchemaInspector::new(&store);
    let verification = inspect::verify_plan(&inspector, &specs)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verification)?);
    } else {
        for t in &verification.tables {
            let mark = if t.ok() {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("{} {}", mark, t.destination.bold());
            if !t.exists {
                println!("    table does not exist");
            }
            if !t.missing_required.is_empty() {
                println!("    missing required: {}", t.missing_required.join(", "));
            }
            if !t.missing_optional.is_empty() {
                println!(
                    "    missing optional (omitted): {}",
                    t.missing_optional.join(", ")
                );
            }
            if !t.missing_parents.is_empty() {
                println!("    missing parent tables: {}", t.missing_parents.join(", "));
            }
        }
    }

    if !verification.ok {
        return Err(TodoportError::SchemaPreconditionError(
            "destination schema does not satisfy the migration plan".to_string(),
        ));
    }
    Ok(())
}

fn run_plan(config: &TodoportConfig, args: FormatCli) -> Result<(), TodoportError> {
    let json = check_format(&args.format)?;
    let specs = config.plan()?;
    plan::validate_plan(&specs, &config.mapper()?)?;
    let digest = plan::plan_digest(&specs)?;
    let warnings = plan::check_order(&specs);

    if json {
        let out = serde_json::json!({
            "digest": digest,
            "tables": specs,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", "Plan".bold(), digest);
    for (idx, spec) in specs.iter().enumerate() {
        let parents: Vec<&str> = spec.references.iter().map(|r| r.table.as_str()).collect();
        let optional: Vec<&str> = spec
            .columns
            .iter()
            .filter(|c| c.optional)
            .map(|c| c.name.as_str())
            .collect();
        println!(
            "  {:>2}. {} -> {}  keys({})",
            idx + 1,
            spec.source_table(),
            spec.destination_table().bright_cyan(),
            spec.conflict_keys.join(", ")
        );
        if !parents.is_empty() {
            println!("        after: {}", parents.join(", "));
        }
        if !optional.is_empty() {
            println!("        optional: {}", optional.join(", "));
        }
    }
    for w in &warnings {
        println!("  {} {}", "⚠".bright_yellow(), w);
    }
    Ok(())
}

fn run_catalog(config: &TodoportConfig, args: FormatCli) -> Result<(), TodoportError> {
    let json = check_format(&args.format)?;
    let mapper = config.mapper()?;
    if json {
        let domains: Vec<_> = mapper.domains().collect();
        println!("{}", serde_json::to_string_pretty(&domains)?);
        return Ok(());
    }
    for domain in mapper.domains() {
        println!(
            "{} -> {{{}}}",
            domain.name.bold(),
            domain.targets.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        for (legacy, target) in &domain.rules {
            println!("    {} -> {}", legacy, target);
        }
        match &domain.fallback {
            Some(f) => println!("    * -> {}", f),
            None => println!("    * -> {}", "error".bright_red()),
        }
    }
    Ok(())
}

fn run_rewrite(
    config: &TodoportConfig,
    current_dir: &Path,
    args: RewriteCli,
) -> Result<(), TodoportError> {
    let json = check_format(&args.format)?;
    let root = args
        .root
        .or_else(|| config.rewrite.root.clone())
        .unwrap_or_else(|| current_dir.to_path_buf());
    let prefix = args
        .prefix
        .unwrap_or_else(|| config.rewrite_prefix().to_string());
    let tables = if args.tables.is_empty() {
        config.rewrite_tables()?
    } else {
        args.tables
    };

    let mut options = RewriteOptions::new(tables, &prefix);
    options.dry_run = args.dry_run;
    if !args.accessors.is_empty() {
        options.accessors = args.accessors;
    } else if !config.rewrite.accessors.is_empty() {
        options.accessors = config.rewrite.accessors.clone();
    }
    if !config.rewrite.extensions.is_empty() {
        options.extensions = config.rewrite.extensions.clone();
    }
    if !config.rewrite.exclude_dirs.is_empty() {
        options.excluded_dirs = config.rewrite.exclude_dirs.clone();
    }

    let journal = open_journal(config, args.journal, args.no_journal);
    let summary = rewrite::rewrite_references(&root, &options)?;
    let recorded = journal.record(
        "rewrite",
        &root.to_string_lossy(),
        if summary.ambiguities.is_empty() {
            "success"
        } else {
            "needs_review"
        },
        Some(serde_json::json!({
            "files_scanned": summary.files_scanned,
            "files_modified": summary.files_modified,
            "references_rewritten": summary.references_rewritten,
            "ambiguities": summary.ambiguities.len(),
            "skipped_files": summary.skipped_files,
            "dry_run": summary.dry_run,
        })),
    );
    if let Err(err) = recorded {
        eprintln!("{} journal: rewrite not recorded: {}", "⚠".bright_yellow(), err);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let verb = if summary.dry_run { "would modify" } else { "modified" };
    println!(
        "Scanned {} file(s), {} {} ({} reference(s), {} collapsed prefix(es))",
        summary.files_scanned,
        verb,
        summary.files_modified,
        summary.references_rewritten,
        summary.prefixes_collapsed
    );
    for f in &summary.modified_files {
        println!("  {} {}", "●".bright_cyan(), f);
    }
    if !summary.ambiguities.is_empty() {
        println!(
            "{} {} reference(s) left for manual review:",
            "⚠".bright_yellow(),
            summary.ambiguities.len()
        );
        for a in &summary.ambiguities {
            println!("  {}:{} [{}] {}", a.file, a.line, a.table, a.context);
        }
    }
    if !summary.skipped_files.is_empty() {
        println!(
            "{} {} file(s) skipped, not valid UTF-8:",
            "⚠".bright_yellow(),
            summary.skipped_files.len()
        );
        for f in &summary.skipped_files {
            println!("  {}", f);
        }
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), TodoportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
